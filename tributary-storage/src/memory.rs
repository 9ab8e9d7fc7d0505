//! In-memory storage implementations for tests and local runs.
//!
//! ## Limitations
//!
//! - **Single-process only**: locks are not shared across process boundaries
//! - **No persistence**: all state is lost when the process exits

use crate::models::{DataSourceModel, SyncRunModel, SyncedRecordModel};
use crate::postgres::merged_watermarks;
use crate::repository::{records_to_i64, DataSourceCatalog, RunRepository};
use crate::{AdvisoryLockManager, Result, RunStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tributary_core::{RecordSink, SinkError, SyncedRecord, Watermarks};
use uuid::Uuid;

fn poison_err<T>(_: PoisonError<T>) -> crate::Error {
    crate::Error::Internal("lock poisoned".to_string())
}

#[derive(Default)]
struct StorageState {
    data_sources: BTreeMap<Uuid, DataSourceModel>,
    runs: HashMap<Uuid, SyncRunModel>,
    run_index: HashMap<(Uuid, String), Uuid>,
    records: HashMap<(Uuid, String, String), SyncedRecordModel>,
}

/// In-process stand-in for [`crate::PostgresStorage`].
///
/// Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<RwLock<StorageState>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_sources(data_sources: impl IntoIterator<Item = DataSourceModel>) -> Self {
        let storage = Self::new();
        for ds in data_sources {
            storage.upsert_data_source(ds);
        }
        storage
    }

    pub fn upsert_data_source(&self, data_source: DataSourceModel) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.data_sources.insert(data_source.id, data_source);
    }

    /// Flip the enabled flag; runs for a disabled source can no longer be claimed
    pub fn set_enabled(&self, data_source_id: Uuid, enabled: bool) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(ds) = state.data_sources.get_mut(&data_source_id) {
            ds.enabled = enabled;
            ds.updated_at = Utc::now();
        }
    }

    /// Run row for a script, if one was ever created
    pub fn run_for(&self, data_source_id: Uuid, script_name: &str) -> Option<SyncRunModel> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .run_index
            .get(&(data_source_id, script_name.to_string()))
            .and_then(|id| state.runs.get(id))
            .cloned()
    }

    /// Replace the stored watermarks of an existing run row
    pub fn set_watermarks(&self, data_source_id: Uuid, script_name: &str, marks: Watermarks) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let Some(id) = state
            .run_index
            .get(&(data_source_id, script_name.to_string()))
            .copied()
        else {
            return;
        };
        if let Some(run) = state.runs.get_mut(&id) {
            run.last_fetched_data_at = marks.last_fetched_at;
            run.earliest_fetched_data_at = marks.earliest_fetched_at;
        }
    }

    /// Stored records of one resource, ordered by external id
    pub fn records(&self, data_source_id: Uuid, resource: &str) -> Vec<SyncedRecordModel> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|r| r.data_source_id == data_source_id && r.resource == resource)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        records
    }

    fn update_run<F>(&self, run_id: Uuid, f: F) -> Result<()>
    where
        F: FnOnce(&mut SyncRunModel),
    {
        let mut state = self.state.write().map_err(poison_err)?;
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| crate::Error::NotFound(format!("Sync run {}", run_id)))?;
        f(run);
        run.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl RunRepository for InMemoryStorage {
    async fn create_run(
        &self,
        data_source_id: Uuid,
        script_name: &str,
        batch_id: Uuid,
    ) -> Result<Option<Uuid>> {
        if script_name.trim().is_empty() {
            return Err(crate::Error::ValidationError(
                "Script name cannot be empty".to_string(),
            ));
        }

        let mut state = self.state.write().map_err(poison_err)?;
        let claimable = state
            .data_sources
            .get(&data_source_id)
            .map(|ds| ds.enabled)
            .unwrap_or(false);
        if !claimable {
            return Ok(None);
        }

        let now = Utc::now();
        let key = (data_source_id, script_name.to_string());
        if let Some(id) = state.run_index.get(&key).copied() {
            if let Some(run) = state.runs.get_mut(&id) {
                run.batch_id = batch_id;
                run.status = RunStatus::Running.as_str().to_string();
                run.started_at = Some(now);
                run.completed_at = None;
                run.records_imported = 0;
                run.error_message = None;
                run.updated_at = now;
                return Ok(Some(id));
            }
        }

        let id = Uuid::new_v4();
        state.runs.insert(
            id,
            SyncRunModel {
                id,
                data_source_id,
                script_name: script_name.to_string(),
                batch_id,
                status: RunStatus::Running.as_str().to_string(),
                started_at: Some(now),
                completed_at: None,
                last_fetched_data_at: None,
                earliest_fetched_data_at: None,
                records_imported: 0,
                error_message: None,
                created_at: now,
                updated_at: now,
            },
        );
        state.run_index.insert(key, id);
        Ok(Some(id))
    }

    async fn complete_run(
        &self,
        run_id: Uuid,
        records_imported: u64,
        new_last_fetched_at: Option<DateTime<Utc>>,
        new_earliest_fetched_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let records = records_to_i64(records_imported)?;
        self.update_run(run_id, |run| {
            let merged =
                merged_watermarks(run.watermarks(), new_last_fetched_at, new_earliest_fetched_at);
            run.status = RunStatus::Completed.as_str().to_string();
            run.completed_at = Some(Utc::now());
            run.records_imported = records;
            run.last_fetched_data_at = merged.last_fetched_at;
            run.earliest_fetched_data_at = merged.earliest_fetched_at;
            run.error_message = None;
        })
    }

    async fn fail_run(&self, run_id: Uuid, error_message: &str) -> Result<()> {
        self.update_run(run_id, |run| {
            run.status = RunStatus::Failed.as_str().to_string();
            run.completed_at = Some(Utc::now());
            run.error_message = Some(error_message.to_string());
        })
    }

    async fn watermarks(
        &self,
        data_source_id: Uuid,
        script_name: &str,
    ) -> Result<Option<Watermarks>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state
            .run_index
            .get(&(data_source_id, script_name.to_string()))
            .and_then(|id| state.runs.get(id))
            .map(SyncRunModel::watermarks))
    }

    async fn get_run(&self, run_id: Uuid) -> Result<SyncRunModel> {
        let state = self.state.read().map_err(poison_err)?;
        state
            .runs
            .get(&run_id)
            .cloned()
            .ok_or_else(|| crate::Error::NotFound(format!("Sync run {}", run_id)))
    }

    async fn list_runs(&self, data_source_id: Uuid) -> Result<Vec<SyncRunModel>> {
        let state = self.state.read().map_err(poison_err)?;
        let mut runs: Vec<_> = state
            .runs
            .values()
            .filter(|r| r.data_source_id == data_source_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.script_name.cmp(&b.script_name));
        Ok(runs)
    }
}

#[async_trait]
impl DataSourceCatalog for InMemoryStorage {
    async fn enabled_data_sources(&self) -> Result<Vec<DataSourceModel>> {
        let state = self.state.read().map_err(poison_err)?;
        let mut sources: Vec<_> = state
            .data_sources
            .values()
            .filter(|ds| ds.enabled)
            .cloned()
            .collect();
        sources.sort_by(|a, b| {
            a.tenant_id
                .cmp(&b.tenant_id)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(sources)
    }
}

#[async_trait]
impl RecordSink for InMemoryStorage {
    async fn upsert_records(
        &self,
        data_source_id: Uuid,
        resource: &str,
        records: Vec<SyncedRecord>,
    ) -> std::result::Result<u64, SinkError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| SinkError("lock poisoned".to_string()))?;
        let synced_at = Utc::now();
        let mut written = 0u64;

        for record in records {
            let key = (
                data_source_id,
                resource.to_string(),
                record.external_id.clone(),
            );
            state.records.insert(
                key,
                SyncedRecordModel {
                    data_source_id,
                    resource: resource.to_string(),
                    external_id: record.external_id,
                    payload: Json(record.payload),
                    occurred_at: record.occurred_at,
                    synced_at,
                },
            );
            written += 1;
        }
        Ok(written)
    }
}

/// Process-local advisory locks.
///
/// Clones share the lock table, so two clones behave like two workers
/// contending on the same database.
#[derive(Clone, Default)]
pub struct InMemoryAdvisoryLocks {
    held: Arc<RwLock<HashSet<String>>>,
}

impl InMemoryAdvisoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .read()
            .map(|held| held.contains(key))
            .unwrap_or(false)
    }

    pub fn held_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .held
            .read()
            .map(|held| held.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[async_trait]
impl AdvisoryLockManager for InMemoryAdvisoryLocks {
    async fn try_acquire(&self, key: &str) -> Result<bool> {
        let mut held = self.held.write().map_err(poison_err)?;
        Ok(held.insert(key.to_string()))
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut held = self.held.write().map_err(poison_err)?;
        held.remove(key);
        Ok(())
    }
}
