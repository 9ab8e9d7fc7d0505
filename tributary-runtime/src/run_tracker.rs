//! Run lifecycle tracking
//!
//! The tracker is stateless and thread-safe; all state lives in the
//! [`RunRepository`]. It is the only writer of run rows.

use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use tributary_core::Watermarks;
use tributary_storage::{RunRepository, SyncRunModel};
use uuid::Uuid;

#[derive(Clone)]
pub struct RunTracker {
    repository: Arc<dyn RunRepository>,
}

impl RunTracker {
    pub fn new(repository: Arc<dyn RunRepository>) -> Self {
        Self { repository }
    }

    /// Map storage errors to runtime domain errors
    fn map_storage_error(e: tributary_storage::Error, context: &str) -> crate::Error {
        use tributary_storage::Error as StorageError;

        match e {
            StorageError::NotFound(msg) => {
                error!(error = %msg, context = %context, "Run not found");
                crate::Error::NotFound(msg)
            }
            other => {
                error!(error = %other, context = %context, "Storage error");
                crate::Error::Storage(other)
            }
        }
    }

    /// Claim the run row for a script; `None` means it could not be claimed
    #[instrument(skip(self), fields(data_source_id = %data_source_id, script = %script_name, batch_id = %batch_id))]
    pub async fn create_run(
        &self,
        data_source_id: Uuid,
        script_name: &str,
        batch_id: Uuid,
    ) -> Result<Option<Uuid>> {
        let run_id = self
            .repository
            .create_run(data_source_id, script_name, batch_id)
            .await
            .map_err(|e| Self::map_storage_error(e, "create_run"))?;

        debug!(run_id = ?run_id, "Run claimed");
        Ok(run_id)
    }

    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn complete_run(
        &self,
        run_id: Uuid,
        records_imported: u64,
        new_last_fetched_at: Option<DateTime<Utc>>,
        new_earliest_fetched_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.repository
            .complete_run(
                run_id,
                records_imported,
                new_last_fetched_at,
                new_earliest_fetched_at,
            )
            .await
            .map_err(|e| Self::map_storage_error(e, "complete_run"))
    }

    #[instrument(skip(self, error_message), fields(run_id = %run_id))]
    pub async fn fail_run(&self, run_id: Uuid, error_message: &str) -> Result<()> {
        self.repository
            .fail_run(run_id, error_message)
            .await
            .map_err(|e| Self::map_storage_error(e, "fail_run"))
    }

    pub async fn watermarks(
        &self,
        data_source_id: Uuid,
        script_name: &str,
    ) -> Result<Option<Watermarks>> {
        self.repository
            .watermarks(data_source_id, script_name)
            .await
            .map_err(|e| Self::map_storage_error(e, "watermarks"))
    }

    pub async fn list_runs(&self, data_source_id: Uuid) -> Result<Vec<SyncRunModel>> {
        self.repository
            .list_runs(data_source_id)
            .await
            .map_err(|e| Self::map_storage_error(e, "list_runs"))
    }
}
