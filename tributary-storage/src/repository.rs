//! Storage traits consumed by the runtime
//!
//! `PostgresStorage` implements all of them against the database and
//! `InMemoryStorage` implements them in-process.

use crate::models::{DataSourceModel, SyncRunModel};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tributary_core::Watermarks;
use uuid::Uuid;

/// Persistence for the run lifecycle and its watermarks
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Upsert the run row for `(data_source_id, script_name)` into `running`.
    ///
    /// Resets completion time, error and record count and stamps the batch.
    /// Returns `None` when the run cannot be claimed because the data source
    /// is unknown or no longer enabled.
    async fn create_run(
        &self,
        data_source_id: Uuid,
        script_name: &str,
        batch_id: Uuid,
    ) -> Result<Option<Uuid>>;

    /// Mark a run completed and merge watermarks.
    ///
    /// `last` only moves forward and `earliest` only moves backward; `None`
    /// leaves the stored value untouched.
    async fn complete_run(
        &self,
        run_id: Uuid,
        records_imported: u64,
        new_last_fetched_at: Option<DateTime<Utc>>,
        new_earliest_fetched_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn fail_run(&self, run_id: Uuid, error_message: &str) -> Result<()>;

    /// Watermarks of the most recent successful attempt, if any run row exists
    async fn watermarks(&self, data_source_id: Uuid, script_name: &str)
        -> Result<Option<Watermarks>>;

    async fn get_run(&self, run_id: Uuid) -> Result<SyncRunModel>;

    /// All run rows of a data source ordered by script name
    async fn list_runs(&self, data_source_id: Uuid) -> Result<Vec<SyncRunModel>>;
}

/// Source of the data sources a batch should sync
#[async_trait]
pub trait DataSourceCatalog: Send + Sync {
    /// Enabled data sources ordered by tenant, then creation time
    async fn enabled_data_sources(&self) -> Result<Vec<DataSourceModel>>;
}

pub(crate) fn records_to_i64(records_imported: u64) -> Result<i64> {
    i64::try_from(records_imported).map_err(|_| {
        crate::Error::ValidationError(format!(
            "records_imported out of range: {}",
            records_imported
        ))
    })
}

/// `GREATEST` semantics with NULLs ignored, as Postgres applies them
pub(crate) fn merge_max(
    current: Option<DateTime<Utc>>,
    new: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (current, new) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// `LEAST` semantics with NULLs ignored
pub(crate) fn merge_min(
    current: Option<DateTime<Utc>>,
    new: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (current, new) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_merge_watermarks_ignores_none() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let later = t + Duration::days(1);

        assert_eq!(merge_max(None, Some(t)), Some(t));
        assert_eq!(merge_max(Some(later), None), Some(later));
        assert_eq!(merge_max(Some(later), Some(t)), Some(later));
        assert_eq!(merge_min(Some(later), Some(t)), Some(t));
        assert_eq!(merge_min(Some(t), None), Some(t));
        assert_eq!(merge_min(None, None), None);
    }

    #[test]
    fn test_records_out_of_range() {
        assert!(records_to_i64(u64::MAX).is_err());
        assert_eq!(records_to_i64(42).unwrap(), 42);
    }
}
