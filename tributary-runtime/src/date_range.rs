//! Date-range calculation against stored watermarks

use crate::run_tracker::RunTracker;
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument};
use tributary_core::{plan_windows, WindowConfig, WindowPlan};
use uuid::Uuid;

/// Reads a script's watermarks and plans its next windows
#[derive(Clone)]
pub struct DateRangeCalculator {
    tracker: RunTracker,
    config: WindowConfig,
}

impl DateRangeCalculator {
    pub fn new(tracker: RunTracker, config: WindowConfig) -> Self {
        Self { tracker, config }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Plan forward and backfill windows for a script.
    ///
    /// Watermarks are only written on successful completion, so reading
    /// them right after the run row was claimed still yields the previous
    /// success.
    #[instrument(skip(self), fields(data_source_id = %data_source_id, script = %script_name))]
    pub async fn calculate(
        &self,
        data_source_id: Uuid,
        script_name: &str,
        target_window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowPlan> {
        let watermarks = self.tracker.watermarks(data_source_id, script_name).await?;
        let plan = plan_windows(watermarks, target_window, now, &self.config);

        debug!(
            forward = ?plan.forward,
            backfill = ?plan.backfill,
            backfill_complete = plan.backfill_complete,
            "Planned windows"
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tributary_core::{DateRange, Watermarks};
    use tributary_storage::{DataSourceModel, InMemoryStorage, RunRepository};

    #[tokio::test]
    async fn test_first_run_without_row() {
        let storage = Arc::new(InMemoryStorage::new());
        let calc = DateRangeCalculator::new(RunTracker::new(storage), WindowConfig::default());
        let now = Utc::now();

        let plan = calc
            .calculate(Uuid::new_v4(), "github:commit", Duration::days(90), now)
            .await
            .unwrap();
        assert_eq!(plan.forward, Some(DateRange::new(now - Duration::days(7), now)));
        assert!(plan.backfill.is_none());
    }

    #[tokio::test]
    async fn test_claimed_row_still_reports_previous_watermarks() {
        let ds = DataSourceModel::new("acme", "github");
        let storage = Arc::new(InMemoryStorage::with_data_sources([ds.clone()]));
        let now = Utc::now();
        let last = now - Duration::days(1);
        let earliest = now - Duration::days(8);

        let run = storage
            .create_run(ds.id, "github:commit", Uuid::now_v7())
            .await
            .unwrap()
            .unwrap();
        storage
            .complete_run(run, 1, Some(last), Some(earliest))
            .await
            .unwrap();
        // Next batch claims the row before calculating.
        storage
            .create_run(ds.id, "github:commit", Uuid::now_v7())
            .await
            .unwrap();

        let calc = DateRangeCalculator::new(
            RunTracker::new(storage.clone()),
            WindowConfig::default(),
        );
        let plan = calc
            .calculate(ds.id, "github:commit", Duration::days(90), now)
            .await
            .unwrap();

        assert_eq!(plan.forward, Some(DateRange::new(last, now)));
        assert_eq!(
            plan.backfill,
            Some(DateRange::new(earliest - Duration::days(7), earliest))
        );
        assert_eq!(
            storage.watermarks(ds.id, "github:commit").await.unwrap(),
            Some(Watermarks {
                last_fetched_at: Some(last),
                earliest_fetched_at: Some(earliest),
            })
        );
    }
}
