//! Custom assertions for common verification patterns
//!
//! Panics carry the full run row so failures are readable.

use chrono::{DateTime, Utc};
use tributary_runtime::{ScriptOutcome, SharedResults};
use tributary_storage::{InMemoryStorage, RunStatus, SyncRunModel};
use uuid::Uuid;

/// Fetch a run row or panic
pub fn run_row(storage: &InMemoryStorage, data_source_id: Uuid, script: &str) -> SyncRunModel {
    storage
        .run_for(data_source_id, script)
        .unwrap_or_else(|| panic!("No run row for {} on {}", script, data_source_id))
}

pub fn assert_run_status(
    storage: &InMemoryStorage,
    data_source_id: Uuid,
    script: &str,
    expected: RunStatus,
) -> SyncRunModel {
    let run = run_row(storage, data_source_id, script);
    assert_eq!(
        run.run_status().ok(),
        Some(expected),
        "Unexpected status for {}: {:?}",
        script,
        run
    );
    run
}

/// Assert a completed run with exactly these watermarks
pub fn assert_watermarks(
    storage: &InMemoryStorage,
    data_source_id: Uuid,
    script: &str,
    last: DateTime<Utc>,
    earliest: DateTime<Utc>,
) {
    let run = run_row(storage, data_source_id, script);
    assert_eq!(
        (run.last_fetched_data_at, run.earliest_fetched_data_at),
        (Some(last), Some(earliest)),
        "Unexpected watermarks for {}: {:?}",
        script,
        run
    );
}

/// Outcome recorded under `data_source_id:resource`
pub fn outcome_of(results: &SharedResults, data_source_id: Uuid, resource: &str) -> ScriptOutcome {
    let key = format!("{}:{}", data_source_id, resource);
    let results = results.lock().unwrap_or_else(|e| e.into_inner());
    results
        .get(&key)
        .map(|r| r.outcome.clone())
        .unwrap_or_else(|| panic!("No result recorded for {}", key))
}
