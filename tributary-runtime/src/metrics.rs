//! Prometheus metrics for sync orchestration

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    Histogram, HistogramVec, IntCounter, IntCounterVec,
};

lazy_static! {
    /// Terminal outcomes of script attempts
    ///
    /// Labels:
    /// - outcome: "succeeded", "skipped", "failed", "upstream_failed"
    pub static ref SCRIPT_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tributary_script_outcomes_total",
        "Total number of script attempts by outcome",
        &["outcome"]
    )
    .expect("tributary_script_outcomes_total metric registration");

    /// Wall time of a script attempt, lock to release
    ///
    /// Buckets: 10ms to 30min
    pub static ref SCRIPT_DURATION: HistogramVec = register_histogram_vec!(
        "tributary_script_duration_seconds",
        "Duration of script attempts",
        &["outcome"],
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 1800.0]
    )
    .expect("tributary_script_duration_seconds metric registration");

    /// Attempts skipped because another worker held the lock
    pub static ref LOCK_CONTENTION_TOTAL: IntCounter = register_int_counter!(
        "tributary_lock_contention_total",
        "Total number of script attempts skipped on lock contention"
    )
    .expect("tributary_lock_contention_total metric registration");

    /// Wall time of a whole batch sweep
    pub static ref BATCH_DURATION: Histogram = register_histogram!(
        "tributary_batch_duration_seconds",
        "Duration of batch sweeps",
        vec![1.0, 5.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0]
    )
    .expect("tributary_batch_duration_seconds metric registration");

    /// Records reported by successful connector runs
    ///
    /// Labels:
    /// - provider: e.g. "github"
    /// - resource: e.g. "commit"
    pub static ref RECORDS_IMPORTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tributary_records_imported_total",
        "Total number of records imported",
        &["provider", "resource"]
    )
    .expect("tributary_records_imported_total metric registration");
}
