//! Prometheus metrics for storage operations
//!
//! This module defines metrics for:
//! - Database operation latency
//! - Advisory lock acquisition outcomes

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};

lazy_static! {
    /// Database operation latency
    ///
    /// Labels:
    /// - operation: Storage method name (e.g., "create_run", "complete_run")
    pub static ref DB_OPERATION_DURATION: HistogramVec = register_histogram_vec!(
        "tributary_db_operation_duration_seconds",
        "Duration of database operations",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register db_operation_duration metric");

    /// Advisory lock operations
    ///
    /// Labels:
    /// - result: "acquired", "contended", "released" or "release_failed"
    pub static ref ADVISORY_LOCK_OPERATIONS: IntCounterVec = register_int_counter_vec!(
        "tributary_advisory_lock_operations_total",
        "Advisory lock operations by result",
        &["result"]
    )
    .expect("Failed to register advisory_lock_operations metric");
}
