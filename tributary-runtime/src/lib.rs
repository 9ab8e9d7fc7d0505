//! # Tributary Runtime
//!
//! Executes connector scripts for every enabled data source: takes the
//! advisory lock, tracks the run, plans forward/backfill windows, invokes
//! the connector and schedules dependent scripts in order.

pub mod batch;
pub mod config;
pub mod date_range;
pub mod graph_runner;
pub mod metrics;
pub mod run_tracker;
pub mod script_executor;
pub mod state_machine;

// Re-export commonly used types
pub use batch::{BatchOrchestrator, BatchSummary, ScriptStatus};
pub use config::{LockScope, RuntimeConfig};
pub use date_range::DateRangeCalculator;
pub use graph_runner::{
    ExecutionGraphRunner, GraphReport, ScriptFailure, ScriptJob, SharedErrors, SharedResults,
};
pub use run_tracker::RunTracker;
pub use script_executor::{FailureCause, ScriptExecutor, ScriptOutcome, ScriptResult, SkipReason};
pub use state_machine::{ScriptState, ScriptStateMachine};

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for runtime operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] tributary_storage::Error),

    #[error("Graph error: {0}")]
    Graph(#[from] tributary_core::GraphError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
