//! # Tributary Core
//!
//! Core types for the Tributary sync orchestrator: the connector script
//! contract, the compiled-in script registry, dependency graph resolution
//! and the forward/backfill window planner.

pub mod clock;
pub mod context;
pub mod graph;
pub mod registry;
pub mod script;
pub mod sink;
pub mod window;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{ExecutionContext, Segment, SyncTarget};
pub use graph::{DependencyGraph, GraphError};
pub use registry::{Provider, RegistryError, ScriptRegistry};
pub use script::{ScriptDescriptor, ScriptError, ScriptId, SyncScript};
pub use sink::{RecordSink, SinkError, SyncedRecord};
pub use window::{plan_windows, DateRange, Watermarks, WindowConfig, WindowPlan};

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Internal error: {0}")]
    Internal(String),
}
