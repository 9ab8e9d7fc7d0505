//! # Tributary Storage
//!
//! Run tracking, the data-source catalog, the synced-record landing table
//! and distributed advisory locks, backed by PostgreSQL. Every storage
//! trait also has an in-memory implementation for tests and local runs.

pub mod advisory;
pub mod memory;
pub mod metrics;
pub mod migrations;
pub mod models;
pub mod postgres;
pub mod repository;

// Re-export commonly used types
pub use advisory::{AdvisoryLockManager, PgAdvisoryLocks, DEFAULT_LOCK_CONNECTIONS};
pub use memory::{InMemoryAdvisoryLocks, InMemoryStorage};
pub use models::{DataSourceModel, RunStatus, SyncRunModel, SyncedRecordModel};
pub use postgres::{PoolConfig, PostgresStorage};
pub use repository::{DataSourceCatalog, RunRepository};

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for storage operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Connection pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}
