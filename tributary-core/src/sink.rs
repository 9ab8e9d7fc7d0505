//! Record sink contract
//!
//! Connectors land their output through a [`RecordSink`] so that the
//! storage engine stays opaque to them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One record produced by a connector, keyed by its natural id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedRecord {
    /// Natural key in the external system (commit sha, issue number, ...)
    pub external_id: String,

    /// When the record happened in the external system, if known
    pub occurred_at: Option<DateTime<Utc>>,

    /// Raw mapped payload
    pub payload: serde_json::Value,
}

impl SyncedRecord {
    pub fn new(external_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            external_id: external_id.into(),
            occurred_at: None,
            payload,
        }
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }
}

/// Failure reported by a sink implementation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct SinkError(pub String);

impl From<SinkError> for crate::ScriptError {
    fn from(err: SinkError) -> Self {
        crate::ScriptError::Sink(err.0)
    }
}

/// Destination for connector output.
///
/// Implementations must upsert by `(data_source_id, resource, external_id)`
/// so re-running a window never duplicates records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Upsert records and return how many rows were written
    async fn upsert_records(
        &self,
        data_source_id: Uuid,
        resource: &str,
        records: Vec<SyncedRecord>,
    ) -> Result<u64, SinkError>;
}
