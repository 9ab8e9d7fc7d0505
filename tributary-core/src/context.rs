//! Execution context
//!
//! Runtime parameters handed to a connector invocation. A [`SyncTarget`]
//! describes one tenant's data source for a whole batch; an
//! [`ExecutionContext`] narrows it to one date-range segment of one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Which window a connector invocation is fetching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    /// New data since the last successful fetch
    Forward,
    /// Older history, moving the low-water mark backward
    Backfill,
}

impl Segment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::Forward => "forward",
            Segment::Backfill => "backfill",
        }
    }
}

/// Per tenant/data-source parameters shared by every script in one graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTarget {
    pub tenant_id: String,
    pub data_source_id: Uuid,
    pub provider: String,

    /// Fully resolved credentials and settings for this data source
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Sweep this target belongs to
    pub batch_id: Uuid,
}

impl SyncTarget {
    /// Narrow the target to one segment of a run
    pub fn segment(
        &self,
        run_id: Uuid,
        segment: Segment,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> ExecutionContext {
        ExecutionContext {
            target: self.clone(),
            run_id,
            segment,
            start_date,
            end_date,
        }
    }
}

/// Parameters for a single connector invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub target: SyncTarget,
    pub run_id: Uuid,
    pub segment: Segment,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn data_source_id(&self) -> Uuid {
        self.target.data_source_id
    }

    pub fn tenant_id(&self) -> &str {
        &self.target.tenant_id
    }

    /// Look up a credential/config value for this data source
    pub fn env(&self, key: &str) -> Option<&str> {
        self.target.env.get(key).map(String::as_str)
    }
}
