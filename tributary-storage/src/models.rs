//! Database models for Tributary sync state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tributary_core::Watermarks;
use uuid::Uuid;

/// Lifecycle status of a sync run row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(crate::Error::ValidationError(format!(
                "Invalid run status: {}",
                other
            ))),
        }
    }
}

/// One row per (data source, script), upserted across batches
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncRunModel {
    pub id: Uuid,
    pub data_source_id: Uuid,
    pub script_name: String,
    pub batch_id: Uuid,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_fetched_data_at: Option<DateTime<Utc>>,
    pub earliest_fetched_data_at: Option<DateTime<Utc>>,
    pub records_imported: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncRunModel {
    pub fn run_status(&self) -> crate::Result<RunStatus> {
        self.status.parse()
    }

    /// Watermarks left by the most recent successful attempt
    pub fn watermarks(&self) -> Watermarks {
        Watermarks {
            last_fetched_at: self.last_fetched_data_at,
            earliest_fetched_at: self.earliest_fetched_data_at,
        }
    }
}

/// A tenant's configured connector instance
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DataSourceModel {
    pub id: Uuid,
    pub tenant_id: String,
    pub provider: String,
    pub enabled: bool,
    /// Flat string map of credentials and connector settings
    pub env: Json<BTreeMap<String, String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataSourceModel {
    /// Enabled data source with an empty environment
    pub fn new(tenant_id: impl Into<String>, provider: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            provider: provider.into(),
            enabled: true,
            env: Json(BTreeMap::new()),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.0.insert(key.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A record landed by a connector
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncedRecordModel {
    pub data_source_id: Uuid,
    pub resource: String,
    pub external_id: String,
    pub payload: Json<serde_json::Value>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub synced_at: DateTime<Utc>,
}
