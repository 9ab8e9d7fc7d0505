//! Connector script definitions
//!
//! A script is a named unit of synchronization work for one resource type
//! under one provider (e.g. `github:commit`). Scripts are defined by
//! connector authors and are immutable for the lifetime of the process.

use crate::context::ExecutionContext;
use crate::sink::RecordSink;
use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default retention window when a connector does not declare one.
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

/// Identity of a script within one execution batch.
///
/// Usually `provider:resource`, or a registry-assigned unique name when
/// several scripts share a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScriptId(pub String);

impl ScriptId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScriptId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Static declaration of what a script produces and what it needs first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDescriptor {
    /// Provider the script talks to (e.g. "github")
    pub provider: String,

    /// Resource the script produces (e.g. "commit")
    pub resource: String,

    /// Resource names or script identities that must complete first
    pub depends_on: Vec<String>,

    /// How far back history should eventually be back-filled
    pub retention_window: Duration,

    /// Overrides the `provider:resource` identity when set
    pub unique_name: Option<String>,
}

impl ScriptDescriptor {
    /// Create a descriptor with no dependencies and the default retention window
    pub fn new(provider: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            resource: resource.into(),
            depends_on: Vec::new(),
            retention_window: Duration::days(DEFAULT_RETENTION_DAYS),
            unique_name: None,
        }
    }

    /// Declare a dependency on a resource name or script identity
    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }

    pub fn with_retention(mut self, retention_window: Duration) -> Self {
        self.retention_window = retention_window;
        self
    }

    pub fn with_unique_name(mut self, name: impl Into<String>) -> Self {
        self.unique_name = Some(name.into());
        self
    }

    /// Identity used for graph resolution and run tracking
    pub fn id(&self) -> ScriptId {
        match &self.unique_name {
            Some(name) => ScriptId::new(name.clone()),
            None => ScriptId::new(self.qualified_name()),
        }
    }

    /// `provider:resource`, used for lock keys and error reporting
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.provider, self.resource)
    }
}

/// Errors a connector can report from a single invocation.
///
/// The variant is preserved in the in-memory outcome; only its rendered
/// message is persisted on the run record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Record sink error: {0}")]
    Sink(String),

    #[error("Missing configuration: {0}")]
    Config(String),

    #[error("Invocation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Connector panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Message(String),
}

impl From<String> for ScriptError {
    fn from(msg: String) -> Self {
        ScriptError::Message(msg)
    }
}

impl From<&str> for ScriptError {
    fn from(msg: &str) -> Self {
        ScriptError::Message(msg.to_string())
    }
}

/// Contract every connector script satisfies.
///
/// `run` must be idempotent for a given `(start_date, end_date)`: re-running
/// the same window after a crash must not duplicate records. Connectors get
/// there by upserting through the [`RecordSink`] keyed by natural id.
#[async_trait]
pub trait SyncScript: Send + Sync {
    /// Static declaration of the script
    fn descriptor(&self) -> &ScriptDescriptor;

    /// Fetch one window of data and return the number of records imported
    async fn run(&self, sink: &dyn RecordSink, ctx: &ExecutionContext) -> Result<u64, ScriptError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_identity() {
        let d = ScriptDescriptor::new("github", "commit");
        assert_eq!(d.id(), ScriptId::from("github:commit"));
        assert_eq!(d.qualified_name(), "github:commit");
        assert_eq!(d.retention_window, Duration::days(DEFAULT_RETENTION_DAYS));
    }

    #[test]
    fn test_unique_name_overrides_identity() {
        let d = ScriptDescriptor::new("gitlab", "repository").with_unique_name("gitlab-repos");
        assert_eq!(d.id().as_str(), "gitlab-repos");
        // Lock keys and error reports still use the qualified name
        assert_eq!(d.qualified_name(), "gitlab:repository");
    }

    #[test]
    fn test_builder_collects_dependencies() {
        let d = ScriptDescriptor::new("github", "commit")
            .depends_on("repository")
            .depends_on("github:branch")
            .with_retention(Duration::days(365));

        assert_eq!(d.depends_on, vec!["repository", "github:branch"]);
        assert_eq!(d.retention_window, Duration::days(365));
    }

    #[test]
    fn test_raw_message_errors_render_verbatim() {
        let err = ScriptError::from("rate limited");
        assert_eq!(err.to_string(), "rate limited");
    }
}
