//! Runtime tunables

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tributary_core::{ScriptDescriptor, WindowConfig};
use uuid::Uuid;

/// Default upper bound for a single connector invocation
pub const DEFAULT_INVOCATION_TIMEOUT_SECS: u64 = 900;

/// Default number of data-source graphs run at once
pub const DEFAULT_MAX_CONCURRENT_GRAPHS: usize = 8;

/// How widely an advisory lock excludes other workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockScope {
    /// One holder per `provider:resource` across all tenants
    #[default]
    Script,
    /// One holder per `data_source_id:provider:resource`
    DataSource,
}

impl LockScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockScope::Script => "script",
            LockScope::DataSource => "data_source",
        }
    }

    /// Advisory lock key for a script run against a data source
    pub fn lock_key(&self, data_source_id: Uuid, descriptor: &ScriptDescriptor) -> String {
        match self {
            LockScope::Script => descriptor.qualified_name(),
            LockScope::DataSource => {
                format!("{}:{}", data_source_id, descriptor.qualified_name())
            }
        }
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockScope {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "script" => Ok(LockScope::Script),
            "data_source" | "data-source" => Ok(LockScope::DataSource),
            other => Err(crate::Error::InvalidState(format!(
                "Unknown lock scope '{}', expected 'script' or 'data_source'",
                other
            ))),
        }
    }
}

/// Parsed runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub window: WindowConfig,

    /// Bound on each connector invocation; `None` waits forever
    pub invocation_timeout: Option<Duration>,

    pub lock_scope: LockScope,

    pub max_concurrent_graphs: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            invocation_timeout: Some(Duration::from_secs(DEFAULT_INVOCATION_TIMEOUT_SECS)),
            lock_scope: LockScope::default(),
            max_concurrent_graphs: DEFAULT_MAX_CONCURRENT_GRAPHS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_by_scope() {
        let ds = Uuid::new_v4();
        let descriptor = ScriptDescriptor::new("github", "commit");

        assert_eq!(LockScope::Script.lock_key(ds, &descriptor), "github:commit");
        assert_eq!(
            LockScope::DataSource.lock_key(ds, &descriptor),
            format!("{}:github:commit", ds)
        );
    }

    #[test]
    fn test_lock_key_ignores_unique_name() {
        let descriptor =
            ScriptDescriptor::new("gitlab", "repository").with_unique_name("gitlab-repos");
        assert_eq!(
            LockScope::Script.lock_key(Uuid::new_v4(), &descriptor),
            "gitlab:repository"
        );
    }

    #[test]
    fn test_parse_lock_scope() {
        assert_eq!("script".parse::<LockScope>().unwrap(), LockScope::Script);
        assert_eq!(
            "DATA_SOURCE".parse::<LockScope>().unwrap(),
            LockScope::DataSource
        );
        assert!("tenant".parse::<LockScope>().is_err());
    }
}
