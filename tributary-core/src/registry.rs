//! Script registry
//!
//! Compiled-in catalog of connector scripts, grouped by provider. Providers
//! are registered once at startup; lookups return shared handles so that
//! every tenant graph in a batch runs the same script instances.

use crate::script::{ScriptDescriptor, ScriptId, SyncScript};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors that can occur in the registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Provider already registered: {0}")]
    ProviderAlreadyExists(String),

    #[error("Script already registered: {0}")]
    ScriptAlreadyExists(String),

    #[error("Script {script} declares provider {declared}, expected {expected}")]
    ProviderMismatch {
        script: String,
        declared: String,
        expected: String,
    },

    #[error("Registry lock poisoned")]
    LockPoisoned,
}

/// Capability interface implemented by each compiled-in connector family
pub trait Provider: Send + Sync {
    /// Provider name matched against a data source's `provider` column
    fn name(&self) -> &str;

    /// Scripts this provider offers, in the order they should be resolved
    fn scripts(&self) -> Vec<Arc<dyn SyncScript>>;
}

/// Registry of scripts keyed by provider name.
/// Uses blocking locks; do not hold a guard across an await point.
#[derive(Clone, Default)]
pub struct ScriptRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    /// Provider names in registration order
    providers: Vec<String>,
    scripts_by_provider: HashMap<String, Vec<Arc<dyn SyncScript>>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every script a provider offers
    pub fn register_provider(&self, provider: &dyn Provider) -> Result<(), RegistryError> {
        self.register_scripts(provider.name(), provider.scripts())
    }

    /// Register a list of scripts under a provider name.
    ///
    /// All scripts are validated before any is registered.
    pub fn register_scripts(
        &self,
        provider: &str,
        scripts: Vec<Arc<dyn SyncScript>>,
    ) -> Result<(), RegistryError> {
        let mut inner = self.write()?;

        if inner.scripts_by_provider.contains_key(provider) {
            return Err(RegistryError::ProviderAlreadyExists(provider.to_string()));
        }

        let mut seen: HashSet<ScriptId> = HashSet::new();
        for script in &scripts {
            let descriptor = script.descriptor();
            if descriptor.provider != provider {
                return Err(RegistryError::ProviderMismatch {
                    script: descriptor.id().to_string(),
                    declared: descriptor.provider.clone(),
                    expected: provider.to_string(),
                });
            }
            if !seen.insert(descriptor.id()) {
                return Err(RegistryError::ScriptAlreadyExists(descriptor.id().to_string()));
            }
        }

        inner.providers.push(provider.to_string());
        inner
            .scripts_by_provider
            .insert(provider.to_string(), scripts);

        Ok(())
    }

    /// Scripts registered for a provider, in registration order
    pub fn scripts_for(&self, provider: &str) -> Vec<Arc<dyn SyncScript>> {
        self.read()
            .ok()
            .and_then(|inner| inner.scripts_by_provider.get(provider).cloned())
            .unwrap_or_default()
    }

    /// Descriptors registered for a provider, in registration order
    pub fn descriptors_for(&self, provider: &str) -> Vec<ScriptDescriptor> {
        self.scripts_for(provider)
            .iter()
            .map(|s| s.descriptor().clone())
            .collect()
    }

    /// Registered provider names, in registration order
    pub fn providers(&self) -> Vec<String> {
        self.read()
            .map(|inner| inner.providers.clone())
            .unwrap_or_default()
    }

    pub fn contains_provider(&self, provider: &str) -> bool {
        self.read()
            .map(|inner| inner.scripts_by_provider.contains_key(provider))
            .unwrap_or(false)
    }

    /// Total number of registered scripts across all providers
    pub fn count(&self) -> usize {
        self.read()
            .map(|inner| inner.scripts_by_provider.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, RegistryInner>, RegistryError> {
        self.inner.read().map_err(|_| RegistryError::LockPoisoned)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, RegistryInner>, RegistryError> {
        self.inner.write().map_err(|_| RegistryError::LockPoisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::script::ScriptError;
    use crate::sink::RecordSink;
    use async_trait::async_trait;

    struct NoopScript(ScriptDescriptor);

    #[async_trait]
    impl SyncScript for NoopScript {
        fn descriptor(&self) -> &ScriptDescriptor {
            &self.0
        }

        async fn run(
            &self,
            _sink: &dyn RecordSink,
            _ctx: &ExecutionContext,
        ) -> Result<u64, ScriptError> {
            Ok(0)
        }
    }

    struct TestProvider;

    impl Provider for TestProvider {
        fn name(&self) -> &str {
            "github"
        }

        fn scripts(&self) -> Vec<Arc<dyn SyncScript>> {
            vec![
                Arc::new(NoopScript(ScriptDescriptor::new("github", "repository"))),
                Arc::new(NoopScript(
                    ScriptDescriptor::new("github", "commit").depends_on("repository"),
                )),
            ]
        }
    }

    fn noop(provider: &str, resource: &str) -> Arc<dyn SyncScript> {
        Arc::new(NoopScript(ScriptDescriptor::new(provider, resource)))
    }

    #[test]
    fn test_register_provider() {
        let registry = ScriptRegistry::new();
        registry.register_provider(&TestProvider).unwrap();

        assert_eq!(registry.providers(), vec!["github"]);
        assert_eq!(registry.count(), 2);
        let resources: Vec<_> = registry
            .descriptors_for("github")
            .into_iter()
            .map(|d| d.resource)
            .collect();
        assert_eq!(resources, vec!["repository", "commit"]);
    }

    #[test]
    fn test_unknown_provider_has_no_scripts() {
        let registry = ScriptRegistry::new();
        assert!(registry.scripts_for("jira").is_empty());
        assert!(!registry.contains_provider("jira"));
    }

    #[test]
    fn test_duplicate_provider_rejected() {
        let registry = ScriptRegistry::new();
        registry.register_provider(&TestProvider).unwrap();
        let err = registry.register_provider(&TestProvider).unwrap_err();
        assert!(matches!(err, RegistryError::ProviderAlreadyExists(_)));
    }

    #[test]
    fn test_duplicate_script_rejects_whole_batch() {
        let registry = ScriptRegistry::new();
        let result = registry.register_scripts(
            "github",
            vec![noop("github", "commit"), noop("github", "commit")],
        );
        assert!(matches!(result, Err(RegistryError::ScriptAlreadyExists(_))));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_provider_mismatch_rejected() {
        let registry = ScriptRegistry::new();
        let result = registry.register_scripts("github", vec![noop("gitlab", "commit")]);
        assert!(matches!(result, Err(RegistryError::ProviderMismatch { .. })));
    }

    #[test]
    fn test_concurrent_reads() {
        use std::thread;

        let registry = ScriptRegistry::new();
        registry.register_provider(&TestProvider).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = registry.clone();
                thread::spawn(move || reg.scripts_for("github").len())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 2);
        }
    }
}
