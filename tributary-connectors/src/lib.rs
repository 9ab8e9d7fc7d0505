//! # Tributary Connectors
//!
//! Providers compiled into the orchestrator binary. Each provider exposes
//! a fixed set of [`SyncScript`](tributary_core::SyncScript)s that land
//! their records through the sink handed to them at invocation time.

pub mod github;

use std::sync::Arc;
use tributary_core::{Provider, ScriptRegistry};

pub use github::GithubProvider;

/// Result type for connector setup
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while constructing providers
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Registry error: {0}")]
    Registry(#[from] tributary_core::RegistryError),
}

/// Every provider shipped with this build
pub fn builtin_providers() -> Result<Vec<Arc<dyn Provider>>> {
    Ok(vec![Arc::new(GithubProvider::new()?)])
}

/// Build a registry holding all built-in providers
pub fn builtin_registry() -> Result<ScriptRegistry> {
    let registry = ScriptRegistry::new();
    for provider in builtin_providers()? {
        registry.register_provider(provider.as_ref())?;
        tracing::debug!(provider = provider.name(), "Registered provider");
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tributary_core::DependencyGraph;

    #[test]
    fn test_builtin_registry_resolves_github_graph() {
        let registry = builtin_registry().unwrap();
        assert_eq!(registry.providers(), vec!["github".to_string()]);
        assert_eq!(registry.count(), 3);

        let graph = DependencyGraph::build(&registry.descriptors_for("github"));
        graph.ensure_acyclic().unwrap();
        let order = graph.topological_order().unwrap();
        assert_eq!(order[0].as_str(), "github:repository");
    }
}
