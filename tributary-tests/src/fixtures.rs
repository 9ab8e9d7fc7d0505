//! Test data factories for Tributary types
//!
//! Provides pre-built test data with sensible defaults.

use chrono::{DateTime, Utc};
use tributary_core::{ScriptDescriptor, Watermarks};
use tributary_storage::{DataSourceModel, RunRepository};
use uuid::Uuid;

/// Data source fixture factories
pub mod data_source {
    use super::*;

    /// Enabled data source with an empty env
    pub fn for_tenant(tenant_id: &str, provider: &str) -> DataSourceModel {
        DataSourceModel::new(tenant_id, provider)
    }

    /// GitHub data source pointed at `api_url`
    pub fn github(tenant_id: &str, api_url: &str, repositories: &[&str]) -> DataSourceModel {
        DataSourceModel::new(tenant_id, "github")
            .with_env("GITHUB_TOKEN", "ghp_test_token")
            .with_env("GITHUB_OWNER", tenant_id)
            .with_env("GITHUB_API_URL", api_url)
            .with_env("GITHUB_REPOSITORIES", repositories.join(","))
    }

    /// One enabled data source per tenant, all on the same provider
    pub fn tenants(provider: &str, tenants: &[&str]) -> Vec<DataSourceModel> {
        tenants
            .iter()
            .map(|tenant| for_tenant(tenant, provider))
            .collect()
    }
}

/// Run row fixture factories
pub mod run {
    use super::*;

    /// Watermarks of a run that fetched `[earliest, last]`
    pub fn watermarks(last: DateTime<Utc>, earliest: DateTime<Utc>) -> Watermarks {
        Watermarks {
            last_fetched_at: Some(last),
            earliest_fetched_at: Some(earliest),
        }
    }

    /// Watermarks of a row written before backfill tracking existed
    pub fn legacy(last: DateTime<Utc>) -> Watermarks {
        Watermarks {
            last_fetched_at: Some(last),
            earliest_fetched_at: None,
        }
    }

    /// Claim and complete a run row so it carries `marks`
    pub async fn seed_completed(
        repository: &dyn RunRepository,
        data_source_id: Uuid,
        script_name: &str,
        marks: Watermarks,
    ) -> tributary_storage::Result<Uuid> {
        let run_id = repository
            .create_run(data_source_id, script_name, Uuid::now_v7())
            .await?
            .ok_or_else(|| {
                tributary_storage::Error::NotFound(format!("data source {}", data_source_id))
            })?;
        repository
            .complete_run(run_id, 0, marks.last_fetched_at, marks.earliest_fetched_at)
            .await?;
        Ok(run_id)
    }
}

/// Descriptor fixture factories
pub mod descriptor {
    use super::*;

    /// Descriptors where each resource depends on the one before it
    pub fn chain(provider: &str, resources: &[&str]) -> Vec<ScriptDescriptor> {
        let mut out: Vec<ScriptDescriptor> = Vec::with_capacity(resources.len());
        for (i, resource) in resources.iter().enumerate() {
            let mut d = ScriptDescriptor::new(provider, *resource);
            if i > 0 {
                d = d.depends_on(resources[i - 1]);
            }
            out.push(d);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_github_fixture_env() {
        let ds = data_source::github("acme", "http://127.0.0.1:1234", &["api", "web"]);
        assert_eq!(ds.provider, "github");
        assert_eq!(ds.env.0["GITHUB_REPOSITORIES"], "api,web");
        assert_eq!(ds.env.0["GITHUB_OWNER"], "acme");
    }

    #[test]
    fn test_chain() {
        let chain = descriptor::chain("p", &["a", "b", "c"]);
        assert!(chain[0].depends_on.is_empty());
        assert_eq!(chain[2].depends_on, vec!["b".to_string()]);
    }
}
