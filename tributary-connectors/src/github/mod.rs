//! GitHub provider
//!
//! Three scripts per data source:
//! - `github:repository` snapshots repository metadata
//! - `github:commit` pages commits by committer date
//! - `github:issue` pages issues (and pull requests) by update time
//!
//! Commits and issues depend on `repository` so a data source whose
//! repositories cannot be read never spends API quota on history.

pub mod client;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};
use tributary_core::{
    ExecutionContext, Provider, RecordSink, ScriptDescriptor, ScriptError, Segment, SyncScript,
    SyncedRecord,
};

pub use client::{GithubClient, GithubConfig};
use client::timestamp;

pub const PROVIDER: &str = "github";

pub struct GithubProvider {
    client: GithubClient,
}

impl GithubProvider {
    pub fn new() -> reqwest::Result<Self> {
        Ok(Self {
            client: GithubClient::new()?,
        })
    }
}

impl Provider for GithubProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn scripts(&self) -> Vec<Arc<dyn SyncScript>> {
        vec![
            Arc::new(RepositoryScript::new(self.client.clone())),
            Arc::new(CommitScript::new(self.client.clone())),
            Arc::new(IssueScript::new(self.client.clone())),
        ]
    }
}

#[derive(Debug, Deserialize)]
struct Repository {
    full_name: String,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Commit {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    committer: Option<Signature>,
}

#[derive(Debug, Deserialize)]
struct Signature {
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Issue {
    number: u64,
    updated_at: DateTime<Utc>,
}

/// Decode the typed fields we key on while keeping the raw payload
fn decode<T: for<'de> Deserialize<'de>>(raw: &serde_json::Value) -> Result<T, ScriptError> {
    T::deserialize(raw).map_err(|e| ScriptError::Decode(e.to_string()))
}

/// Repository metadata snapshot
pub struct RepositoryScript {
    descriptor: ScriptDescriptor,
    client: GithubClient,
}

impl RepositoryScript {
    pub fn new(client: GithubClient) -> Self {
        Self {
            descriptor: ScriptDescriptor::new(PROVIDER, "repository")
                .with_retention(Duration::days(3650)),
            client,
        }
    }
}

#[async_trait]
impl SyncScript for RepositoryScript {
    fn descriptor(&self) -> &ScriptDescriptor {
        &self.descriptor
    }

    #[instrument(name = "github.repository", skip_all, fields(segment = ctx.segment.as_str()))]
    async fn run(&self, sink: &dyn RecordSink, ctx: &ExecutionContext) -> Result<u64, ScriptError> {
        // A snapshot has no history to walk back through.
        if ctx.segment == Segment::Backfill {
            return Ok(0);
        }

        let config = GithubConfig::from_context(ctx)?;
        let mut records = Vec::with_capacity(config.repositories.len());
        for repo in &config.repositories {
            let path = format!("/repos/{}/{}", config.owner, repo);
            let raw: serde_json::Value = self.client.get_json(&config, &path, &[]).await?;
            let parsed: Repository = decode(&raw)?;

            let mut record = SyncedRecord::new(parsed.full_name, raw);
            if let Some(updated_at) = parsed.updated_at {
                record = record.occurred_at(updated_at);
            }
            records.push(record);
        }

        let written = sink
            .upsert_records(ctx.data_source_id(), &self.descriptor.resource, records)
            .await?;
        debug!(written, "Upserted repositories");
        Ok(written)
    }
}

/// Commits committed inside the window
pub struct CommitScript {
    descriptor: ScriptDescriptor,
    client: GithubClient,
}

impl CommitScript {
    pub fn new(client: GithubClient) -> Self {
        Self {
            descriptor: ScriptDescriptor::new(PROVIDER, "commit")
                .depends_on("repository")
                .with_retention(Duration::days(365)),
            client,
        }
    }
}

#[async_trait]
impl SyncScript for CommitScript {
    fn descriptor(&self) -> &ScriptDescriptor {
        &self.descriptor
    }

    #[instrument(name = "github.commit", skip_all, fields(segment = ctx.segment.as_str()))]
    async fn run(&self, sink: &dyn RecordSink, ctx: &ExecutionContext) -> Result<u64, ScriptError> {
        let config = GithubConfig::from_context(ctx)?;
        let query = [
            ("since", timestamp(ctx.start_date)),
            ("until", timestamp(ctx.end_date)),
        ];

        let mut total = 0;
        for repo in &config.repositories {
            let path = format!("/repos/{}/{}/commits", config.owner, repo);
            let page: Vec<serde_json::Value> =
                self.client.get_paged(&config, &path, &query).await?;

            let mut records = Vec::with_capacity(page.len());
            for raw in page {
                let parsed: Commit = decode(&raw)?;
                let mut record = SyncedRecord::new(format!("{}@{}", repo, parsed.sha), raw);
                if let Some(date) = parsed.commit.committer.and_then(|c| c.date) {
                    record = record.occurred_at(date);
                }
                records.push(record);
            }

            if !records.is_empty() {
                total += sink
                    .upsert_records(ctx.data_source_id(), &self.descriptor.resource, records)
                    .await?;
            }
        }

        debug!(written = total, "Upserted commits");
        Ok(total)
    }
}

/// Issues and pull requests updated inside the window
pub struct IssueScript {
    descriptor: ScriptDescriptor,
    client: GithubClient,
}

impl IssueScript {
    pub fn new(client: GithubClient) -> Self {
        Self {
            descriptor: ScriptDescriptor::new(PROVIDER, "issue")
                .depends_on("repository")
                .with_retention(Duration::days(365)),
            client,
        }
    }
}

#[async_trait]
impl SyncScript for IssueScript {
    fn descriptor(&self) -> &ScriptDescriptor {
        &self.descriptor
    }

    #[instrument(name = "github.issue", skip_all, fields(segment = ctx.segment.as_str()))]
    async fn run(&self, sink: &dyn RecordSink, ctx: &ExecutionContext) -> Result<u64, ScriptError> {
        let config = GithubConfig::from_context(ctx)?;
        // The issues endpoint has no upper bound; `until` is applied locally.
        let query = [
            ("since", timestamp(ctx.start_date)),
            ("state", "all".to_string()),
            ("sort", "updated".to_string()),
            ("direction", "asc".to_string()),
        ];

        let mut total = 0;
        for repo in &config.repositories {
            let path = format!("/repos/{}/{}/issues", config.owner, repo);
            let page: Vec<serde_json::Value> =
                self.client.get_paged(&config, &path, &query).await?;

            let mut records = Vec::with_capacity(page.len());
            for raw in page {
                let parsed: Issue = decode(&raw)?;
                if parsed.updated_at > ctx.end_date {
                    continue;
                }
                records.push(
                    SyncedRecord::new(format!("{}#{}", repo, parsed.number), raw)
                        .occurred_at(parsed.updated_at),
                );
            }

            if !records.is_empty() {
                total += sink
                    .upsert_records(ctx.data_source_id(), &self.descriptor.resource, records)
                    .await?;
            }
        }

        debug!(written = total, "Upserted issues");
        Ok(total)
    }
}
