//! Mock implementations for connectors, locks and external APIs
//!
//! Provides programmable stand-ins so that orchestrator behavior can be
//! tested without real providers or a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tributary_core::{
    ExecutionContext, RecordSink, ScriptDescriptor, ScriptError, Segment, SyncScript,
    SyncedRecord,
};
use tributary_storage::{AdvisoryLockManager, InMemoryAdvisoryLocks};
use uuid::Uuid;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// One connector invocation as seen by a [`ScriptedConnector`]
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub script: String,
    pub data_source_id: Uuid,
    pub segment: Segment,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Invocation log shared between connectors to check ordering
pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// What a [`ScriptedConnector`] does when invoked
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Write this many synthetic records per invocation
    Succeed { records: u64 },
    /// Fail every invocation
    Fail(ScriptError),
    /// Fail only the given segment
    FailOn(Segment, ScriptError),
    Panic,
    /// Never return
    Hang,
}

/// Connector with programmable outcomes and a call log
///
/// # Example
///
/// ```ignore
/// let commits = Arc::new(
///     ScriptedConnector::new("github", "commit")
///         .depends_on("repository")
///         .failing(ScriptError::Http("reset".into())),
/// );
/// ```
pub struct ScriptedConnector {
    descriptor: ScriptDescriptor,
    behavior: Mutex<Behavior>,
    log: CallLog,
}

impl ScriptedConnector {
    pub fn new(provider: &str, resource: &str) -> Self {
        Self::from_descriptor(ScriptDescriptor::new(provider, resource))
    }

    pub fn from_descriptor(descriptor: ScriptDescriptor) -> Self {
        Self {
            descriptor,
            behavior: Mutex::new(Behavior::Succeed { records: 1 }),
            log: CallLog::default(),
        }
    }

    pub fn depends_on(mut self, dependency: &str) -> Self {
        self.descriptor = self.descriptor.depends_on(dependency);
        self
    }

    pub fn with_retention(mut self, retention: chrono::Duration) -> Self {
        self.descriptor = self.descriptor.with_retention(retention);
        self
    }

    /// Record calls into a log shared with other connectors
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn returning(self, records: u64) -> Self {
        self.set_behavior(Behavior::Succeed { records });
        self
    }

    pub fn failing(self, error: ScriptError) -> Self {
        self.set_behavior(Behavior::Fail(error));
        self
    }

    pub fn failing_on(self, segment: Segment, error: ScriptError) -> Self {
        self.set_behavior(Behavior::FailOn(segment, error));
        self
    }

    pub fn panicking(self) -> Self {
        self.set_behavior(Behavior::Panic);
        self
    }

    pub fn hanging(self) -> Self {
        self.set_behavior(Behavior::Hang);
        self
    }

    /// Change behavior between batches
    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    /// Calls made to this connector, in order
    pub fn calls(&self) -> Vec<Call> {
        let script = self.descriptor.id().to_string();
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| c.script == script)
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }
}

#[async_trait]
impl SyncScript for ScriptedConnector {
    fn descriptor(&self) -> &ScriptDescriptor {
        &self.descriptor
    }

    async fn run(&self, sink: &dyn RecordSink, ctx: &ExecutionContext) -> Result<u64, ScriptError> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Call {
                script: self.descriptor.id().to_string(),
                data_source_id: ctx.data_source_id(),
                segment: ctx.segment,
                start: ctx.start_date,
                end: ctx.end_date,
            });

        let behavior = self
            .behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let records = match behavior {
            Behavior::Succeed { records } => records,
            Behavior::Fail(err) => return Err(err),
            Behavior::FailOn(segment, err) if segment == ctx.segment => return Err(err),
            Behavior::FailOn(..) => 1,
            Behavior::Panic => panic!("{} blew up", self.descriptor.id()),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                0
            }
        };

        let batch: Vec<SyncedRecord> = (0..records)
            .map(|i| {
                SyncedRecord::new(
                    format!("{}:{}:{}", ctx.segment.as_str(), ctx.start_date.timestamp(), i),
                    json!({ "index": i, "segment": ctx.segment.as_str() }),
                )
                .occurred_at(ctx.start_date)
            })
            .collect();
        if batch.is_empty() {
            return Ok(0);
        }
        Ok(sink
            .upsert_records(ctx.data_source_id(), &self.descriptor.resource, batch)
            .await?)
    }
}

/// Lock manager wrapper that counts calls and can simulate contention
pub struct CountingLocks {
    inner: Arc<dyn AdvisoryLockManager>,
    acquires: AtomicUsize,
    releases: AtomicUsize,
    denied: Mutex<HashSet<String>>,
    unavailable: AtomicBool,
}

impl CountingLocks {
    pub fn new(inner: Arc<dyn AdvisoryLockManager>) -> Self {
        Self {
            inner,
            acquires: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            denied: Mutex::new(HashSet::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryAdvisoryLocks::new()))
    }

    /// Pretend another worker holds `key`
    pub fn deny(&self, key: &str) {
        self.denied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
    }

    pub fn allow(&self, key: &str) {
        self.denied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Make every acquire fail with a connection error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn acquire_count(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdvisoryLockManager for CountingLocks {
    async fn try_acquire(&self, key: &str) -> tributary_storage::Result<bool> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(tributary_storage::Error::ConnectionFailed(
                "lock session lost".to_string(),
            ));
        }
        let denied = self
            .denied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key);
        if denied {
            return Ok(false);
        }
        self.inner.try_acquire(key).await
    }

    async fn release(&self, key: &str) -> tributary_storage::Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.inner.release(key).await
    }
}

/// Fake GitHub REST API serving one repository
///
/// Serves a repository, two commits and one issue regardless of the
/// requested window.
pub struct MockGithubApi {
    server: MockServer,
    owner: String,
    repo: String,
}

impl MockGithubApi {
    pub async fn start(owner: &str, repo: &str) -> Self {
        Self::start_with_commit_status(owner, repo, 200).await
    }

    /// Start with the commits endpoint answering `status`
    pub async fn start_with_commit_status(owner: &str, repo: &str, status: u16) -> Self {
        let server = MockServer::start().await;
        let base = format!("/repos/{}/{}", owner, repo);

        Mock::given(method("GET"))
            .and(path(base.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 42,
                "full_name": format!("{}/{}", owner, repo),
                "updated_at": "2024-05-30T12:00:00Z"
            })))
            .mount(&server)
            .await;

        let commits = if status == 200 {
            ResponseTemplate::new(200).set_body_json(json!([
                { "sha": "a1", "commit": { "committer": { "date": "2024-05-29T08:00:00Z" } } },
                { "sha": "b2", "commit": { "committer": { "date": "2024-05-30T09:00:00Z" } } }
            ]))
        } else {
            ResponseTemplate::new(status).set_body_string("upstream unavailable")
        };
        Mock::given(method("GET"))
            .and(path(format!("{}/commits", base)))
            .respond_with(commits)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("{}/issues", base)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "number": 7, "title": "Flaky sync", "updated_at": "2024-05-30T10:00:00Z" }
            ])))
            .mount(&server)
            .await;

        Self {
            server,
            owner: owner.to_string(),
            repo: repo.to_string(),
        }
    }

    /// Base URL to use as `GITHUB_API_URL`
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Requests received under `/repos/{owner}/{repo}{suffix}`
    pub async fn requests_to(&self, suffix: &str) -> usize {
        let wanted = format!("/repos/{}/{}{}", self.owner, self.repo, suffix);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == wanted)
            .count()
    }
}
