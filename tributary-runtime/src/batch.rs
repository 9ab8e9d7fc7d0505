//! Batch orchestration
//!
//! A batch is one sweep over every enabled data source. Each data source
//! gets its own dependency graph and runs independently of the others,
//! with at most `max_concurrent_graphs` graphs in flight. Only a failure
//! to read the catalog aborts a batch.

use crate::graph_runner::{
    ExecutionGraphRunner, GraphReport, ScriptFailure, ScriptJob, SharedErrors, SharedResults,
};
use crate::metrics::BATCH_DURATION;
use crate::script_executor::{ScriptOutcome, ScriptResult};
use crate::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn, Instrument};
use tributary_core::{DependencyGraph, ScriptRegistry, SyncTarget};
use tributary_storage::{DataSourceCatalog, DataSourceModel};
use uuid::Uuid;

/// Totals for one batch sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    /// Enabled data sources found in the catalog
    pub data_sources: usize,
    /// Data sources whose provider has no registered scripts
    pub data_sources_without_scripts: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub upstream_failed: usize,
    pub failed: usize,
    /// Graphs that errored before or while scheduling
    pub graph_errors: usize,
    pub records_imported: u64,
    pub failures: Vec<ScriptFailure>,
    /// Final state of every script that was scheduled, ordered by data
    /// source then resource
    pub scripts: Vec<ScriptStatus>,
    pub duration: Duration,
}

/// Final state of one script in one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptStatus {
    pub data_source_id: Uuid,
    /// `provider:resource`
    pub script: String,
    pub outcome: &'static str,
    pub records: u64,
    pub run_id: Option<Uuid>,
    /// Skip reason, failure message or the failed upstream
    pub detail: Option<String>,
}

impl From<&ScriptResult> for ScriptStatus {
    fn from(result: &ScriptResult) -> Self {
        let detail = match &result.outcome {
            ScriptOutcome::Succeeded { .. } => None,
            ScriptOutcome::Skipped { reason } => Some(reason.as_str().to_string()),
            ScriptOutcome::Failed { error } => Some(error.to_string()),
            ScriptOutcome::UpstreamFailed { upstream } => Some(upstream.to_string()),
        };
        Self {
            data_source_id: result.data_source_id,
            script: result.qualified_name.clone(),
            outcome: result.outcome.label(),
            records: result.outcome.records(),
            run_id: result.run_id,
            detail,
        }
    }
}

impl BatchSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.graph_errors > 0
    }

    fn absorb(&mut self, report: &GraphReport) {
        self.succeeded += report.succeeded;
        self.skipped += report.skipped;
        self.upstream_failed += report.upstream_failed;
        self.failed += report.failed;
        self.records_imported += report.records_imported;
    }
}

/// Top-level sweep over all enabled data sources
#[derive(Clone)]
pub struct BatchOrchestrator {
    catalog: Arc<dyn DataSourceCatalog>,
    registry: ScriptRegistry,
    runner: ExecutionGraphRunner,
    /// One permit per data-source graph in flight
    graph_slots: Arc<Semaphore>,
}

impl BatchOrchestrator {
    pub fn new(
        catalog: Arc<dyn DataSourceCatalog>,
        registry: ScriptRegistry,
        runner: ExecutionGraphRunner,
    ) -> Self {
        let slots = runner.executor().config().max_concurrent_graphs.max(1);
        Self {
            catalog,
            registry,
            runner,
            graph_slots: Arc::new(Semaphore::new(slots)),
        }
    }

    pub fn registry(&self) -> &ScriptRegistry {
        &self.registry
    }

    /// Run one sweep and return its totals.
    ///
    /// Returns an error only when the catalog cannot be read.
    #[instrument(name = "batch.run", skip(self), fields(batch_id = tracing::field::Empty))]
    pub async fn run_batch(&self) -> Result<BatchSummary> {
        let started = Instant::now();
        let batch_id = Uuid::now_v7();
        tracing::Span::current().record("batch_id", tracing::field::display(batch_id));

        let data_sources = self.catalog.enabled_data_sources().await.map_err(|e| {
            error!(error = %e, "Failed to load data sources, aborting batch");
            crate::Error::Storage(e)
        })?;

        let mut summary = BatchSummary {
            batch_id,
            data_sources: data_sources.len(),
            ..BatchSummary::default()
        };

        let mut by_tenant: BTreeMap<String, Vec<DataSourceModel>> = BTreeMap::new();
        for ds in data_sources {
            by_tenant.entry(ds.tenant_id.clone()).or_default().push(ds);
        }
        info!(
            data_sources = summary.data_sources,
            tenants = by_tenant.len(),
            "Starting batch"
        );

        let results = SharedResults::default();
        let errors = SharedErrors::default();
        let mut graphs = JoinSet::new();

        for (tenant, sources) in by_tenant {
            for ds in sources {
                let scripts = self.registry.scripts_for(&ds.provider);
                if scripts.is_empty() {
                    warn!(
                        tenant_id = %tenant,
                        data_source_id = %ds.id,
                        provider = %ds.provider,
                        "No scripts registered for provider"
                    );
                    summary.data_sources_without_scripts += 1;
                    continue;
                }

                let target = SyncTarget {
                    tenant_id: ds.tenant_id.clone(),
                    data_source_id: ds.id,
                    provider: ds.provider.clone(),
                    env: ds.env.0.clone(),
                    batch_id,
                };
                let jobs: Vec<ScriptJob> = scripts
                    .into_iter()
                    .map(|script| ScriptJob::new(script, target.clone()))
                    .collect();

                let runner = self.runner.clone();
                let slots = self.graph_slots.clone();
                let results = results.clone();
                let errors = errors.clone();
                let span = tracing::info_span!(
                    "graph",
                    tenant_id = %tenant,
                    data_source_id = %ds.id,
                    provider = %ds.provider
                );

                graphs.spawn(
                    async move {
                        let _permit = slots.acquire_owned().await.map_err(|_| {
                            crate::Error::Internal("graph slots closed".to_string())
                        })?;
                        let descriptors: Vec<_> = jobs
                            .iter()
                            .map(|j| j.script.descriptor().clone())
                            .collect();
                        let graph = DependencyGraph::build(&descriptors);
                        runner.run(&jobs, &graph, &results, &errors).await
                    }
                    .instrument(span),
                );
            }
        }

        while let Some(joined) = graphs.join_next().await {
            match joined {
                Ok(Ok(report)) => summary.absorb(&report),
                Ok(Err(e)) => {
                    error!(error = %e, "Data source graph failed");
                    summary.graph_errors += 1;
                }
                Err(e) => {
                    error!(error = %e, "Data source graph task aborted");
                    summary.graph_errors += 1;
                }
            }
        }

        summary.failures = errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        summary.scripts = results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(ScriptStatus::from)
            .collect();
        summary.duration = started.elapsed();
        BATCH_DURATION.observe(summary.duration.as_secs_f64());

        info!(
            batch_id = %summary.batch_id,
            data_sources = summary.data_sources,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            upstream_failed = summary.upstream_failed,
            failed = summary.failed,
            graph_errors = summary.graph_errors,
            records = summary.records_imported,
            duration_ms = summary.duration.as_millis() as u64,
            "Batch finished"
        );
        Ok(summary)
    }

    /// Run a batch every `interval` until `shutdown` resolves.
    ///
    /// A batch in progress is allowed to finish. Fatal batch errors are
    /// logged and retried on the next tick.
    pub async fn run_forever<F>(&self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_secs = interval.as_secs(), "Polling loop started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping polling loop");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_batch().await {
                        Ok(summary) if summary.has_failures() => {
                            warn!(
                                batch_id = %summary.batch_id,
                                failed = summary.failed,
                                graph_errors = summary.graph_errors,
                                "Batch finished with failures"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Batch aborted, retrying next tick"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::run_tracker::RunTracker;
    use crate::script_executor::ScriptExecutor;
    use async_trait::async_trait;
    use tributary_core::{
        ExecutionContext, ManualClock, RecordSink, ScriptDescriptor, ScriptError, SyncScript,
    };
    use tributary_storage::{InMemoryAdvisoryLocks, InMemoryStorage};

    struct Noop(ScriptDescriptor);

    #[async_trait]
    impl SyncScript for Noop {
        fn descriptor(&self) -> &ScriptDescriptor {
            &self.0
        }

        async fn run(
            &self,
            _sink: &dyn RecordSink,
            _ctx: &ExecutionContext,
        ) -> std::result::Result<u64, ScriptError> {
            Ok(3)
        }
    }

    struct BrokenCatalog;

    #[async_trait]
    impl DataSourceCatalog for BrokenCatalog {
        async fn enabled_data_sources(&self) -> tributary_storage::Result<Vec<DataSourceModel>> {
            Err(tributary_storage::Error::ConnectionFailed(
                "connection refused".to_string(),
            ))
        }
    }

    fn registry() -> ScriptRegistry {
        let registry = ScriptRegistry::new();
        registry
            .register_scripts(
                "github",
                vec![
                    Arc::new(Noop(ScriptDescriptor::new("github", "repository"))),
                    Arc::new(Noop(
                        ScriptDescriptor::new("github", "commit").depends_on("repository"),
                    )),
                ],
            )
            .unwrap();
        registry
    }

    fn orchestrator(
        storage: Arc<InMemoryStorage>,
        catalog: Arc<dyn DataSourceCatalog>,
    ) -> BatchOrchestrator {
        // Data-source scoped keys so tenants do not contend with each other.
        let config = RuntimeConfig {
            lock_scope: crate::LockScope::DataSource,
            ..RuntimeConfig::default()
        };
        let executor = ScriptExecutor::new(
            Arc::new(InMemoryAdvisoryLocks::new()),
            RunTracker::new(storage.clone()),
            storage,
            Arc::new(ManualClock::default()),
            config,
        );
        BatchOrchestrator::new(catalog, registry(), ExecutionGraphRunner::new(executor))
    }

    #[tokio::test]
    async fn test_batch_runs_every_enabled_source() {
        let sources = vec![
            DataSourceModel::new("acme", "github"),
            DataSourceModel::new("globex", "github"),
            DataSourceModel::new("globex", "jira"),
            DataSourceModel::new("initech", "github").disabled(),
        ];
        let storage = Arc::new(InMemoryStorage::with_data_sources(sources.clone()));
        let batch = orchestrator(storage.clone(), storage.clone());

        let summary = batch.run_batch().await.unwrap();

        assert_eq!(summary.data_sources, 3);
        assert_eq!(summary.data_sources_without_scripts, 1);
        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.records_imported, 12);
        assert!(!summary.has_failures());

        let run = storage.run_for(sources[0].id, "github:commit").unwrap();
        assert_eq!(run.batch_id, summary.batch_id);

        assert_eq!(summary.scripts.len(), 4);
        assert!(summary.scripts.iter().all(|s| s.outcome == "succeeded"));
        let commit = summary
            .scripts
            .iter()
            .find(|s| s.data_source_id == sources[0].id && s.script == "github:commit")
            .unwrap();
        assert_eq!(commit.run_id, Some(run.id));
        assert_eq!(commit.records, 3);
        assert!(storage.run_for(sources[3].id, "github:commit").is_none());
    }

    #[tokio::test]
    async fn test_catalog_failure_is_fatal() {
        let storage = Arc::new(InMemoryStorage::new());
        let batch = orchestrator(storage, Arc::new(BrokenCatalog));

        let err = batch.run_batch().await.unwrap_err();
        assert!(matches!(err, crate::Error::Storage(_)));
    }

    #[tokio::test]
    async fn test_batches_get_distinct_ids() {
        let storage = Arc::new(InMemoryStorage::new());
        let batch = orchestrator(storage.clone(), storage);

        let first = batch.run_batch().await.unwrap();
        let second = batch.run_batch().await.unwrap();
        assert_ne!(first.batch_id, second.batch_id);
        assert_eq!(first.data_sources, 0);
    }

    #[tokio::test]
    async fn test_run_forever_stops_on_shutdown() {
        let storage = Arc::new(InMemoryStorage::new());
        let batch = orchestrator(storage.clone(), storage);

        let stopped = tokio::time::timeout(
            Duration::from_secs(5),
            batch.run_forever(Duration::from_millis(10), tokio::time::sleep(Duration::from_millis(50))),
        )
        .await;
        assert!(stopped.is_ok());
    }
}
