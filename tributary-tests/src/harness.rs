//! In-memory orchestrator stack for end-to-end tests
//!
//! Wires the real runtime over [`InMemoryStorage`], a [`CountingLocks`]
//! manager and a [`ManualClock`] so batches are deterministic.

use crate::mocks::CountingLocks;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tributary_core::{
    DependencyGraph, ManualClock, RegistryError, ScriptRegistry, SyncScript, SyncTarget,
};
use tributary_runtime::{
    BatchOrchestrator, BatchSummary, ExecutionGraphRunner, GraphReport, RunTracker,
    RuntimeConfig, ScriptExecutor, ScriptJob, SharedErrors, SharedResults,
};
use tributary_storage::{DataSourceModel, InMemoryStorage};
use uuid::Uuid;

pub struct TestHarness {
    pub storage: Arc<InMemoryStorage>,
    pub locks: Arc<CountingLocks>,
    pub clock: Arc<ManualClock>,
    pub registry: ScriptRegistry,
    pub config: RuntimeConfig,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Fixed start instant so windows are reproducible
    pub fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            storage: Arc::new(InMemoryStorage::new()),
            locks: Arc::new(CountingLocks::in_memory()),
            clock: Arc::new(ManualClock::new(Self::epoch())),
            registry: ScriptRegistry::new(),
            config,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        use tributary_core::Clock;
        self.clock.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub fn add_data_source(&self, data_source: DataSourceModel) -> DataSourceModel {
        self.storage.upsert_data_source(data_source.clone());
        data_source
    }

    pub fn register(
        &self,
        provider: &str,
        scripts: Vec<Arc<dyn SyncScript>>,
    ) -> Result<(), RegistryError> {
        self.registry.register_scripts(provider, scripts)
    }

    pub fn executor(&self) -> ScriptExecutor {
        ScriptExecutor::new(
            self.locks.clone(),
            RunTracker::new(self.storage.clone()),
            self.storage.clone(),
            self.clock.clone(),
            self.config.clone(),
        )
    }

    pub fn orchestrator(&self) -> BatchOrchestrator {
        BatchOrchestrator::new(
            self.storage.clone(),
            self.registry.clone(),
            ExecutionGraphRunner::new(self.executor()),
        )
    }

    pub async fn run_batch(&self) -> tributary_runtime::Result<BatchSummary> {
        self.orchestrator().run_batch().await
    }

    /// Run one data source's graph directly, keeping the shared collections
    pub async fn run_graph(
        &self,
        data_source: &DataSourceModel,
        scripts: Vec<Arc<dyn SyncScript>>,
    ) -> (
        tributary_runtime::Result<GraphReport>,
        SharedResults,
        SharedErrors,
    ) {
        let target = SyncTarget {
            tenant_id: data_source.tenant_id.clone(),
            data_source_id: data_source.id,
            provider: data_source.provider.clone(),
            env: data_source.env.0.clone(),
            batch_id: Uuid::now_v7(),
        };
        let descriptors: Vec<_> = scripts.iter().map(|s| s.descriptor().clone()).collect();
        let graph = DependencyGraph::build(&descriptors);
        let jobs: Vec<ScriptJob> = scripts
            .into_iter()
            .map(|script| ScriptJob::new(script, target.clone()))
            .collect();

        let results = SharedResults::default();
        let errors = SharedErrors::default();
        let report = ExecutionGraphRunner::new(self.executor())
            .run(&jobs, &graph, &results, &errors)
            .await;
        (report, results, errors)
    }
}
