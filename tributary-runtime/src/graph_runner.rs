//! Execution graph runner
//!
//! Runs the scripts of one data source in dependency order. Scripts whose
//! prerequisites have all finished are started together and polled
//! cooperatively; a script whose prerequisite failed is recorded as
//! `UpstreamFailed` without being invoked.

use crate::script_executor::{ScriptExecutor, ScriptOutcome, ScriptResult};
use crate::metrics::SCRIPT_OUTCOMES_TOTAL;
use crate::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, instrument, warn};
use tributary_core::{DependencyGraph, ScriptId, SyncScript, SyncTarget};

/// Results keyed `data_source_id:resource`, shared with the caller
pub type SharedResults = Arc<Mutex<BTreeMap<String, ScriptResult>>>;

/// Script failures, shared with the caller
pub type SharedErrors = Arc<Mutex<Vec<ScriptFailure>>>;

/// One failed script as reported in batch summaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptFailure {
    /// `provider:resource`
    pub script: String,
    pub error: String,
}

/// A script paired with the data source it runs against
#[derive(Clone)]
pub struct ScriptJob {
    pub script: Arc<dyn SyncScript>,
    pub target: SyncTarget,
}

impl ScriptJob {
    pub fn new(script: Arc<dyn SyncScript>, target: SyncTarget) -> Self {
        Self { script, target }
    }
}

/// Per-outcome counts for one graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphReport {
    pub succeeded: usize,
    pub skipped: usize,
    pub upstream_failed: usize,
    pub failed: usize,
    pub records_imported: u64,
}

impl GraphReport {
    fn record(&mut self, outcome: &ScriptOutcome) {
        match outcome {
            ScriptOutcome::Succeeded { records } => {
                self.succeeded += 1;
                self.records_imported += records;
            }
            ScriptOutcome::Skipped { .. } => self.skipped += 1,
            ScriptOutcome::Failed { .. } => self.failed += 1,
            ScriptOutcome::UpstreamFailed { .. } => self.upstream_failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.upstream_failed + self.failed
    }
}

#[derive(Clone)]
pub struct ExecutionGraphRunner {
    executor: ScriptExecutor,
}

impl ExecutionGraphRunner {
    pub fn new(executor: ScriptExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &ScriptExecutor {
        &self.executor
    }

    /// Run one data source's graph to completion.
    ///
    /// Fails before starting anything if the graph has a cycle. Otherwise
    /// every script ends in exactly one outcome, written to `results` as
    /// soon as it is known.
    #[instrument(
        name = "graph.run",
        skip_all,
        fields(scripts = jobs.len())
    )]
    pub async fn run(
        &self,
        jobs: &[ScriptJob],
        graph: &DependencyGraph,
        results: &SharedResults,
        errors: &SharedErrors,
    ) -> Result<GraphReport> {
        graph.ensure_acyclic()?;

        let by_id: HashMap<ScriptId, &ScriptJob> = jobs
            .iter()
            .map(|job| (job.script.descriptor().id(), job))
            .collect();

        let mut pending: Vec<ScriptId> = graph
            .script_ids()
            .iter()
            .filter(|id| by_id.contains_key(*id))
            .cloned()
            .collect();
        let mut finished: HashMap<ScriptId, ScriptOutcome> = HashMap::new();
        let mut running = FuturesUnordered::new();
        let mut report = GraphReport::default();

        loop {
            // Start everything whose prerequisites are done. Recording an
            // upstream failure can unblock further nodes, so rescan until
            // nothing changes.
            let mut progressed = true;
            while progressed {
                progressed = false;
                let mut still_pending = Vec::with_capacity(pending.len());

                for id in pending.drain(..) {
                    let prerequisites = graph.prerequisites(&id);
                    if !prerequisites.iter().all(|p| finished.contains_key(p)) {
                        still_pending.push(id);
                        continue;
                    }
                    progressed = true;

                    let blocked_by = prerequisites
                        .iter()
                        .find(|p| {
                            finished
                                .get(*p)
                                .map(ScriptOutcome::blocks_dependents)
                                .unwrap_or(false)
                        })
                        .cloned();

                    let Some(job) = by_id.get(&id).copied() else {
                        continue;
                    };
                    match blocked_by {
                        Some(upstream) => {
                            let result = upstream_failed(job, upstream);
                            finished.insert(id, result.outcome.clone());
                            self.record(result, results, errors, &mut report);
                        }
                        None => {
                            running.push(async move {
                                self.executor.execute(job.script.as_ref(), &job.target).await
                            });
                        }
                    }
                }
                pending = still_pending;
            }

            let Some(result) = running.next().await else {
                break;
            };
            finished.insert(result.script_id.clone(), result.outcome.clone());
            self.record(result, results, errors, &mut report);
        }

        if !pending.is_empty() {
            // Unreachable for an acyclic graph built from these jobs.
            warn!(pending = pending.len(), "Scripts left unscheduled");
            return Err(crate::Error::InvalidState(format!(
                "{} scripts could not be scheduled",
                pending.len()
            )));
        }

        info!(
            succeeded = report.succeeded,
            skipped = report.skipped,
            upstream_failed = report.upstream_failed,
            failed = report.failed,
            records = report.records_imported,
            "Graph finished"
        );
        Ok(report)
    }

    fn record(
        &self,
        result: ScriptResult,
        results: &SharedResults,
        errors: &SharedErrors,
        report: &mut GraphReport,
    ) {
        report.record(&result.outcome);

        if let ScriptOutcome::Failed { error } = &result.outcome {
            errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(ScriptFailure {
                    script: result.qualified_name.clone(),
                    error: error.to_string(),
                });
        }

        results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(result.result_key(), result);
    }
}

fn upstream_failed(job: &ScriptJob, upstream: ScriptId) -> ScriptResult {
    let descriptor = job.script.descriptor();
    info!(
        script = %descriptor.id(),
        upstream = %upstream,
        "Prerequisite failed, not running"
    );
    SCRIPT_OUTCOMES_TOTAL
        .with_label_values(&["upstream_failed"])
        .inc();

    ScriptResult {
        script_id: descriptor.id(),
        qualified_name: descriptor.qualified_name(),
        resource: descriptor.resource.clone(),
        data_source_id: job.target.data_source_id,
        run_id: None,
        plan: None,
        outcome: ScriptOutcome::UpstreamFailed { upstream },
        duration: Duration::ZERO,
    }
}
