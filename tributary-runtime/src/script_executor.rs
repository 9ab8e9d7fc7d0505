//! Per-script unit of work
//!
//! One attempt walks `Pending → LockHeld → RangesComputed → Running →
//! Completed | Failed → LockReleased`, or ends `Skipped`. Side effects are
//! strictly ordered: lock, run claim, connector calls, run completion or
//! failure, lock release. The lock is released on every path that took it.
//!
//! Connector errors never escape this module; they become a
//! [`ScriptOutcome`].

use crate::config::RuntimeConfig;
use crate::date_range::DateRangeCalculator;
use crate::metrics::{
    LOCK_CONTENTION_TOTAL, RECORDS_IMPORTED_TOTAL, SCRIPT_DURATION, SCRIPT_OUTCOMES_TOTAL,
};
use crate::run_tracker::RunTracker;
use crate::state_machine::{ScriptState, ScriptStateMachine};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use tributary_core::{
    Clock, ExecutionContext, RecordSink, ScriptError, ScriptId, Segment, SyncScript, SyncTarget,
    WindowPlan,
};
use tributary_storage::AdvisoryLockManager;
use uuid::Uuid;

/// Why an attempt did no work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Another worker holds the advisory lock
    LockContended,
    /// The lock manager itself failed
    LockUnavailable(String),
    /// The run row could not be claimed
    RunNotClaimed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::LockContended => "lock_contended",
            SkipReason::LockUnavailable(_) => "lock_unavailable",
            SkipReason::RunNotClaimed => "run_not_claimed",
        }
    }
}

/// Why a claimed run failed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FailureCause {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("Run tracking failed: {0}")]
    Store(String),

    /// A panic outside the connector call (tracker, planner or store)
    #[error("Attempt panicked: {0}")]
    Internal(String),
}

/// Terminal outcome of one script in one batch
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOutcome {
    Succeeded { records: u64 },
    Skipped { reason: SkipReason },
    Failed { error: FailureCause },
    /// Not executed because a prerequisite failed
    UpstreamFailed { upstream: ScriptId },
}

impl ScriptOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ScriptOutcome::Succeeded { .. } => "succeeded",
            ScriptOutcome::Skipped { .. } => "skipped",
            ScriptOutcome::Failed { .. } => "failed",
            ScriptOutcome::UpstreamFailed { .. } => "upstream_failed",
        }
    }

    /// Dependents of this outcome must not run
    pub fn blocks_dependents(&self) -> bool {
        matches!(
            self,
            ScriptOutcome::Failed { .. } | ScriptOutcome::UpstreamFailed { .. }
        )
    }

    pub fn records(&self) -> u64 {
        match self {
            ScriptOutcome::Succeeded { records } => *records,
            _ => 0,
        }
    }
}

/// Everything known about one script attempt
#[derive(Debug, Clone)]
pub struct ScriptResult {
    pub script_id: ScriptId,
    /// `provider:resource`
    pub qualified_name: String,
    pub resource: String,
    pub data_source_id: Uuid,
    pub run_id: Option<Uuid>,
    pub plan: Option<WindowPlan>,
    pub outcome: ScriptOutcome,
    pub duration: Duration,
}

impl ScriptResult {
    /// Key under which results are collected: `data_source_id:resource`
    pub fn result_key(&self) -> String {
        format!("{}:{}", self.data_source_id, self.resource)
    }
}

/// What happened while the lock was held
struct LockedAttempt {
    run_id: Option<Uuid>,
    plan: Option<WindowPlan>,
    outcome: ScriptOutcome,
}

/// Runs one script against one data source
#[derive(Clone)]
pub struct ScriptExecutor {
    locks: Arc<dyn AdvisoryLockManager>,
    tracker: RunTracker,
    calculator: DateRangeCalculator,
    sink: Arc<dyn RecordSink>,
    clock: Arc<dyn Clock>,
    config: RuntimeConfig,
}

impl ScriptExecutor {
    pub fn new(
        locks: Arc<dyn AdvisoryLockManager>,
        tracker: RunTracker,
        sink: Arc<dyn RecordSink>,
        clock: Arc<dyn Clock>,
        config: RuntimeConfig,
    ) -> Self {
        let calculator = DateRangeCalculator::new(tracker.clone(), config.window);
        Self {
            locks,
            tracker,
            calculator,
            sink,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn tracker(&self) -> &RunTracker {
        &self.tracker
    }

    /// Execute one attempt of `script` for `target`
    #[instrument(
        name = "script.execute",
        skip(self, script, target),
        fields(
            tenant_id = %target.tenant_id,
            data_source_id = %target.data_source_id,
            batch_id = %target.batch_id,
            script = %script.descriptor().id(),
        )
    )]
    pub async fn execute(&self, script: &dyn SyncScript, target: &SyncTarget) -> ScriptResult {
        let started = Instant::now();
        let descriptor = script.descriptor();
        let lock_key = self
            .config
            .lock_scope
            .lock_key(target.data_source_id, descriptor);
        let mut sm = ScriptStateMachine::new();

        let attempt = match self.locks.try_acquire(&lock_key).await {
            Ok(true) => {
                advance(&mut sm, ScriptState::LockHeld);
                let mut claimed = None;
                let locked =
                    AssertUnwindSafe(self.run_locked(script, target, &mut sm, &mut claimed))
                        .catch_unwind()
                        .await;
                let attempt = match locked {
                    Ok(attempt) => attempt,
                    Err(panic) => self.recover(claimed, &mut sm, panic).await,
                };

                if let Err(e) = self.locks.release(&lock_key).await {
                    warn!(lock_key = %lock_key, error = %e, "Failed to release advisory lock");
                }
                advance(&mut sm, ScriptState::LockReleased);
                attempt
            }
            Ok(false) => {
                LOCK_CONTENTION_TOTAL.inc();
                debug!(lock_key = %lock_key, "Lock held elsewhere, skipping");
                advance(&mut sm, ScriptState::Skipped);
                LockedAttempt {
                    run_id: None,
                    plan: None,
                    outcome: ScriptOutcome::Skipped {
                        reason: SkipReason::LockContended,
                    },
                }
            }
            Err(e) => {
                warn!(lock_key = %lock_key, error = %e, "Lock manager error, skipping");
                advance(&mut sm, ScriptState::Skipped);
                LockedAttempt {
                    run_id: None,
                    plan: None,
                    outcome: ScriptOutcome::Skipped {
                        reason: SkipReason::LockUnavailable(e.to_string()),
                    },
                }
            }
        };

        let result = ScriptResult {
            script_id: descriptor.id(),
            qualified_name: descriptor.qualified_name(),
            resource: descriptor.resource.clone(),
            data_source_id: target.data_source_id,
            run_id: attempt.run_id,
            plan: attempt.plan,
            outcome: attempt.outcome,
            duration: started.elapsed(),
        };
        record_metrics(&result, &descriptor.provider);
        debug!(states = %sm.trail(), outcome = result.outcome.label(), "Attempt finished");
        result
    }

    async fn run_locked(
        &self,
        script: &dyn SyncScript,
        target: &SyncTarget,
        sm: &mut ScriptStateMachine,
        claimed: &mut Option<Uuid>,
    ) -> LockedAttempt {
        let descriptor = script.descriptor();
        let script_name = descriptor.id();

        let run_id = match self
            .tracker
            .create_run(target.data_source_id, script_name.as_str(), target.batch_id)
            .await
        {
            Ok(Some(run_id)) => {
                *claimed = Some(run_id);
                run_id
            }
            Ok(None) => {
                info!("Run not claimable, data source disabled or removed");
                advance(sm, ScriptState::Skipped);
                return skipped_unclaimed();
            }
            Err(e) => {
                warn!(error = %e, "Failed to claim run, skipping");
                advance(sm, ScriptState::Skipped);
                return skipped_unclaimed();
            }
        };

        // Captured once so both windows agree on it.
        let now = self.clock.now();
        let plan = match self
            .calculator
            .calculate(
                target.data_source_id,
                script_name.as_str(),
                descriptor.retention_window,
                now,
            )
            .await
        {
            Ok(plan) => plan,
            Err(e) => {
                advance(sm, ScriptState::Failed);
                return self.fail(run_id, None, FailureCause::Store(e.to_string())).await;
            }
        };
        advance(sm, ScriptState::RangesComputed);
        advance(sm, ScriptState::Running);

        let mut total = 0u64;
        let segments = [
            (Segment::Forward, plan.forward),
            (Segment::Backfill, plan.backfill),
        ];
        for (segment, range) in segments {
            let Some(range) = range else { continue };
            let ctx = target.segment(run_id, segment, range.start, range.end);

            match self.invoke(script, &ctx).await {
                Ok(records) => {
                    debug!(
                        segment = segment.as_str(),
                        start = %range.start,
                        end = %range.end,
                        records,
                        "Segment finished"
                    );
                    total += records;
                }
                Err(err) => {
                    warn!(segment = segment.as_str(), error = %err, "Connector failed");
                    advance(sm, ScriptState::Failed);
                    return self.fail(run_id, Some(plan), FailureCause::Script(err)).await;
                }
            }
        }

        let new_last = plan.forward.map(|r| r.end);
        let new_earliest = plan.next_earliest();

        if let Err(e) = self
            .tracker
            .complete_run(run_id, total, new_last, new_earliest)
            .await
        {
            advance(sm, ScriptState::Failed);
            return self
                .fail(run_id, Some(plan), FailureCause::Store(e.to_string()))
                .await;
        }

        advance(sm, ScriptState::Completed);
        info!(
            run_id = %run_id,
            records = total,
            backfill_complete = plan.backfill_complete,
            "Script completed"
        );
        LockedAttempt {
            run_id: Some(run_id),
            plan: Some(plan),
            outcome: ScriptOutcome::Succeeded { records: total },
        }
    }

    async fn fail(
        &self,
        run_id: Uuid,
        plan: Option<WindowPlan>,
        cause: FailureCause,
    ) -> LockedAttempt {
        if let Err(e) = self.tracker.fail_run(run_id, &cause.to_string()).await {
            error!(run_id = %run_id, error = %e, "Failed to record run failure");
        }
        LockedAttempt {
            run_id: Some(run_id),
            plan,
            outcome: ScriptOutcome::Failed { error: cause },
        }
    }

    /// Turn a panic raised while the lock was held into a failed attempt
    async fn recover(
        &self,
        claimed: Option<Uuid>,
        sm: &mut ScriptStateMachine,
        panic: Box<dyn Any + Send>,
    ) -> LockedAttempt {
        let cause = FailureCause::Internal(panic_message(panic.as_ref()));
        error!(error = %cause, "Attempt panicked while holding the lock");
        if matches!(
            sm.current_state(),
            ScriptState::LockHeld | ScriptState::RangesComputed | ScriptState::Running
        ) {
            advance(sm, ScriptState::Failed);
        }

        let failed = LockedAttempt {
            run_id: claimed,
            plan: None,
            outcome: ScriptOutcome::Failed {
                error: cause.clone(),
            },
        };
        let Some(run_id) = claimed else {
            return failed;
        };
        // The store may be what panicked; recording the failure must not leak the lock.
        AssertUnwindSafe(self.fail(run_id, None, cause))
            .catch_unwind()
            .await
            .unwrap_or(failed)
    }

    /// One connector call, bounded by the invocation timeout, panics caught
    async fn invoke(
        &self,
        script: &dyn SyncScript,
        ctx: &ExecutionContext,
    ) -> Result<u64, ScriptError> {
        let call = AssertUnwindSafe(script.run(self.sink.as_ref(), ctx)).catch_unwind();

        let outcome = match self.config.invocation_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(ScriptError::Timeout(limit)),
            },
            None => call.await,
        };

        outcome.unwrap_or_else(|panic| Err(ScriptError::Panicked(panic_message(panic.as_ref()))))
    }
}

fn skipped_unclaimed() -> LockedAttempt {
    LockedAttempt {
        run_id: None,
        plan: None,
        outcome: ScriptOutcome::Skipped {
            reason: SkipReason::RunNotClaimed,
        },
    }
}

/// Apply a transition the executor's control flow guarantees is valid
fn advance(sm: &mut ScriptStateMachine, state: ScriptState) {
    if let Err(e) = sm.transition(state) {
        error!(error = %e, states = %sm.trail(), "Unexpected script state transition");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn record_metrics(result: &ScriptResult, provider: &str) {
    let label = result.outcome.label();
    SCRIPT_OUTCOMES_TOTAL.with_label_values(&[label]).inc();
    SCRIPT_DURATION
        .with_label_values(&[label])
        .observe(result.duration.as_secs_f64());

    let records = result.outcome.records();
    if records > 0 {
        RECORDS_IMPORTED_TOTAL
            .with_label_values(&[provider, result.resource.as_str()])
            .inc_by(records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tributary_core::{ManualClock, ScriptDescriptor};
    use tributary_core::Watermarks;
    use tributary_storage::{
        DataSourceModel, InMemoryAdvisoryLocks, InMemoryStorage, RunRepository, RunStatus,
        SyncRunModel,
    };

    enum Behavior {
        Records(u64),
        FailOn(Segment),
        Panic,
        Hang,
    }

    struct TestScript {
        descriptor: ScriptDescriptor,
        behavior: Behavior,
        calls: Mutex<Vec<(Segment, chrono::DateTime<Utc>, chrono::DateTime<Utc>)>>,
    }

    impl TestScript {
        fn new(behavior: Behavior) -> Self {
            Self {
                descriptor: ScriptDescriptor::new("github", "commit"),
                behavior,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(Segment, chrono::DateTime<Utc>, chrono::DateTime<Utc>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SyncScript for TestScript {
        fn descriptor(&self) -> &ScriptDescriptor {
            &self.descriptor
        }

        async fn run(
            &self,
            _sink: &dyn RecordSink,
            ctx: &ExecutionContext,
        ) -> Result<u64, ScriptError> {
            self.calls
                .lock()
                .unwrap()
                .push((ctx.segment, ctx.start_date, ctx.end_date));
            match &self.behavior {
                Behavior::Records(n) => Ok(*n),
                Behavior::FailOn(segment) if *segment == ctx.segment => Err(ScriptError::Api {
                    status: 502,
                    message: "bad gateway".to_string(),
                }),
                Behavior::FailOn(_) => Ok(1),
                Behavior::Panic => panic!("connector exploded"),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(0)
                }
            }
        }
    }

    /// Delegates to in-memory storage but panics when watermarks are read
    struct PanickingWatermarks(Arc<InMemoryStorage>);

    #[async_trait]
    impl RunRepository for PanickingWatermarks {
        async fn create_run(
            &self,
            data_source_id: Uuid,
            script_name: &str,
            batch_id: Uuid,
        ) -> tributary_storage::Result<Option<Uuid>> {
            self.0.create_run(data_source_id, script_name, batch_id).await
        }

        async fn complete_run(
            &self,
            run_id: Uuid,
            records_imported: u64,
            new_last_fetched_at: Option<chrono::DateTime<Utc>>,
            new_earliest_fetched_at: Option<chrono::DateTime<Utc>>,
        ) -> tributary_storage::Result<()> {
            self.0
                .complete_run(run_id, records_imported, new_last_fetched_at, new_earliest_fetched_at)
                .await
        }

        async fn fail_run(&self, run_id: Uuid, error_message: &str) -> tributary_storage::Result<()> {
            self.0.fail_run(run_id, error_message).await
        }

        async fn watermarks(
            &self,
            _data_source_id: Uuid,
            _script_name: &str,
        ) -> tributary_storage::Result<Option<Watermarks>> {
            panic!("watermark row corrupted")
        }

        async fn get_run(&self, run_id: Uuid) -> tributary_storage::Result<SyncRunModel> {
            self.0.get_run(run_id).await
        }

        async fn list_runs(&self, data_source_id: Uuid) -> tributary_storage::Result<Vec<SyncRunModel>> {
            self.0.list_runs(data_source_id).await
        }
    }

    struct Fixture {
        storage: Arc<InMemoryStorage>,
        locks: InMemoryAdvisoryLocks,
        clock: Arc<ManualClock>,
        target: SyncTarget,
        executor: ScriptExecutor,
    }

    fn fixture(config: RuntimeConfig) -> Fixture {
        let ds = DataSourceModel::new("acme", "github");
        let storage = Arc::new(InMemoryStorage::with_data_sources([ds.clone()]));
        let locks = InMemoryAdvisoryLocks::new();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let executor = ScriptExecutor::new(
            Arc::new(locks.clone()),
            RunTracker::new(storage.clone()),
            storage.clone(),
            clock.clone(),
            config,
        );
        let target = SyncTarget {
            tenant_id: ds.tenant_id.clone(),
            data_source_id: ds.id,
            provider: ds.provider.clone(),
            env: BTreeMap::new(),
            batch_id: Uuid::now_v7(),
        };
        Fixture {
            storage,
            locks,
            clock,
            target,
            executor,
        }
    }

    #[tokio::test]
    async fn test_first_run_completes_and_sets_watermarks() {
        let f = fixture(RuntimeConfig::default());
        let script = TestScript::new(Behavior::Records(7));
        let now = f.clock.now();

        let result = f.executor.execute(&script, &f.target).await;

        assert_eq!(result.outcome, ScriptOutcome::Succeeded { records: 7 });
        assert_eq!(
            script.calls(),
            vec![(Segment::Forward, now - ChronoDuration::days(7), now)]
        );
        let run = f.storage.run_for(f.target.data_source_id, "github:commit").unwrap();
        assert_eq!(run.run_status().unwrap(), RunStatus::Completed);
        assert_eq!(run.last_fetched_data_at, Some(now));
        assert_eq!(run.earliest_fetched_data_at, Some(now - ChronoDuration::days(7)));
        assert!(f.locks.held_keys().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_fetches_forward_then_backfill() {
        let f = fixture(RuntimeConfig::default());
        let script = TestScript::new(Behavior::Records(2));
        let first_now = f.clock.now();
        f.executor.execute(&script, &f.target).await;

        f.clock.advance(ChronoDuration::days(1));
        let now = f.clock.now();
        let result = f.executor.execute(&script, &f.target).await;

        assert_eq!(result.outcome, ScriptOutcome::Succeeded { records: 4 });
        let prev_earliest = first_now - ChronoDuration::days(7);
        assert_eq!(
            script.calls()[1..].to_vec(),
            vec![
                (Segment::Forward, first_now, now),
                (
                    Segment::Backfill,
                    prev_earliest - ChronoDuration::days(7),
                    prev_earliest
                ),
            ]
        );
        let marks = f
            .storage
            .watermarks(f.target.data_source_id, "github:commit")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(marks.last_fetched_at, Some(now));
        assert_eq!(
            marks.earliest_fetched_at,
            Some(prev_earliest - ChronoDuration::days(7))
        );
    }

    #[tokio::test]
    async fn test_contended_lock_skips_without_side_effects() {
        let f = fixture(RuntimeConfig::default());
        let other_worker = f.locks.clone();
        assert!(other_worker.try_acquire("github:commit").await.unwrap());
        let script = TestScript::new(Behavior::Records(1));

        let result = f.executor.execute(&script, &f.target).await;

        assert_eq!(
            result.outcome,
            ScriptOutcome::Skipped {
                reason: SkipReason::LockContended
            }
        );
        assert!(script.calls().is_empty());
        assert!(f.storage.run_for(f.target.data_source_id, "github:commit").is_none());
        // Still held by the other worker; a skip never releases it.
        assert!(f.locks.is_held("github:commit"));
    }

    #[tokio::test]
    async fn test_unclaimable_run_skips_and_releases() {
        let f = fixture(RuntimeConfig::default());
        f.storage.set_enabled(f.target.data_source_id, false);
        let script = TestScript::new(Behavior::Records(1));

        let result = f.executor.execute(&script, &f.target).await;

        assert_eq!(
            result.outcome,
            ScriptOutcome::Skipped {
                reason: SkipReason::RunNotClaimed
            }
        );
        assert!(script.calls().is_empty());
        assert!(f.locks.held_keys().is_empty());
    }

    #[tokio::test]
    async fn test_backfill_failure_fails_run_and_keeps_watermarks() {
        let f = fixture(RuntimeConfig::default());
        let ok = TestScript::new(Behavior::Records(1));
        f.executor.execute(&ok, &f.target).await;
        let before = f
            .storage
            .run_for(f.target.data_source_id, "github:commit")
            .unwrap();

        f.clock.advance(ChronoDuration::hours(6));
        let failing = TestScript::new(Behavior::FailOn(Segment::Backfill));
        let result = f.executor.execute(&failing, &f.target).await;

        match &result.outcome {
            ScriptOutcome::Failed {
                error: FailureCause::Script(ScriptError::Api { status, .. }),
            } => assert_eq!(*status, 502),
            other => panic!("expected api failure, got {other:?}"),
        }
        assert_eq!(failing.calls().len(), 2);

        let after = f
            .storage
            .run_for(f.target.data_source_id, "github:commit")
            .unwrap();
        assert_eq!(after.run_status().unwrap(), RunStatus::Failed);
        assert_eq!(after.last_fetched_data_at, before.last_fetched_data_at);
        assert_eq!(after.earliest_fetched_data_at, before.earliest_fetched_data_at);
        assert!(after.error_message.unwrap().contains("502"));
        assert!(f.locks.held_keys().is_empty());
    }

    #[tokio::test]
    async fn test_forward_failure_stops_before_backfill() {
        let f = fixture(RuntimeConfig::default());
        f.executor
            .execute(&TestScript::new(Behavior::Records(1)), &f.target)
            .await;

        let failing = TestScript::new(Behavior::FailOn(Segment::Forward));
        let result = f.executor.execute(&failing, &f.target).await;

        assert_eq!(result.outcome.label(), "failed");
        assert_eq!(failing.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let f = fixture(RuntimeConfig::default());
        let script = TestScript::new(Behavior::Panic);

        let result = f.executor.execute(&script, &f.target).await;

        match result.outcome {
            ScriptOutcome::Failed {
                error: FailureCause::Script(ScriptError::Panicked(msg)),
            } => assert!(msg.contains("connector exploded")),
            other => panic!("expected panic failure, got {other:?}"),
        }
        assert!(f.locks.held_keys().is_empty());
    }

    #[tokio::test]
    async fn test_panic_outside_connector_still_releases_lock() {
        let f = fixture(RuntimeConfig::default());
        let executor = ScriptExecutor::new(
            Arc::new(f.locks.clone()),
            RunTracker::new(Arc::new(PanickingWatermarks(f.storage.clone()))),
            f.storage.clone(),
            f.clock.clone(),
            RuntimeConfig::default(),
        );
        let script = TestScript::new(Behavior::Records(1));

        let result = executor.execute(&script, &f.target).await;

        match &result.outcome {
            ScriptOutcome::Failed {
                error: FailureCause::Internal(msg),
            } => assert!(msg.contains("watermark row corrupted")),
            other => panic!("expected internal failure, got {other:?}"),
        }
        assert!(script.calls().is_empty());
        assert!(f.locks.held_keys().is_empty());

        let run = f.storage.run_for(f.target.data_source_id, "github:commit").unwrap();
        assert_eq!(result.run_id, Some(run.id));
        assert_eq!(run.run_status().unwrap(), RunStatus::Failed);

        // The key is free for the next attempt.
        let retry = f
            .executor
            .execute(&TestScript::new(Behavior::Records(2)), &f.target)
            .await;
        assert_eq!(retry.outcome, ScriptOutcome::Succeeded { records: 2 });
    }

    #[tokio::test]
    async fn test_invocation_timeout() {
        let config = RuntimeConfig {
            invocation_timeout: Some(Duration::from_millis(50)),
            ..RuntimeConfig::default()
        };
        let f = fixture(config);
        let script = TestScript::new(Behavior::Hang);

        let result = f.executor.execute(&script, &f.target).await;

        assert!(matches!(
            result.outcome,
            ScriptOutcome::Failed {
                error: FailureCause::Script(ScriptError::Timeout(_))
            }
        ));
        assert!(f.locks.held_keys().is_empty());
    }

    #[tokio::test]
    async fn test_data_source_scope_allows_other_tenants() {
        let config = RuntimeConfig {
            lock_scope: crate::LockScope::DataSource,
            ..RuntimeConfig::default()
        };
        let f = fixture(config);
        // A different data source holds its own key for the same script.
        let other_key = format!("{}:github:commit", Uuid::new_v4());
        assert!(f.locks.try_acquire(&other_key).await.unwrap());

        let result = f
            .executor
            .execute(&TestScript::new(Behavior::Records(1)), &f.target)
            .await;
        assert_eq!(result.outcome, ScriptOutcome::Succeeded { records: 1 });
    }
}
