//! Pipeline coordinator.
//!
//! Owns the intake loop and the lifecycle of the whole pipeline:
//! poll the discovery feed, validate and decide each candidate, fan
//! Execute decisions out to the dispatcher, fold results back into the
//! feedback buffer, and trigger learner cycles. A graceful stop drains
//! in-flight work; an emergency stop cancels it through the shared
//! halt channel. Only `ConfigurationFatal` errors halt the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::collab::{Executor, MarketSnapshotProvider};
use crate::config::AppConfig;
use crate::engine::dispatcher::{ApprovalHub, DispatchOutcome, ExecutionDispatcher, PendingAction};
use crate::engine::feedback::{FeedbackCollector, FeedbackSample};
use crate::engine::learner::{Learner, LearnerStatus};
use crate::engine::supervisor::{SupervisorConfig, WorkerSupervisor};
use crate::error::PipelineError;
use crate::events::{EventBus, PipelineEvent};
use crate::storage::{self, PersistedState};
use crate::strategy::{
    DecisionEngine, DecisionEngineConfig, ExposurePolicy, OpportunityScorer, ScorerConfig,
};
use crate::types::{
    MarketSnapshot, Opportunity, PipelineState, PipelineStatus, Score, StageCounts,
    ThresholdState, Verdict, WorkerHealth, WorkerRegistration,
};

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    rejected: AtomicU64,
    scored: AtomicU64,
    decided_execute: AtomicU64,
    decided_hold: AtomicU64,
    decided_reject: AtomicU64,
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    shadow: AtomicU64,
    approvals_timed_out: AtomicU64,
    manual_pending: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StageCounts {
        StageCounts {
            opportunities_received: self.received.load(Ordering::Relaxed),
            opportunities_rejected: self.rejected.load(Ordering::Relaxed),
            scored: self.scored.load(Ordering::Relaxed),
            decided_execute: self.decided_execute.load(Ordering::Relaxed),
            decided_hold: self.decided_hold.load(Ordering::Relaxed),
            decided_reject: self.decided_reject.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            executions_succeeded: self.succeeded.load(Ordering::Relaxed),
            executions_failed: self.failed.load(Ordering::Relaxed),
            executions_cancelled: self.cancelled.load(Ordering::Relaxed),
            shadow_executions: self.shadow.load(Ordering::Relaxed),
            approvals_timed_out: self.approvals_timed_out.load(Ordering::Relaxed),
            manual_pending_created: self.manual_pending.load(Ordering::Relaxed),
        }
    }
}

/// What a finished dispatch task hands back to the intake loop.
struct TaskReport {
    score: Score,
    profit_estimate: f64,
    outcome: Result<DispatchOutcome, PipelineError>,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct PipelineCoordinator {
    config: AppConfig,
    state: Mutex<PipelineState>,
    thresholds: Arc<RwLock<ThresholdState>>,
    engine: DecisionEngine,
    supervisor: Arc<WorkerSupervisor>,
    dispatcher: Arc<ExecutionDispatcher>,
    approvals: Arc<ApprovalHub>,
    events: Arc<EventBus>,
    provider: Arc<dyn MarketSnapshotProvider>,
    collector: Mutex<FeedbackCollector>,
    learner: Mutex<Learner>,
    counts: Counters,
    halt_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,
    run_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PipelineCoordinator {
    pub fn new(
        config: AppConfig,
        provider: Arc<dyn MarketSnapshotProvider>,
        executor: Arc<dyn Executor>,
    ) -> Result<Arc<Self>, PipelineError> {
        config.validate()?;

        let events = Arc::new(EventBus::new());
        let thresholds = Arc::new(RwLock::new(config.initial_thresholds()));

        let supervisor = Arc::new(WorkerSupervisor::new(
            SupervisorConfig {
                degrade_after_failures: config.workers.degrade_after_failures,
                cooldown: Duration::from_secs(config.workers.cooldown_secs),
                success_window: config.workers.success_window,
            },
            Arc::clone(&events),
        ));
        for entry in &config.workers.registry {
            supervisor.register(entry.parse()?)?;
        }

        let approvals = Arc::new(ApprovalHub::new());
        let (halt_tx, halt_rx) = watch::channel(false);
        let (shutdown_tx, _) = watch::channel(false);

        let dispatcher = Arc::new(ExecutionDispatcher::new(
            Arc::clone(&supervisor),
            executor,
            Arc::clone(&approvals),
            Arc::clone(&events),
            config.pipeline.n_max,
            config.timeouts.dispatch(),
            config.timeouts.approval(),
            halt_rx,
        ));

        let engine = DecisionEngine::new(
            OpportunityScorer::new(
                ScorerConfig {
                    profit_pivot: config.scoring.profit_pivot,
                    min_viable_profit: config.scoring.min_viable_profit,
                },
                Arc::new(ExposurePolicy::new(config.scoring.max_venue_load)),
            ),
            DecisionEngineConfig {
                optimize_attempts: config.decision.optimize_attempts,
                optimize_relaxation: config.decision.optimize_relaxation,
            },
        );

        let collector = Mutex::new(FeedbackCollector::new(config.learner.buffer_capacity));
        let learner = Mutex::new(Learner::new(
            config.learner.clone(),
            Arc::clone(&thresholds),
            Arc::clone(&events),
        ));

        Ok(Arc::new(Self {
            config,
            state: Mutex::new(PipelineState::Idle),
            thresholds,
            engine,
            supervisor,
            dispatcher,
            approvals,
            events,
            provider,
            collector,
            learner,
            counts: Counters::default(),
            halt_tx,
            shutdown_tx,
            run_handle: Mutex::new(None),
        }))
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the intake loop. Valid from Idle or Stopped only; a halted
    /// pipeline requires a fresh process with validated configuration.
    pub fn start(self: &Arc<Self>) -> Result<(), PipelineError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            PipelineState::Idle | PipelineState::Stopped => {}
            PipelineState::Halted => {
                return Err(PipelineError::fatal(
                    "pipeline is halted; restart with validated configuration",
                ));
            }
            _ => {
                return Err(PipelineError::validation(format!(
                    "pipeline cannot start from state {}",
                    *state
                )));
            }
        }
        *state = PipelineState::Running;
        drop(state);

        self.shutdown_tx.send_replace(false);
        // A drain that hit its grace window left the halt latch set.
        // Only reachable from Idle/Stopped, so Halted stays terminal.
        self.halt_tx.send_replace(false);
        self.events.publish(PipelineEvent::PipelineStarted);
        info!(name = %self.config.pipeline.name, "Pipeline started");

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_loop().await });
        *self.run_handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Graceful stop: no new intake, in-flight work drains to
    /// completion, learned state is persisted.
    pub async fn stop(&self) -> Result<(), PipelineError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != PipelineState::Running {
                return Err(PipelineError::validation(format!(
                    "pipeline cannot stop from state {}",
                    *state
                )));
            }
            *state = PipelineState::Draining;
        }
        info!("Pipeline draining");
        self.shutdown_tx.send_replace(true);
        self.join_run_loop().await;

        *self.state.lock().unwrap() = PipelineState::Stopped;
        self.events.publish(PipelineEvent::PipelineStopped);
        self.persist();
        info!("Pipeline stopped");
        Ok(())
    }

    /// Emergency stop: cancel in-flight work and pending approvals and
    /// halt. No further starts are accepted.
    pub async fn emergency_stop(&self) {
        warn!("Emergency stop requested");
        self.events.publish(PipelineEvent::EmergencyStop);
        *self.state.lock().unwrap() = PipelineState::Halted;
        let _ = self.halt_tx.send(true);
        let cancelled = self.approvals.cancel_all();
        if cancelled > 0 {
            warn!(cancelled, "Pending approvals cancelled");
        }
        self.join_run_loop().await;
        self.events.publish(PipelineEvent::PipelineHalted {
            reason: "emergency stop".to_string(),
        });
    }

    async fn join_run_loop(&self) {
        let handle = self.run_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Intake loop terminated abnormally");
            }
        }
    }

    fn halt_with(&self, reason: String) {
        error!(reason = %reason, "Pipeline halted on fatal error");
        *self.state.lock().unwrap() = PipelineState::Halted;
        let _ = self.halt_tx.send(true);
        self.approvals.cancel_all();
        self.events.publish(PipelineEvent::PipelineHalted { reason });
    }

    // -----------------------------------------------------------------------
    // Intake loop
    // -----------------------------------------------------------------------

    async fn run_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.pipeline.intake_interval_secs);
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut halt = self.halt_tx.subscribe();
        let mut inflight: JoinSet<TaskReport> = JoinSet::new();

        loop {
            if *shutdown.borrow() || *halt.borrow() {
                break;
            }

            match tokio::time::timeout(
                self.config.timeouts.snapshot(),
                self.provider.next_snapshot(),
            )
            .await
            {
                Err(_) => warn!("Snapshot poll timed out"),
                Ok(Err(e)) if e.is_fatal() => {
                    self.halt_with(format!("snapshot provider: {e}"));
                    break;
                }
                Ok(Err(e)) => warn!(error = %e, "Snapshot poll failed"),
                Ok(Ok(snapshot)) => self.process_snapshot(snapshot, &mut inflight),
            }

            while let Some(joined) = inflight.try_join_next() {
                self.absorb(joined);
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
                _ = halt.changed() => {}
            }
        }

        self.drain(inflight).await;
    }

    /// Drain in-flight dispatches. A stuck dispatch (all workers
    /// degraded, approval never resolving) is cancelled through the
    /// halt channel once the grace window expires.
    async fn drain(&self, mut inflight: JoinSet<TaskReport>) {
        if !inflight.is_empty() {
            info!(in_flight = inflight.len(), "Draining in-flight work");
        }
        let grace = self.config.timeouts.dispatch()
            + self.config.timeouts.approval()
            + Duration::from_secs(5);

        loop {
            match tokio::time::timeout(grace, inflight.join_next()).await {
                Ok(Some(joined)) => self.absorb(joined),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        in_flight = inflight.len(),
                        "Drain grace expired, cancelling remaining work"
                    );
                    let _ = self.halt_tx.send(true);
                }
            }
        }
    }

    /// Validate, score, and decide one snapshot batch, then fan Execute
    /// decisions out in confidence order — the strongest candidates
    /// reach the FIFO dispatch slots first.
    fn process_snapshot(&self, snapshot: MarketSnapshot, inflight: &mut JoinSet<TaskReport>) {
        let thresholds = self.thresholds.read().unwrap().clone();
        let mut batch = Vec::new();

        for raw in snapshot.opportunities {
            Counters::bump(&self.counts.received);
            let opportunity = match Opportunity::ingest(raw) {
                Ok(o) => o,
                Err(e) => {
                    Counters::bump(&self.counts.rejected);
                    warn!(error = %e, "Opportunity rejected at intake");
                    self.events.publish(PipelineEvent::OpportunityRejected {
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            match self.engine.decide(&opportunity, &snapshot.context, &thresholds) {
                Ok((decision, score)) => {
                    Counters::bump(&self.counts.scored);
                    self.events.publish(PipelineEvent::Scored {
                        opportunity_id: opportunity.id,
                        composite: score.composite,
                    });
                    self.events.publish(PipelineEvent::Decided {
                        decision_id: decision.id,
                        opportunity_id: opportunity.id,
                        verdict: decision.verdict,
                        confidence: decision.confidence,
                    });
                    batch.push((decision, score, opportunity));
                }
                Err(e) => {
                    Counters::bump(&self.counts.rejected);
                    warn!(opportunity_id = %opportunity.id, error = %e, "Scoring failed");
                    self.events.publish(PipelineEvent::OpportunityRejected {
                        reason: e.to_string(),
                    });
                }
            }
        }

        batch.sort_by(|a, b| {
            b.1.composite
                .partial_cmp(&a.1.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for (decision, score, opportunity) in batch {
            match decision.verdict {
                Verdict::Execute => {
                    Counters::bump(&self.counts.decided_execute);
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let profit_estimate = opportunity.profit_estimate;
                    inflight.spawn(async move {
                        let outcome = dispatcher.dispatch(decision, opportunity).await;
                        TaskReport {
                            score,
                            profit_estimate,
                            outcome,
                        }
                    });
                }
                Verdict::Reject => Counters::bump(&self.counts.decided_reject),
                Verdict::Hold | Verdict::Optimize => {
                    Counters::bump(&self.counts.decided_hold);
                }
            }
        }
    }

    /// Fold one finished dispatch back into counters, feedback, and the
    /// learner.
    fn absorb(&self, joined: Result<TaskReport, JoinError>) {
        let report = match joined {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Dispatch task failed to join");
                return;
            }
        };

        let result = match report.outcome {
            Ok(DispatchOutcome::Completed(result)) => result,
            Ok(DispatchOutcome::Held { timed_out }) => {
                Counters::bump(&self.counts.decided_hold);
                if timed_out {
                    Counters::bump(&self.counts.approvals_timed_out);
                }
                return;
            }
            Ok(DispatchOutcome::Pending) => {
                Counters::bump(&self.counts.manual_pending);
                return;
            }
            Ok(DispatchOutcome::Cancelled) => {
                Counters::bump(&self.counts.cancelled);
                return;
            }
            Err(e) if e.is_fatal() => {
                self.halt_with(format!("dispatch: {e}"));
                return;
            }
            Err(e) => {
                warn!(error = %e, "Dispatch failed");
                return;
            }
        };

        Counters::bump(&self.counts.dispatched);
        match result.outcome {
            crate::types::ExecutionOutcome::Success => {
                Counters::bump(&self.counts.succeeded);
                if result.shadow {
                    Counters::bump(&self.counts.shadow);
                }
            }
            crate::types::ExecutionOutcome::Failure(_) => Counters::bump(&self.counts.failed),
            crate::types::ExecutionOutcome::Cancelled => Counters::bump(&self.counts.cancelled),
        }

        let run_learner = {
            let mut collector = self.collector.lock().unwrap();
            collector.record(FeedbackSample {
                result,
                score: report.score,
                profit_estimate: report.profit_estimate,
            });
            collector.total_recorded() % self.config.learner.learn_every as u64 == 0
        };
        if run_learner {
            let collector = self.collector.lock().unwrap();
            let mut learner = self.learner.lock().unwrap();
            learner.run_cycle(&collector);
        }
    }

    // -----------------------------------------------------------------------
    // Observation & intervention surface
    // -----------------------------------------------------------------------

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            state: *self.state.lock().unwrap(),
            counts: self.counts.snapshot(),
            thresholds: self.thresholds.read().unwrap().clone(),
            workers: self.supervisor.health(),
            pending_manual: self.dispatcher.pending_count(),
            learner_frozen: self.learner.lock().unwrap().is_frozen(),
            rolling_success_rate: self.collector.lock().unwrap().rolling_success_rate(),
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap()
    }

    pub fn thresholds(&self) -> ThresholdState {
        self.thresholds.read().unwrap().clone()
    }

    pub fn worker_health(&self) -> Vec<WorkerHealth> {
        self.supervisor.health()
    }

    pub fn learner_status(&self) -> LearnerStatus {
        self.learner.lock().unwrap().status()
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn pending_actions(&self) -> Vec<PendingAction> {
        self.dispatcher.pending_actions()
    }

    /// Deliver an approval or denial for a supervised dispatch.
    pub fn approve(&self, decision_id: uuid::Uuid, approved: bool) -> bool {
        self.approvals.resolve(decision_id, approved)
    }

    /// Register a worker at runtime.
    pub fn register_worker(&self, registration: WorkerRegistration) -> Result<(), PipelineError> {
        self.supervisor.register(registration)
    }

    /// Deregister a worker; an executing worker finishes first.
    pub fn deregister_worker(&self, worker_id: &str) -> Result<(), PipelineError> {
        self.supervisor.deregister(worker_id)
    }

    /// Clear a degraded worker back into rotation.
    pub fn reset_worker(&self, worker_id: &str) -> Result<(), PipelineError> {
        self.supervisor.reset_worker(worker_id)
    }

    /// Clear the learner's divergence guard.
    pub fn reset_learner(&self) {
        self.learner.lock().unwrap().reset_guard();
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Restore previously learned thresholds, if a state file exists.
    /// Session counters always start at zero.
    pub fn restore(&self) -> Result<(), PipelineError> {
        if let Some(state) = storage::load(&self.config.pipeline.state_file)? {
            *self.thresholds.write().unwrap() = state.thresholds;
        }
        Ok(())
    }

    fn persist(&self) {
        let state = PersistedState {
            thresholds: self.thresholds.read().unwrap().clone(),
            counts: self.counts.snapshot(),
            saved_at: chrono::Utc::now(),
        };
        if let Err(e) = storage::save(&self.config.pipeline.state_file, &state) {
            warn!(error = %e, "Failed to persist state");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{SimulatedExecutor, SimulatedFeed};
    use crate::config::WorkerEntry;
    use crate::types::{ExecutionOutcome, FailureKind, MarketContext, RawOpportunity};
    use chrono::Utc;

    fn raw(profit: f64, risk: f64) -> RawOpportunity {
        RawOpportunity {
            token_pair: "WETH/USDC".into(),
            source: "uniswap".into(),
            target: "sushiswap".into(),
            profit_estimate: profit,
            risk_estimate: risk,
            timestamp: Utc::now(),
        }
    }

    fn worker(id: &str, mode: &str) -> WorkerEntry {
        WorkerEntry {
            worker_id: id.into(),
            mode: mode.into(),
            capability_tags: vec![],
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default_for_tests();
        config.pipeline.state_file = std::env::temp_dir()
            .join(format!("hermes_coord_{}.json", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        config
    }

    struct Rig {
        coordinator: Arc<PipelineCoordinator>,
        feed: Arc<SimulatedFeed>,
        executor: Arc<SimulatedExecutor>,
    }

    fn make_rig(config: AppConfig) -> Rig {
        let feed = Arc::new(SimulatedFeed::new());
        let executor = Arc::new(SimulatedExecutor::new());
        let coordinator = PipelineCoordinator::new(
            config,
            feed.clone() as Arc<dyn MarketSnapshotProvider>,
            executor.clone() as Arc<dyn Executor>,
        )
        .unwrap();
        Rig {
            coordinator,
            feed,
            executor,
        }
    }

    async fn run_briefly(rig: &Rig) {
        rig.coordinator.start().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        rig.coordinator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_strong_opportunity_executes_end_to_end() {
        let mut config = test_config();
        config.workers.registry.push(worker("w1", "autonomous"));
        let rig = make_rig(config);
        rig.feed
            .push_batch(vec![raw(100.0, 0.1)], MarketContext::sample());

        run_briefly(&rig).await;

        let status = rig.coordinator.status();
        assert_eq!(status.state, PipelineState::Stopped);
        assert_eq!(status.counts.opportunities_received, 1);
        assert_eq!(status.counts.decided_execute, 1);
        assert_eq!(status.counts.executions_succeeded, 1);
        assert_eq!(rig.executor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_tiny_profit_is_rejected_not_dispatched() {
        let mut config = test_config();
        config.workers.registry.push(worker("w1", "autonomous"));
        let rig = make_rig(config);
        rig.feed
            .push_batch(vec![raw(1.0, 0.1)], MarketContext::sample());

        run_briefly(&rig).await;

        let status = rig.coordinator.status();
        assert_eq!(status.counts.decided_reject, 1);
        assert_eq!(status.counts.dispatched, 0);
        assert_eq!(rig.executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_record_rejected_at_boundary() {
        let mut config = test_config();
        config.workers.registry.push(worker("w1", "autonomous"));
        let rig = make_rig(config);
        rig.feed
            .push_batch(vec![raw(50.0, 1.5)], MarketContext::sample());

        run_briefly(&rig).await;

        let status = rig.coordinator.status();
        assert_eq!(status.counts.opportunities_received, 1);
        assert_eq!(status.counts.opportunities_rejected, 1);
        assert_eq!(status.counts.scored, 0);
    }

    #[tokio::test]
    async fn test_start_is_rejected_while_running() {
        let rig = make_rig(test_config());
        rig.coordinator.start().unwrap();
        assert!(rig.coordinator.start().is_err());
        rig.coordinator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_start_is_an_error() {
        let rig = make_rig(test_config());
        assert!(rig.coordinator.stop().await.is_err());
    }

    #[tokio::test]
    async fn test_restart_after_graceful_stop() {
        let rig = make_rig(test_config());
        rig.coordinator.start().unwrap();
        rig.coordinator.stop().await.unwrap();
        assert!(rig.coordinator.start().is_ok());
        rig.coordinator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_after_cancelled_drain_resumes_intake() {
        let mut config = test_config();
        config.workers.registry.push(worker("w1", "autonomous"));
        let rig = make_rig(config);
        rig.feed
            .push_batch(vec![raw(100.0, 0.1)], MarketContext::sample());

        run_briefly(&rig).await;
        assert_eq!(rig.coordinator.status().counts.opportunities_received, 1);

        // A stop whose drain grace expired leaves the halt latch set
        // when the pipeline settles into Stopped.
        rig.coordinator.halt_tx.send_replace(true);

        rig.feed
            .push_batch(vec![raw(100.0, 0.1)], MarketContext::sample());
        run_briefly(&rig).await;

        let status = rig.coordinator.status();
        assert_eq!(status.state, PipelineState::Stopped);
        assert_eq!(status.counts.opportunities_received, 2);
        assert_eq!(status.counts.executions_succeeded, 2);
        assert_eq!(rig.executor.call_count(), 2);
    }

    #[tokio::test]
    async fn test_emergency_stop_cancels_in_flight_work() {
        let mut config = test_config();
        config.workers.registry.push(worker("w1", "autonomous"));
        let rig = make_rig(config);
        rig.executor.set_latency(Duration::from_secs(60));
        rig.feed
            .push_batch(vec![raw(100.0, 0.1)], MarketContext::sample());

        rig.coordinator.start().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        rig.coordinator.emergency_stop().await;

        let status = rig.coordinator.status();
        assert_eq!(status.state, PipelineState::Halted);
        assert_eq!(status.counts.executions_cancelled, 1);
        assert_eq!(status.counts.executions_succeeded, 0);

        // Halted is terminal.
        assert!(rig.coordinator.start().is_err());
    }

    #[tokio::test]
    async fn test_sustained_failures_freeze_learner() {
        let mut config = test_config();
        config.workers.registry.push(worker("w1", "autonomous"));
        config.workers.registry.push(worker("w2", "autonomous"));
        // Keep workers in rotation while everything fails.
        config.workers.degrade_after_failures = 100;
        config.learner.learn_every = 4;
        config.learner.freeze_after_cycles = 2;
        let rig = make_rig(config);

        rig.executor.script_outcomes(
            std::iter::repeat(ExecutionOutcome::Failure(FailureKind::Errored)).take(16),
        );
        rig.feed.push_batch(
            (0..12).map(|_| raw(100.0, 0.1)).collect(),
            MarketContext::sample(),
        );

        run_briefly(&rig).await;

        let status = rig.coordinator.status();
        assert_eq!(status.counts.executions_failed, 12);
        assert!(status.learner_frozen);
        assert!(rig
            .coordinator
            .events()
            .recent()
            .iter()
            .any(|r| matches!(r.event, PipelineEvent::LearnerFrozen { .. })));

        // Manual reset lifts the freeze.
        rig.coordinator.reset_learner();
        assert!(!rig.coordinator.status().learner_frozen);
    }

    #[tokio::test]
    async fn test_shadow_worker_never_calls_executor() {
        let mut config = test_config();
        config.workers.registry.push(worker("shadow", "learning"));
        let rig = make_rig(config);
        rig.feed
            .push_batch(vec![raw(100.0, 0.1)], MarketContext::sample());

        run_briefly(&rig).await;

        let status = rig.coordinator.status();
        assert_eq!(status.counts.shadow_executions, 1);
        assert_eq!(status.counts.executions_succeeded, 1);
        assert_eq!(rig.executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_persists_and_restore_reloads_thresholds() {
        let mut config = test_config();
        config.workers.registry.push(worker("w1", "autonomous"));
        let state_file = config.pipeline.state_file.clone();
        let rig = make_rig(config.clone());

        // Enough feedback for one learner cycle to bump the version.
        rig.feed.push_batch(
            (0..8).map(|_| raw(100.0, 0.1)).collect(),
            MarketContext::sample(),
        );
        run_briefly(&rig).await;

        let saved_version = rig.coordinator.thresholds().version;
        assert!(saved_version >= 1);
        assert!(std::path::Path::new(&state_file).exists());

        let fresh = make_rig(config);
        assert_eq!(fresh.coordinator.thresholds().version, 0);
        fresh.coordinator.restore().unwrap();
        assert_eq!(fresh.coordinator.thresholds().version, saved_version);

        let _ = std::fs::remove_file(&state_file);
    }

    #[tokio::test]
    async fn test_status_exposes_worker_health() {
        let mut config = test_config();
        config.workers.registry.push(worker("w1", "autonomous"));
        config.workers.registry.push(worker("op", "manual"));
        let rig = make_rig(config);

        let status = rig.coordinator.status();
        assert_eq!(status.state, PipelineState::Idle);
        assert_eq!(status.workers.len(), 2);
        assert_eq!(status.pending_manual, 0);
    }
}
