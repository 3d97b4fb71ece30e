//! Execution dispatcher.
//!
//! Carries an Execute decision through worker assignment, the mode
//! gate, and the executor call. A semaphore caps concurrent
//! executions at `n_max`; waiters acquire slots in FIFO order. A watch
//! channel carries the emergency-stop signal into every wait point.
//!
//! Mode gates:
//! - Autonomous: executes immediately.
//! - Supervised: waits for an approval signal; a missed window reverts
//!   the decision to Hold and frees the worker.
//! - Manual: never auto-executed — queued as a pending action.
//! - Learning: full path, but the executor call is shadowed.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

use crate::collab::Executor;
use crate::engine::supervisor::WorkerSupervisor;
use crate::error::PipelineError;
use crate::events::{EventBus, PipelineEvent};
use crate::types::{
    Decision, ExecutionOutcome, ExecutionResult, FailureKind, Opportunity, WorkerMode,
};

/// Re-poll interval while waiting for a selectable worker.
const WORKER_POLL: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// Approvals
// ---------------------------------------------------------------------------

/// Rendezvous point between supervised dispatches and the operator
/// surface. Each waiting dispatch parks a oneshot sender keyed by
/// decision id.
pub struct ApprovalHub {
    waiting: Mutex<HashMap<Uuid, oneshot::Sender<bool>>>,
}

impl ApprovalHub {
    pub fn new() -> Self {
        Self {
            waiting: Mutex::new(HashMap::new()),
        }
    }

    fn park(&self, decision_id: Uuid) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().unwrap().insert(decision_id, tx);
        rx
    }

    fn unpark(&self, decision_id: &Uuid) {
        self.waiting.lock().unwrap().remove(decision_id);
    }

    /// Deliver an approval or denial. Returns false when no dispatch is
    /// waiting on that decision (already timed out or never supervised).
    pub fn resolve(&self, decision_id: Uuid, approved: bool) -> bool {
        match self.waiting.lock().unwrap().remove(&decision_id) {
            Some(tx) => tx.send(approved).is_ok(),
            None => false,
        }
    }

    /// Drop every parked waiter (emergency stop). Waiters observe the
    /// closed channel and treat it as a cancellation.
    pub fn cancel_all(&self) -> usize {
        let mut waiting = self.waiting.lock().unwrap();
        let n = waiting.len();
        waiting.clear();
        n
    }

    /// Decision ids currently awaiting approval.
    pub fn waiting_ids(&self) -> Vec<Uuid> {
        self.waiting.lock().unwrap().keys().copied().collect()
    }
}

impl Default for ApprovalHub {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Pending manual actions
// ---------------------------------------------------------------------------

/// An Execute decision parked for a Manual-mode worker. Nothing runs
/// until an operator explicitly takes it.
#[derive(Debug, Clone)]
pub struct PendingAction {
    pub decision: Decision,
    pub opportunity: Opportunity,
    pub worker_id: String,
    pub queued_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Dispatch outcome
// ---------------------------------------------------------------------------

enum ApprovalWait {
    Approved,
    Denied,
    TimedOut,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// Execution finished (success, failure, or cancelled mid-flight).
    Completed(ExecutionResult),
    /// Approval denied or timed out — the decision reverted to Hold and
    /// no result was recorded.
    Held { timed_out: bool },
    /// Queued on the manual pending queue; no automatic execution.
    Pending,
    /// Emergency stop arrived before execution began.
    Cancelled,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct ExecutionDispatcher {
    supervisor: Arc<WorkerSupervisor>,
    executor: Arc<dyn Executor>,
    approvals: Arc<ApprovalHub>,
    events: Arc<EventBus>,
    slots: Arc<Semaphore>,
    dispatch_timeout: Duration,
    approval_timeout: Duration,
    halt: watch::Receiver<bool>,
    pending_manual: Mutex<VecDeque<PendingAction>>,
}

impl ExecutionDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        supervisor: Arc<WorkerSupervisor>,
        executor: Arc<dyn Executor>,
        approvals: Arc<ApprovalHub>,
        events: Arc<EventBus>,
        n_max: usize,
        dispatch_timeout: Duration,
        approval_timeout: Duration,
        halt: watch::Receiver<bool>,
    ) -> Self {
        Self {
            supervisor,
            executor,
            approvals,
            events,
            slots: Arc::new(Semaphore::new(n_max.max(1))),
            dispatch_timeout,
            approval_timeout,
            halt,
            pending_manual: Mutex::new(VecDeque::new()),
        }
    }

    /// Snapshot of the manual pending queue, oldest first.
    pub fn pending_actions(&self) -> Vec<PendingAction> {
        self.pending_manual.lock().unwrap().iter().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_manual.lock().unwrap().len()
    }

    /// Remove a pending action for operator handling.
    pub fn take_pending(&self, decision_id: Uuid) -> Option<PendingAction> {
        let mut queue = self.pending_manual.lock().unwrap();
        let idx = queue.iter().position(|p| p.decision.id == decision_id)?;
        queue.remove(idx)
    }

    /// Carry one Execute decision to completion.
    ///
    /// Blocks on worker availability, clears the mode gate, and only
    /// then on a free execution slot (FIFO) — a decision awaiting
    /// approval never occupies one of the `n_max` slots. Fatal errors
    /// propagate; everything else is folded into the outcome.
    pub async fn dispatch(
        &self,
        decision: Decision,
        opportunity: Opportunity,
    ) -> Result<DispatchOutcome, PipelineError> {
        let mut halt = self.halt.clone();

        let (worker_id, mode) = match self.acquire_worker(&decision, &opportunity, &mut halt).await {
            Some(pick) => pick,
            None => {
                // Either halted or parked on the manual queue; the
                // helper already produced the right outcome.
                return Ok(if *halt.borrow() {
                    DispatchOutcome::Cancelled
                } else {
                    DispatchOutcome::Pending
                });
            }
        };

        match mode {
            WorkerMode::Supervised => match self.await_approval(&decision, &worker_id, &mut halt).await {
                ApprovalWait::Approved => {}
                ApprovalWait::TimedOut => return Ok(DispatchOutcome::Held { timed_out: true }),
                ApprovalWait::Denied => return Ok(DispatchOutcome::Held { timed_out: false }),
            },
            WorkerMode::Learning => {
                return Ok(DispatchOutcome::Completed(
                    self.shadow_execute(&decision, &opportunity, &worker_id)?,
                ));
            }
            WorkerMode::Autonomous => {}
            // select_for_dispatch never hands out Manual workers.
            WorkerMode::Manual => {
                self.supervisor.release(&worker_id);
                return Err(PipelineError::fatal(format!(
                    "manual worker {worker_id} selected for auto-dispatch"
                )));
            }
        }

        let _permit = tokio::select! {
            permit = self.slots.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.supervisor.release(&worker_id);
                    return Err(PipelineError::fatal("dispatch slots closed"));
                }
            },
            _ = Self::halted(&mut halt) => {
                self.supervisor.release(&worker_id);
                return Ok(DispatchOutcome::Cancelled);
            }
        };

        let result = self
            .run_execution(&decision, &opportunity, &worker_id, &mut halt)
            .await?;
        Ok(DispatchOutcome::Completed(result))
    }

    /// Wait for a selectable worker, parking on the manual queue when
    /// the registry has no automatic workers at all. Returns None when
    /// halted or parked.
    async fn acquire_worker(
        &self,
        decision: &Decision,
        opportunity: &Opportunity,
        halt: &mut watch::Receiver<bool>,
    ) -> Option<(String, WorkerMode)> {
        loop {
            if *halt.borrow() {
                return None;
            }
            if let Some(pick) = self.supervisor.select_for_dispatch() {
                return Some(pick);
            }

            let has_auto = self
                .supervisor
                .health()
                .iter()
                .any(|h| h.mode != WorkerMode::Manual);
            if !has_auto {
                if let Some(worker_id) = self.supervisor.manual_idle_worker() {
                    self.pending_manual.lock().unwrap().push_back(PendingAction {
                        decision: decision.clone(),
                        opportunity: opportunity.clone(),
                        worker_id: worker_id.clone(),
                        queued_at: Utc::now(),
                    });
                    info!(
                        decision_id = %decision.id,
                        worker_id = %worker_id,
                        "Queued for manual handling"
                    );
                    self.events.publish(PipelineEvent::ManualPending {
                        decision_id: decision.id,
                        worker_id,
                    });
                    return None;
                }
            }

            // Bounded wait, then re-check: registration and releases
            // both notify, but a missed wakeup must not stall dispatch.
            let _ = tokio::time::timeout(WORKER_POLL, async {
                tokio::select! {
                    _ = self.supervisor.wait_for_free() => {}
                    _ = Self::halted(halt) => {}
                }
            })
            .await;
        }
    }

    /// Supervised gate. Anything but approval releases the worker and
    /// reverts the decision to Hold.
    async fn await_approval(
        &self,
        decision: &Decision,
        worker_id: &str,
        halt: &mut watch::Receiver<bool>,
    ) -> ApprovalWait {
        let rx = self.approvals.park(decision.id);
        self.events.publish(PipelineEvent::ApprovalRequested {
            decision_id: decision.id,
            worker_id: worker_id.to_string(),
        });

        let wait = tokio::select! {
            outcome = tokio::time::timeout(self.approval_timeout, rx) => match outcome {
                Ok(Ok(true)) => ApprovalWait::Approved,
                Ok(Ok(false)) => ApprovalWait::Denied,
                // Sender dropped: cancel_all during emergency stop.
                Ok(Err(_)) => ApprovalWait::Denied,
                Err(_) => {
                    warn!(
                        decision_id = %decision.id,
                        worker_id,
                        "Approval window expired, reverting to Hold"
                    );
                    self.events.publish(PipelineEvent::ApprovalTimedOut {
                        decision_id: decision.id,
                        worker_id: worker_id.to_string(),
                    });
                    ApprovalWait::TimedOut
                }
            },
            _ = Self::halted(halt) => ApprovalWait::Denied,
        };

        if !matches!(wait, ApprovalWait::Approved) {
            self.approvals.unpark(&decision.id);
            self.supervisor.release(worker_id);
        }
        wait
    }

    /// Learning-mode shadow pass: the full bookkeeping path runs, the
    /// external executor does not.
    fn shadow_execute(
        &self,
        decision: &Decision,
        opportunity: &Opportunity,
        worker_id: &str,
    ) -> Result<ExecutionResult, PipelineError> {
        self.supervisor.begin_execution(worker_id)?;
        self.supervisor.complete(worker_id, true)?;

        let result = ExecutionResult {
            decision_id: decision.id,
            worker_id: worker_id.to_string(),
            outcome: ExecutionOutcome::Success,
            realized_profit: opportunity.profit_estimate,
            duration_ms: 0,
            shadow: true,
            completed_at: Utc::now(),
        };
        info!(
            decision_id = %decision.id,
            worker_id,
            "Shadow execution recorded"
        );
        self.events.publish(PipelineEvent::ExecutionCompleted {
            decision_id: decision.id,
            worker_id: worker_id.to_string(),
            outcome: result.outcome,
            shadow: true,
        });
        Ok(result)
    }

    /// The real executor call, bounded by the dispatch timeout and the
    /// halt signal.
    async fn run_execution(
        &self,
        decision: &Decision,
        opportunity: &Opportunity,
        worker_id: &str,
        halt: &mut watch::Receiver<bool>,
    ) -> Result<ExecutionResult, PipelineError> {
        self.supervisor.begin_execution(worker_id)?;
        self.events.publish(PipelineEvent::Dispatched {
            decision_id: decision.id,
            worker_id: worker_id.to_string(),
        });

        let started = Instant::now();
        let outcome = tokio::select! {
            attempt = tokio::time::timeout(
                self.dispatch_timeout,
                self.executor.execute(worker_id, decision, opportunity),
            ) => match attempt {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) if e.is_fatal() => {
                    self.supervisor.release(worker_id);
                    return Err(e);
                }
                Ok(Err(e)) => {
                    warn!(decision_id = %decision.id, worker_id, error = %e, "Executor error");
                    ExecutionOutcome::Failure(FailureKind::Errored)
                }
                Err(_) => {
                    warn!(
                        decision_id = %decision.id,
                        worker_id,
                        timeout_ms = self.dispatch_timeout.as_millis() as u64,
                        "Dispatch timed out"
                    );
                    ExecutionOutcome::Failure(FailureKind::Timeout)
                }
            },
            _ = Self::halted(halt) => ExecutionOutcome::Cancelled,
        };

        // Cancellations do not count against the worker's record.
        if outcome == ExecutionOutcome::Cancelled {
            self.supervisor.release(worker_id);
        } else {
            self.supervisor.complete(worker_id, outcome.is_success())?;
        }

        let realized_profit = if outcome.is_success() {
            opportunity.profit_estimate
        } else {
            0.0
        };
        let result = ExecutionResult {
            decision_id: decision.id,
            worker_id: worker_id.to_string(),
            outcome,
            realized_profit,
            duration_ms: started.elapsed().as_millis() as u64,
            shadow: false,
            completed_at: Utc::now(),
        };

        info!(
            decision_id = %decision.id,
            worker_id,
            outcome = ?result.outcome,
            duration_ms = result.duration_ms,
            "Execution completed"
        );
        self.events.publish(PipelineEvent::ExecutionCompleted {
            decision_id: decision.id,
            worker_id: worker_id.to_string(),
            outcome: result.outcome,
            shadow: false,
        });
        Ok(result)
    }

    /// Resolves once the halt flag is observed true.
    async fn halted(halt: &mut watch::Receiver<bool>) {
        loop {
            if *halt.borrow() {
                return;
            }
            if halt.changed().await.is_err() {
                // Sender gone without a halt: stay pending forever so
                // the sibling select branch wins.
                std::future::pending::<()>().await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
