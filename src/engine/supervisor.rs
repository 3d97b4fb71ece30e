//! Worker supervisor.
//!
//! Owns the registry of execution workers. Each worker is a small state
//! machine (`Idle → Assigned → Executing → {Idle, Degraded}`); the
//! supervisor is the single writer of the registry. Selection ranks
//! idle, mode-eligible workers by recent success rate with a
//! least-recently-dispatched tie-break.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::events::{EventBus, PipelineEvent};
use crate::types::{WorkerHealth, WorkerMode, WorkerRegistration, WorkerStatus};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Consecutive failures before a worker is marked Degraded.
    pub degrade_after_failures: u32,
    /// How long a Degraded worker is excluded from selection.
    pub cooldown: Duration,
    /// Sliding window of recent outcomes used for selection ranking.
    pub success_window: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            degrade_after_failures: 3,
            cooldown: Duration::from_secs(60),
            success_window: 20,
        }
    }
}

// ---------------------------------------------------------------------------
// Worker record
// ---------------------------------------------------------------------------

struct WorkerRecord {
    mode: WorkerMode,
    capability_tags: Vec<String>,
    status: WorkerStatus,
    success_count: u64,
    failure_count: u64,
    consecutive_failures: u32,
    /// Sliding window of recent outcomes, newest last.
    recent: VecDeque<bool>,
    last_heartbeat: Option<DateTime<Utc>>,
    last_dispatch: Option<DateTime<Utc>>,
    degraded_at: Option<DateTime<Utc>>,
}

impl WorkerRecord {
    fn new(mode: WorkerMode, capability_tags: Vec<String>) -> Self {
        Self {
            mode,
            capability_tags,
            status: WorkerStatus::Idle,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            recent: VecDeque::new(),
            last_heartbeat: None,
            last_dispatch: None,
            degraded_at: None,
        }
    }

    fn recent_success_rate(&self) -> Option<f64> {
        if self.recent.is_empty() {
            return None;
        }
        let wins = self.recent.iter().filter(|&&s| s).count();
        Some(wins as f64 / self.recent.len() as f64)
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

pub struct WorkerSupervisor {
    config: SupervisorConfig,
    inner: Mutex<HashMap<String, WorkerRecord>>,
    /// Signalled whenever a worker becomes selectable again.
    freed: Notify,
    events: Arc<EventBus>,
}

impl WorkerSupervisor {
    pub fn new(config: SupervisorConfig, events: Arc<EventBus>) -> Self {
        Self {
            config,
            inner: Mutex::new(HashMap::new()),
            freed: Notify::new(),
            events,
        }
    }

    /// Register a worker. Re-registering an existing id updates its mode
    /// and capability tags without touching its stats.
    pub fn register(&self, registration: WorkerRegistration) -> Result<(), PipelineError> {
        registration.validate()?;
        let mut inner = self.inner.lock().unwrap();

        match inner.get_mut(&registration.worker_id) {
            Some(record) => {
                info!(
                    worker_id = %registration.worker_id,
                    old_mode = %record.mode,
                    new_mode = %registration.mode,
                    "Worker re-registered"
                );
                record.mode = registration.mode;
                record.capability_tags = registration.capability_tags;
            }
            None => {
                info!(worker_id = %registration.worker_id, mode = %registration.mode, "Worker registered");
                inner.insert(
                    registration.worker_id.clone(),
                    WorkerRecord::new(registration.mode, registration.capability_tags),
                );
            }
        }

        self.events.publish(PipelineEvent::WorkerRegistered {
            worker_id: registration.worker_id,
            mode: registration.mode,
        });
        self.freed.notify_waiters();
        Ok(())
    }

    /// Deregister a worker. An Executing worker is marked Stopped and
    /// removed once its in-flight result is accepted.
    pub fn deregister(&self, worker_id: &str) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.get_mut(worker_id).ok_or_else(|| {
            PipelineError::validation(format!("cannot deregister unknown worker: {worker_id}"))
        })?;

        if record.status == WorkerStatus::Executing {
            record.status = WorkerStatus::Stopped;
            info!(worker_id, "Worker stopping after in-flight execution");
        } else {
            inner.remove(worker_id);
            info!(worker_id, "Worker deregistered");
        }

        self.events.publish(PipelineEvent::WorkerDeregistered {
            worker_id: worker_id.to_string(),
        });
        Ok(())
    }

    /// Whether a worker id is known to the registry.
    pub fn contains(&self, worker_id: &str) -> bool {
        self.inner.lock().unwrap().contains_key(worker_id)
    }

    /// The mode of a known worker.
    pub fn mode_of(&self, worker_id: &str) -> Option<WorkerMode> {
        self.inner.lock().unwrap().get(worker_id).map(|r| r.mode)
    }

    /// Select the best eligible worker for auto-dispatch and mark it
    /// Assigned. Manual-mode workers are never considered here.
    ///
    /// Among Idle workers (plus Degraded ones whose cooldown elapsed),
    /// picks the best recent success rate; ties go to the
    /// least-recently-dispatched worker for fairness.
    pub fn select_for_dispatch(&self) -> Option<(String, WorkerMode)> {
        let now = Utc::now();
        let cooldown = ChronoDuration::from_std(self.config.cooldown).unwrap_or_default();
        let mut inner = self.inner.lock().unwrap();

        // Recover degraded workers whose cooldown has elapsed.
        for (id, record) in inner.iter_mut() {
            if record.status == WorkerStatus::Degraded {
                if let Some(at) = record.degraded_at {
                    if now - at >= cooldown {
                        info!(worker_id = %id, "Cooldown elapsed — worker back in rotation");
                        record.status = WorkerStatus::Idle;
                        record.consecutive_failures = 0;
                        record.degraded_at = None;
                    }
                }
            }
        }

        let best = inner
            .iter()
            .filter(|(_, r)| r.status == WorkerStatus::Idle && r.mode != WorkerMode::Manual)
            .map(|(id, r)| {
                (
                    id.clone(),
                    r.recent_success_rate().unwrap_or(0.5),
                    r.last_dispatch,
                )
            })
            .max_by(|(_, rate_a, last_a), (_, rate_b, last_b)| {
                rate_a
                    .partial_cmp(rate_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    // Least-recently-used wins a tie: an older (smaller)
                    // last_dispatch must compare greater, and never-used
                    // workers (None) beat everyone.
                    .then_with(|| match (last_a, last_b) {
                        (None, None) => std::cmp::Ordering::Equal,
                        (None, Some(_)) => std::cmp::Ordering::Greater,
                        (Some(_), None) => std::cmp::Ordering::Less,
                        (Some(a), Some(b)) => b.cmp(a),
                    })
            })
            .map(|(id, _, _)| id)?;

        let record = inner.get_mut(&best).expect("selected worker exists");
        record.status = WorkerStatus::Assigned;
        record.last_dispatch = Some(now);
        record.last_heartbeat = Some(now);
        Some((best, record.mode))
    }

    /// An idle Manual-mode worker to attach a pending-queue entry to.
    pub fn manual_idle_worker(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| r.status == WorkerStatus::Idle && r.mode == WorkerMode::Manual)
            .map(|(id, _)| id.clone())
            .min()
    }

    /// Transition an Assigned worker to Executing.
    pub fn begin_execution(&self, worker_id: &str) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.get_mut(worker_id).ok_or_else(|| {
            PipelineError::fatal(format!("dispatch to unknown worker id: {worker_id}"))
        })?;
        record.status = WorkerStatus::Executing;
        record.last_heartbeat = Some(Utc::now());
        Ok(())
    }

    /// Release an Assigned worker back to Idle without an execution
    /// (approval timed out or dispatch was cancelled before start).
    pub fn release(&self, worker_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.get_mut(worker_id) {
            if matches!(record.status, WorkerStatus::Assigned | WorkerStatus::Executing) {
                record.status = WorkerStatus::Idle;
            }
        }
        drop(inner);
        self.freed.notify_waiters();
    }

    /// Record the outcome of an execution and move the worker on:
    /// back to Idle, or to Degraded after too many consecutive failures.
    pub fn complete(&self, worker_id: &str, success: bool) -> Result<WorkerStatus, PipelineError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.get_mut(worker_id).ok_or_else(|| {
            PipelineError::fatal(format!("completion from unknown worker id: {worker_id}"))
        })?;

        record.last_heartbeat = Some(Utc::now());
        if success {
            record.success_count += 1;
            record.consecutive_failures = 0;
        } else {
            record.failure_count += 1;
            record.consecutive_failures += 1;
        }
        record.recent.push_back(success);
        while record.recent.len() > self.config.success_window {
            record.recent.pop_front();
        }

        let status = if record.status == WorkerStatus::Stopped {
            // Deregistered mid-flight: stats recorded, now drop it.
            inner.remove(worker_id);
            WorkerStatus::Stopped
        } else if !success && record.consecutive_failures >= self.config.degrade_after_failures {
            record.status = WorkerStatus::Degraded;
            record.degraded_at = Some(Utc::now());
            warn!(
                worker_id,
                consecutive_failures = record.consecutive_failures,
                "Worker degraded — excluded from selection until cooldown"
            );
            self.events.publish(PipelineEvent::WorkerDegraded {
                worker_id: worker_id.to_string(),
                consecutive_failures: record.consecutive_failures,
            });
            WorkerStatus::Degraded
        } else {
            record.status = WorkerStatus::Idle;
            WorkerStatus::Idle
        };

        drop(inner);
        if status == WorkerStatus::Idle {
            self.freed.notify_waiters();
        }
        Ok(status)
    }

    /// Manually clear a Degraded worker back into rotation.
    pub fn reset_worker(&self, worker_id: &str) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.get_mut(worker_id).ok_or_else(|| {
            PipelineError::validation(format!("cannot reset unknown worker: {worker_id}"))
        })?;
        if record.status == WorkerStatus::Degraded {
            record.status = WorkerStatus::Idle;
            record.consecutive_failures = 0;
            record.degraded_at = None;
            info!(worker_id, "Worker manually reset");
        }
        drop(inner);
        self.freed.notify_waiters();
        Ok(())
    }

    /// Wait until a worker may have become selectable. Callers should
    /// re-check with `select_for_dispatch` after waking.
    pub async fn wait_for_free(&self) {
        self.freed.notified().await;
    }

    /// Read-only health snapshots for `status()`.
    pub fn health(&self) -> Vec<WorkerHealth> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<WorkerHealth> = inner
            .iter()
            .map(|(id, r)| WorkerHealth {
                worker_id: id.clone(),
                mode: r.mode,
                status: r.status,
                success_count: r.success_count,
                failure_count: r.failure_count,
                consecutive_failures: r.consecutive_failures,
                recent_success_rate: r.recent_success_rate(),
                last_heartbeat: r.last_heartbeat,
            })
            .collect();
        out.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
