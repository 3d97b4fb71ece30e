//! Push event stream for external dashboards.
//!
//! Stage transitions, decisions, and interventions are published on a
//! broadcast channel; a bounded ring of recent events backs the REST
//! mirror. Consumers are strictly read-only — dropping or lagging
//! subscribers never affects the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::{ExecutionOutcome, Verdict, WorkerMode};

/// Capacity of the broadcast channel and the recent-events ring.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineEvent {
    PipelineStarted,
    PipelineStopped,
    PipelineHalted { reason: String },
    EmergencyStop,

    OpportunityRejected { reason: String },
    Scored { opportunity_id: Uuid, composite: f64 },
    Decided { decision_id: Uuid, opportunity_id: Uuid, verdict: Verdict, confidence: f64 },

    Dispatched { decision_id: Uuid, worker_id: String },
    ApprovalRequested { decision_id: Uuid, worker_id: String },
    ApprovalTimedOut { decision_id: Uuid, worker_id: String },
    ManualPending { decision_id: Uuid, worker_id: String },
    ExecutionCompleted {
        decision_id: Uuid,
        worker_id: String,
        outcome: ExecutionOutcome,
        shadow: bool,
    },

    WorkerRegistered { worker_id: String, mode: WorkerMode },
    WorkerDeregistered { worker_id: String },
    WorkerDegraded { worker_id: String, consecutive_failures: u32 },

    ThresholdsAdjusted {
        version: u64,
        execute_threshold: f64,
        reject_threshold: f64,
    },
    LearnerFrozen { rolling_success_rate: f64 },
    LearnerUnfrozen,
}

/// A published event with its timestamp, as stored in the recent ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: PipelineEvent,
}

/// Fan-out hub: broadcast channel plus a bounded recent-events ring.
pub struct EventBus {
    tx: broadcast::Sender<EventRecord>,
    recent: Mutex<VecDeque<EventRecord>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tx,
            recent: Mutex::new(VecDeque::with_capacity(EVENT_CAPACITY)),
        }
    }

    /// Publish an event. Never fails: a closed channel only means there
    /// are no live subscribers.
    pub fn publish(&self, event: PipelineEvent) {
        let record = EventRecord {
            at: Utc::now(),
            event,
        };
        {
            let mut recent = self.recent.lock().unwrap();
            if recent.len() == EVENT_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(record.clone());
        }
        let _ = self.tx.send(record);
    }

    /// Subscribe to the live stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.tx.subscribe()
    }

    /// Snapshot of the recent-events ring, oldest first.
    pub fn recent(&self) -> Vec<EventRecord> {
        self.recent.lock().unwrap().iter().cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
