//! Deterministic simulators for the collaborator seams.
//!
//! Used by the integration tests and the dry-run binary: a feed that
//! replays scripted snapshot batches, and an executor with scripted
//! outcomes, a configurable latency, and full call recording.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::collab::{Executor, MarketSnapshotProvider};
use crate::error::PipelineError;
use crate::types::{
    Decision, ExecutionOutcome, MarketContext, MarketSnapshot, Opportunity, RawOpportunity,
};

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

/// Replays scripted snapshot batches in order, then idles with empty
/// snapshots.
pub struct SimulatedFeed {
    batches: Mutex<VecDeque<MarketSnapshot>>,
}

impl SimulatedFeed {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_batch(&self, opportunities: Vec<RawOpportunity>, context: MarketContext) {
        self.batches.lock().unwrap().push_back(MarketSnapshot {
            opportunities,
            context,
        });
    }

    pub fn remaining_batches(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

impl Default for SimulatedFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketSnapshotProvider for SimulatedFeed {
    async fn next_snapshot(&self) -> Result<MarketSnapshot, PipelineError> {
        let next = self.batches.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| MarketSnapshot {
            opportunities: Vec::new(),
            context: MarketContext::sample(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// One recorded executor invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub worker_id: String,
    pub decision_id: Uuid,
    pub opportunity_id: Uuid,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Scripted execution backend. Outcomes are consumed front-to-back;
/// once the script runs out every call succeeds.
pub struct SimulatedExecutor {
    outcomes: Mutex<VecDeque<ExecutionOutcome>>,
    latency: Mutex<Duration>,
    force_error: AtomicBool,
    calls: Mutex<Vec<RecordedCall>>,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            latency: Mutex::new(Duration::from_millis(0)),
            force_error: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Script the outcomes of upcoming calls, oldest first.
    pub fn script_outcomes(&self, outcomes: impl IntoIterator<Item = ExecutionOutcome>) {
        self.outcomes.lock().unwrap().extend(outcomes);
    }

    /// Simulated execution latency applied to every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Make the next call return an execution error instead of an
    /// outcome.
    pub fn force_error(&self) {
        self.force_error.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn execute(
        &self,
        worker_id: &str,
        decision: &Decision,
        opportunity: &Opportunity,
    ) -> Result<ExecutionOutcome, PipelineError> {
        self.calls.lock().unwrap().push(RecordedCall {
            worker_id: worker_id.to_string(),
            decision_id: decision.id,
            opportunity_id: opportunity.id,
            started_at: Utc::now(),
        });

        if self.force_error.swap(false, Ordering::SeqCst) {
            return Err(PipelineError::execution("simulated executor error"));
        }

        let latency = *self.latency.lock().unwrap();
        if latency > Duration::ZERO {
            tokio::time::sleep(latency).await;
        }

        let scripted = self.outcomes.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or(ExecutionOutcome::Success))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
