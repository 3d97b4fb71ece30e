//! Collaborator seams.
//!
//! The pipeline talks to the outside world through two traits: a
//! market-discovery feed that produces candidate snapshots, and an
//! execution backend that carries out approved decisions. Production
//! integrations and the deterministic simulators both live behind
//! these seams.

pub mod sim;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::types::{Decision, ExecutionOutcome, MarketSnapshot, Opportunity};

pub use sim::{SimulatedExecutor, SimulatedFeed};

/// Market-discovery collaborator: polled by the intake loop.
#[async_trait]
pub trait MarketSnapshotProvider: Send + Sync {
    /// Produce the next batch of raw candidates plus the context they
    /// were observed in. An empty batch is a normal idle poll.
    async fn next_snapshot(&self) -> Result<MarketSnapshot, PipelineError>;
}

/// Execution backend: carries out one decided opportunity.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        worker_id: &str,
        decision: &Decision,
        opportunity: &Opportunity,
    ) -> Result<ExecutionOutcome, PipelineError>;
}
