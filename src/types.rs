//! Shared types for the HERMES pipeline.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that strategy, engine, and
//! collaborator modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::PipelineError;

// ---------------------------------------------------------------------------
// Opportunity
// ---------------------------------------------------------------------------

/// A raw candidate record as delivered by the market-discovery collaborator.
/// Not yet validated — convert to an [`Opportunity`] at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOpportunity {
    pub token_pair: String,
    pub source: String,
    pub target: String,
    pub profit_estimate: f64,
    pub risk_estimate: f64,
    pub timestamp: DateTime<Utc>,
}

/// A validated candidate action. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    /// Token pair identifier, e.g. "WETH/USDC".
    pub token_pair: String,
    /// Venue the opportunity was observed on.
    pub source: String,
    /// Venue the action would settle against.
    pub target: String,
    /// Estimated gross profit in quote units.
    pub profit_estimate: f64,
    /// Normalized failure probability, 0.0–1.0.
    pub risk_estimate: f64,
    pub timestamp: DateTime<Utc>,
}

impl Opportunity {
    /// Validate a raw record at the ingestion boundary.
    ///
    /// Malformed records (NaN/negative profit, risk outside [0,1],
    /// missing fields, source == target) are rejected here and never
    /// enter the pipeline.
    pub fn ingest(raw: RawOpportunity) -> Result<Self, PipelineError> {
        if raw.token_pair.trim().is_empty() {
            return Err(PipelineError::validation("token_pair is empty"));
        }
        if raw.source.trim().is_empty() || raw.target.trim().is_empty() {
            return Err(PipelineError::validation("source/target is empty"));
        }
        if raw.source == raw.target {
            return Err(PipelineError::validation(format!(
                "source and target are the same venue: {}",
                raw.source
            )));
        }
        if !raw.profit_estimate.is_finite() || raw.profit_estimate < 0.0 {
            return Err(PipelineError::validation(format!(
                "profit_estimate is not a finite non-negative number: {}",
                raw.profit_estimate
            )));
        }
        if !raw.risk_estimate.is_finite() || !(0.0..=1.0).contains(&raw.risk_estimate) {
            return Err(PipelineError::validation(format!(
                "risk_estimate outside [0,1]: {}",
                raw.risk_estimate
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            token_pair: raw.token_pair,
            source: raw.source,
            target: raw.target,
            profit_estimate: raw.profit_estimate,
            risk_estimate: raw.risk_estimate,
            timestamp: raw.timestamp,
        })
    }

    /// Helper to build a test/sample opportunity with sensible defaults.
    pub fn sample(profit: f64, risk: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            token_pair: "WETH/USDC".to_string(),
            source: "uniswap".to_string(),
            target: "sushiswap".to_string(),
            profit_estimate: profit,
            risk_estimate: risk,
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}→{} (profit: ${:.2} | risk: {:.0}%)",
            self.token_pair,
            self.source,
            self.target,
            self.profit_estimate,
            self.risk_estimate * 100.0,
        )
    }
}

// ---------------------------------------------------------------------------
// Market context
// ---------------------------------------------------------------------------

/// Live context supplied alongside a snapshot: current exposure and
/// per-venue load. Read-only input to scoring and alignment policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    /// Total capital the pipeline may put at risk.
    pub exposure_cap: f64,
    /// Capital currently committed to in-flight executions.
    pub committed_exposure: f64,
    /// In-flight execution count per venue.
    pub venue_load: HashMap<String, u32>,
    pub timestamp: DateTime<Utc>,
}

impl MarketContext {
    /// Fraction of the exposure cap still available, 0.0–1.0.
    pub fn headroom(&self) -> f64 {
        if self.exposure_cap <= 0.0 {
            return 0.0;
        }
        (1.0 - self.committed_exposure / self.exposure_cap).clamp(0.0, 1.0)
    }

    /// A relaxed copy for optimize-pass re-scoring: assumes a fraction of
    /// the committed exposure has been released.
    pub fn relaxed(&self, factor: f64) -> Self {
        let mut relaxed = self.clone();
        relaxed.committed_exposure *= (1.0 - factor).clamp(0.0, 1.0);
        relaxed
    }

    pub fn sample() -> Self {
        Self {
            exposure_cap: 10_000.0,
            committed_exposure: 0.0,
            venue_load: HashMap::new(),
            timestamp: Utc::now(),
        }
    }
}

/// A batch of candidate records plus the context they were observed in.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub opportunities: Vec<RawOpportunity>,
    pub context: MarketContext,
}

// ---------------------------------------------------------------------------
// Score
// ---------------------------------------------------------------------------

/// Multi-factor score for one opportunity. Created once by the scorer,
/// never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub opportunity_id: Uuid,
    /// Normalized profit/exposure component, 0.0–1.0.
    pub profit_component: f64,
    /// 1 − normalized failure probability, 0.0–1.0.
    pub risk_component: f64,
    /// Policy-alignment component, 0.0–1.0.
    pub alignment_component: f64,
    /// Profit-viability gate applied to the weighted sum, 0.0–1.0.
    pub viability: f64,
    /// Weighted composite, guaranteed within [0,1].
    pub composite: f64,
}

// ---------------------------------------------------------------------------
// Weights & thresholds
// ---------------------------------------------------------------------------

/// Scoring weights. Must sum to 1 — validated at load time, renormalized
/// after every learner adjustment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WeightVector {
    pub profit: f64,
    pub risk: f64,
    pub alignment: f64,
}

impl WeightVector {
    pub fn sum(&self) -> f64 {
        self.profit + self.risk + self.alignment
    }

    /// Check the sum-to-one invariant within floating tolerance.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (name, w) in [
            ("profit", self.profit),
            ("risk", self.risk),
            ("alignment", self.alignment),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(PipelineError::fatal(format!(
                    "weight '{name}' is not a finite non-negative number: {w}"
                )));
            }
        }
        if (self.sum() - 1.0).abs() > 1e-6 {
            return Err(PipelineError::fatal(format!(
                "weight vector must sum to 1, got {:.6}",
                self.sum()
            )));
        }
        Ok(())
    }

    /// Rescale so the components sum to exactly 1.
    pub fn normalized(&self) -> Self {
        let s = self.sum();
        if s <= 0.0 {
            // Degenerate vector: fall back to uniform weights.
            return Self {
                profit: 1.0 / 3.0,
                risk: 1.0 / 3.0,
                alignment: 1.0 / 3.0,
            };
        }
        Self {
            profit: self.profit / s,
            risk: self.risk / s,
            alignment: self.alignment / s,
        }
    }
}

impl Default for WeightVector {
    fn default() -> Self {
        Self {
            profit: 0.4,
            risk: 0.4,
            alignment: 0.2,
        }
    }
}

/// Adaptive decision thresholds. Single process-wide instance, mutated
/// exclusively by the learner; readers take point-in-time clones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdState {
    pub execute_threshold: f64,
    pub reject_threshold: f64,
    pub weights: WeightVector,
    /// Strictly increasing; bumped by exactly one per applied update.
    pub version: u64,
}

impl ThresholdState {
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.weights.validate()?;
        for (name, t) in [
            ("execute_threshold", self.execute_threshold),
            ("reject_threshold", self.reject_threshold),
        ] {
            if !t.is_finite() || !(0.0..=1.0).contains(&t) {
                return Err(PipelineError::fatal(format!("{name} outside [0,1]: {t}")));
            }
        }
        if self.reject_threshold >= self.execute_threshold {
            return Err(PipelineError::fatal(format!(
                "reject_threshold ({}) must be below execute_threshold ({})",
                self.reject_threshold, self.execute_threshold
            )));
        }
        Ok(())
    }
}

impl Default for ThresholdState {
    fn default() -> Self {
        Self {
            execute_threshold: 0.7,
            reject_threshold: 0.2,
            weights: WeightVector::default(),
            version: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Verdict on a scored opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Dispatch to an execution worker.
    Execute,
    /// Intermediate: re-score with relaxed exposure assumptions.
    Optimize,
    /// Keep out of execution this cycle without rejecting outright.
    Hold,
    /// Below the reject threshold — discard.
    Reject,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Execute => write!(f, "EXECUTE"),
            Verdict::Optimize => write!(f, "OPTIMIZE"),
            Verdict::Hold => write!(f, "HOLD"),
            Verdict::Reject => write!(f, "REJECT"),
        }
    }
}

/// A decision on one opportunity, with the threshold snapshot it was
/// made under and a per-component reasoning trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub verdict: Verdict,
    /// Equals the composite score.
    pub confidence: f64,
    /// Human-readable trace of each component's contribution and the
    /// threshold comparisons, for observability and tests.
    pub reasoning: Vec<String>,
    /// The exact thresholds this decision was made against.
    pub threshold_snapshot: ThresholdState,
    pub decided_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// Autonomy policy for an execution worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerMode {
    /// Dispatch immediately on Execute.
    Autonomous,
    /// Dispatch only after an external approval signal arrives in time.
    Supervised,
    /// Never auto-dispatched; surfaced on a pending queue.
    Manual,
    /// Full pipeline, but the executor call is simulated (shadow).
    Learning,
}

impl fmt::Display for WorkerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerMode::Autonomous => write!(f, "autonomous"),
            WorkerMode::Supervised => write!(f, "supervised"),
            WorkerMode::Manual => write!(f, "manual"),
            WorkerMode::Learning => write!(f, "learning"),
        }
    }
}

impl std::str::FromStr for WorkerMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "autonomous" | "auto" => Ok(WorkerMode::Autonomous),
            "supervised" => Ok(WorkerMode::Supervised),
            "manual" => Ok(WorkerMode::Manual),
            "learning" | "shadow" => Ok(WorkerMode::Learning),
            _ => Err(PipelineError::validation(format!(
                "unknown worker mode: {s}"
            ))),
        }
    }
}

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    Idle,
    Assigned,
    Executing,
    /// Too many consecutive failures — excluded from selection until the
    /// cooldown elapses or a manual reset.
    Degraded,
    Stopped,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Assigned => write!(f, "assigned"),
            WorkerStatus::Executing => write!(f, "executing"),
            WorkerStatus::Degraded => write!(f, "degraded"),
            WorkerStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Registration record for an execution worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub worker_id: String,
    pub mode: WorkerMode,
    #[serde(default)]
    pub capability_tags: Vec<String>,
}

impl WorkerRegistration {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.worker_id.trim().is_empty() {
            return Err(PipelineError::validation("worker_id is empty"));
        }
        Ok(())
    }
}

/// Read-only health snapshot of one worker, as reported by `status()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub worker_id: String,
    pub mode: WorkerMode,
    pub status: WorkerStatus,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    /// Success rate over the recent outcome window, if any outcomes exist.
    pub recent_success_rate: Option<f64>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Execution results
// ---------------------------------------------------------------------------

/// Why an execution attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The executor did not respond within the configured window.
    Timeout,
    /// The venue or executor rejected the action.
    Rejected,
    /// The executor reported an error mid-flight.
    Errored,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Rejected => write!(f, "rejected"),
            FailureKind::Errored => write!(f, "errored"),
        }
    }
}

/// Terminal outcome of one dispatched execution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    Success,
    Failure(FailureKind),
    /// Cancelled by emergency stop before completion.
    Cancelled,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }
}

/// Result of one dispatched execution. Created by the dispatch path at
/// completion; read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub decision_id: Uuid,
    pub worker_id: String,
    pub outcome: ExecutionOutcome,
    /// Realized profit in quote units (0 for failures and cancellations).
    pub realized_profit: f64,
    pub duration_ms: u64,
    /// True for Learning-mode shadow executions — calibration data that
    /// had no real external effect.
    pub shadow: bool,
    pub completed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Pipeline status
// ---------------------------------------------------------------------------

/// Pipeline lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    Running,
    /// Intake stopped, in-flight work finishing.
    Draining,
    Stopped,
    /// Fatal error or emergency stop — restart required.
    Halted,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Running => write!(f, "running"),
            PipelineState::Draining => write!(f, "draining"),
            PipelineState::Stopped => write!(f, "stopped"),
            PipelineState::Halted => write!(f, "halted"),
        }
    }
}

/// Per-stage counters, snapshotted for `status()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageCounts {
    pub opportunities_received: u64,
    pub opportunities_rejected: u64,
    pub scored: u64,
    pub decided_execute: u64,
    pub decided_hold: u64,
    pub decided_reject: u64,
    pub dispatched: u64,
    pub executions_succeeded: u64,
    pub executions_failed: u64,
    pub executions_cancelled: u64,
    pub shadow_executions: u64,
    pub approvals_timed_out: u64,
    pub manual_pending_created: u64,
}

/// Full pull-based status surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub counts: StageCounts,
    pub thresholds: ThresholdState,
    pub workers: Vec<WorkerHealth>,
    pub pending_manual: usize,
    pub learner_frozen: bool,
    pub rolling_success_rate: Option<f64>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_ingest_valid() {
        let opp = Opportunity::ingest(raw(100.0, 0.1)).unwrap();
        assert_eq!(opp.token_pair, "WETH/USDC");
        assert_eq!(opp.profit_estimate, 100.0);
    }

    #[test]
    fn test_ingest_rejects_nan_profit() {
        let err = Opportunity::ingest(raw(f64::NAN, 0.1)).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_ingest_rejects_negative_profit() {
        assert!(Opportunity::ingest(raw(-5.0, 0.1)).is_err());
    }

    #[test]
    fn test_ingest_rejects_risk_out_of_range() {
        assert!(Opportunity::ingest(raw(10.0, 1.5)).is_err());
        assert!(Opportunity::ingest(raw(10.0, -0.1)).is_err());
    }

    #[test]
    fn test_ingest_rejects_empty_fields() {
        let mut r = raw(10.0, 0.1);
        r.token_pair = "  ".into();
        assert!(Opportunity::ingest(r).is_err());
    }

    #[test]
    fn test_ingest_rejects_same_venue() {
        let mut r = raw(10.0, 0.1);
        r.target = r.source.clone();
        assert!(Opportunity::ingest(r).is_err());
    }

    #[test]
    fn test_weight_vector_validation() {
        assert!(WeightVector::default().validate().is_ok());
        let bad = WeightVector {
            profit: 0.5,
            risk: 0.5,
            alignment: 0.5,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_weight_vector_normalized() {
        let w = WeightVector {
            profit: 2.0,
            risk: 1.0,
            alignment: 1.0,
        }
        .normalized();
        assert!((w.sum() - 1.0).abs() < 1e-12);
        assert!((w.profit - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_state_validation() {
        assert!(ThresholdState::default().validate().is_ok());

        let inverted = ThresholdState {
            execute_threshold: 0.2,
            reject_threshold: 0.7,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_worker_mode_from_str() {
        assert_eq!(
            "autonomous".parse::<WorkerMode>().unwrap(),
            WorkerMode::Autonomous
        );
        assert_eq!("shadow".parse::<WorkerMode>().unwrap(), WorkerMode::Learning);
        assert!("yolo".parse::<WorkerMode>().is_err());
    }

    #[test]
    fn test_context_headroom() {
        let mut ctx = MarketContext::sample();
        assert_eq!(ctx.headroom(), 1.0);
        ctx.committed_exposure = 7_500.0;
        assert!((ctx.headroom() - 0.25).abs() < 1e-12);
        ctx.committed_exposure = 20_000.0;
        assert_eq!(ctx.headroom(), 0.0);
    }

    #[test]
    fn test_context_relaxed_releases_exposure() {
        let mut ctx = MarketContext::sample();
        ctx.committed_exposure = 8_000.0;
        let relaxed = ctx.relaxed(0.5);
        assert!((relaxed.committed_exposure - 4_000.0).abs() < 1e-9);
        assert!(relaxed.headroom() > ctx.headroom());
    }

    #[test]
    fn test_registration_validation() {
        let reg = WorkerRegistration {
            worker_id: "w1".into(),
            mode: WorkerMode::Autonomous,
            capability_tags: vec![],
        };
        assert!(reg.validate().is_ok());

        let empty = WorkerRegistration {
            worker_id: "".into(),
            mode: WorkerMode::Manual,
            capability_tags: vec![],
        };
        assert!(empty.validate().is_err());
    }
}
