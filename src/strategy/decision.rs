//! Decision engine.
//!
//! Turns a composite score into a verdict against a point-in-time
//! threshold snapshot. Scores between the two thresholds get up to two
//! optimize passes with relaxed exposure assumptions before falling
//! back to Hold. Every decision carries a reasoning trace recording
//! each component's contribution.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::strategy::scorer::OpportunityScorer;
use crate::types::{Decision, MarketContext, Opportunity, Score, ThresholdState, Verdict};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub struct DecisionEngineConfig {
    /// Optimize passes before falling back to Hold (1 or 2).
    pub optimize_attempts: u32,
    /// Exposure relaxation applied per optimize pass.
    pub optimize_relaxation: f64,
}

impl Default for DecisionEngineConfig {
    fn default() -> Self {
        Self {
            optimize_attempts: 2,
            optimize_relaxation: 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct DecisionEngine {
    scorer: OpportunityScorer,
    config: DecisionEngineConfig,
}

impl DecisionEngine {
    pub fn new(scorer: OpportunityScorer, config: DecisionEngineConfig) -> Self {
        Self { scorer, config }
    }

    /// Score and decide one opportunity against a threshold snapshot.
    ///
    /// The snapshot must be a consistent point-in-time clone — the
    /// caller takes it once and this method never re-reads shared
    /// state, so a concurrent learner write cannot interleave.
    ///
    /// Returns the decision plus the score that produced the final
    /// verdict (the relaxed score when an optimize pass triggered
    /// Execute).
    pub fn decide(
        &self,
        opportunity: &Opportunity,
        context: &MarketContext,
        thresholds: &ThresholdState,
    ) -> Result<(Decision, Score), PipelineError> {
        let score = self
            .scorer
            .score(opportunity, &thresholds.weights, context)?;

        let mut reasoning = component_trace(&score, thresholds);
        let mut final_score = score.clone();

        let verdict = if score.composite >= thresholds.execute_threshold {
            reasoning.push(format!(
                "composite {:.3} ≥ execute {:.3} → EXECUTE",
                score.composite, thresholds.execute_threshold
            ));
            Verdict::Execute
        } else if score.composite <= thresholds.reject_threshold {
            reasoning.push(format!(
                "composite {:.3} ≤ reject {:.3} → REJECT",
                score.composite, thresholds.reject_threshold
            ));
            Verdict::Reject
        } else {
            reasoning.push(format!(
                "composite {:.3} between thresholds → OPTIMIZE",
                score.composite
            ));
            self.optimize(
                opportunity,
                context,
                thresholds,
                &mut reasoning,
                &mut final_score,
            )?
        };

        let decision = Decision {
            id: Uuid::new_v4(),
            opportunity_id: opportunity.id,
            verdict,
            confidence: final_score.composite,
            reasoning,
            threshold_snapshot: thresholds.clone(),
            decided_at: Utc::now(),
        };

        info!(
            opportunity_id = %opportunity.id,
            verdict = %decision.verdict,
            confidence = format!("{:.3}", decision.confidence),
            threshold_version = thresholds.version,
            "Decision made"
        );

        Ok((decision, final_score))
    }

    /// Re-score with progressively relaxed exposure assumptions. The
    /// first relaxed composite clearing the execute threshold yields
    /// Execute; otherwise the decision settles at Hold.
    fn optimize(
        &self,
        opportunity: &Opportunity,
        context: &MarketContext,
        thresholds: &ThresholdState,
        reasoning: &mut Vec<String>,
        final_score: &mut Score,
    ) -> Result<Verdict, PipelineError> {
        for attempt in 1..=self.config.optimize_attempts {
            let relaxation =
                (self.config.optimize_relaxation * attempt as f64).clamp(0.0, 0.9);
            let relaxed = self.scorer.score_relaxed(
                opportunity,
                &thresholds.weights,
                context,
                relaxation,
            )?;

            debug!(
                opportunity_id = %opportunity.id,
                attempt,
                relaxation = format!("{relaxation:.2}"),
                composite = format!("{:.3}", relaxed.composite),
                "Optimize pass"
            );

            if relaxed.composite >= thresholds.execute_threshold {
                reasoning.push(format!(
                    "optimize pass {attempt} (relaxation {relaxation:.2}): composite {:.3} ≥ execute {:.3} → EXECUTE",
                    relaxed.composite, thresholds.execute_threshold
                ));
                *final_score = relaxed;
                return Ok(Verdict::Execute);
            }

            reasoning.push(format!(
                "optimize pass {attempt} (relaxation {relaxation:.2}): composite {:.3} still below execute",
                relaxed.composite
            ));
        }

        reasoning.push("optimize exhausted → HOLD".to_string());
        Ok(Verdict::Hold)
    }
}

/// Per-component contribution lines for the reasoning trace.
fn component_trace(score: &Score, thresholds: &ThresholdState) -> Vec<String> {
    let w = &thresholds.weights;
    vec![
        format!(
            "profit {:.3} × w {:.2} = {:.3}",
            score.profit_component,
            w.profit,
            score.profit_component * w.profit
        ),
        format!(
            "risk {:.3} × w {:.2} = {:.3}",
            score.risk_component,
            w.risk,
            score.risk_component * w.risk
        ),
        format!(
            "alignment {:.3} × w {:.2} = {:.3}",
            score.alignment_component,
            w.alignment,
            score.alignment_component * w.alignment
        ),
        format!("viability gate {:.3}", score.viability),
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
