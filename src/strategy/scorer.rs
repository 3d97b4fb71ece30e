//! Opportunity scorer.
//!
//! Computes the deterministic multi-factor composite for a candidate:
//! a saturating profit/exposure component, the risk complement, and the
//! alignment policy, combined under the current weight vector and gated
//! by profit viability. Identical inputs always reproduce identical
//! output — there is no hidden randomness anywhere in this module.

use std::sync::Arc;
use tracing::debug;

use crate::error::PipelineError;
use crate::strategy::policy::AlignmentPolicy;
use crate::types::{MarketContext, Opportunity, Score, WeightVector};

// ---------------------------------------------------------------------------
// Configuration (defaults — overridden by config.toml at runtime)
// ---------------------------------------------------------------------------

pub struct ScorerConfig {
    /// Normalization pivot for the profit component: `p / (p + pivot)`.
    pub profit_pivot: f64,
    /// Gross profit below which the composite is scaled toward zero.
    pub min_viable_profit: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            profit_pivot: 66.67,
            min_viable_profit: 10.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

pub struct OpportunityScorer {
    config: ScorerConfig,
    policy: Arc<dyn AlignmentPolicy>,
}

impl OpportunityScorer {
    pub fn new(config: ScorerConfig, policy: Arc<dyn AlignmentPolicy>) -> Self {
        Self { config, policy }
    }

    /// Score an opportunity under the given weights and market context.
    ///
    /// The opportunity is assumed to have passed boundary validation;
    /// a non-finite intermediate still surfaces as a Validation error
    /// rather than poisoning later stages.
    pub fn score(
        &self,
        opportunity: &Opportunity,
        weights: &WeightVector,
        context: &MarketContext,
    ) -> Result<Score, PipelineError> {
        self.score_relaxed(opportunity, weights, context, 0.0)
    }

    /// Score with relaxed exposure assumptions (optimize pass).
    ///
    /// `relaxation` ∈ [0,1) shrinks both the profit pivot and the
    /// assumed committed exposure, modelling a smaller position in a
    /// less contended book.
    pub fn score_relaxed(
        &self,
        opportunity: &Opportunity,
        weights: &WeightVector,
        context: &MarketContext,
        relaxation: f64,
    ) -> Result<Score, PipelineError> {
        let relaxation = relaxation.clamp(0.0, 0.99);
        let pivot = self.config.profit_pivot * (1.0 - relaxation);
        let context = if relaxation > 0.0 {
            context.relaxed(relaxation)
        } else {
            context.clone()
        };

        let profit = opportunity.profit_estimate;
        let profit_component = profit / (profit + pivot);
        let risk_component = (1.0 - opportunity.risk_estimate).clamp(0.0, 1.0);
        let alignment_component = self
            .policy
            .evaluate(opportunity, &context)
            .clamp(0.0, 1.0);

        let viability = if self.config.min_viable_profit > 0.0 {
            (profit / self.config.min_viable_profit).min(1.0)
        } else {
            1.0
        };

        let weighted = weights.profit * profit_component
            + weights.risk * risk_component
            + weights.alignment * alignment_component;
        let composite = (weighted * viability).clamp(0.0, 1.0);

        if !composite.is_finite() {
            return Err(PipelineError::validation(format!(
                "composite score is not finite for opportunity {}",
                opportunity.id
            )));
        }

        debug!(
            opportunity_id = %opportunity.id,
            profit = format!("{profit_component:.3}"),
            risk = format!("{risk_component:.3}"),
            alignment = format!("{alignment_component:.3}"),
            viability = format!("{viability:.3}"),
            composite = format!("{composite:.3}"),
            relaxation,
            "Opportunity scored"
        );

        Ok(Score {
            opportunity_id: opportunity.id,
            profit_component,
            risk_component,
            alignment_component,
            viability,
            composite,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
