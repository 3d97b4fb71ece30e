//! Alignment policy.
//!
//! The configurable policy evaluator behind the alignment component:
//! how well an opportunity fits current exposure limits and venue
//! diversity. Returns a value in [0,1]; implementations must be
//! deterministic so the scorer stays reproducible.

use crate::types::{MarketContext, Opportunity};

/// Policy evaluator for the alignment component of the composite score.
pub trait AlignmentPolicy: Send + Sync {
    /// Evaluate how well this opportunity aligns with policy, 0.0–1.0.
    fn evaluate(&self, opportunity: &Opportunity, context: &MarketContext) -> f64;
}

// ---------------------------------------------------------------------------
// Exposure + diversity policy
// ---------------------------------------------------------------------------

/// Default policy: exposure-cap headroom blended with counterpart
/// diversity (how loaded the opportunity's venues already are).
pub struct ExposurePolicy {
    /// Venue load at which the diversity term bottoms out at zero.
    max_venue_load: u32,
}

impl ExposurePolicy {
    pub fn new(max_venue_load: u32) -> Self {
        Self {
            max_venue_load: max_venue_load.max(1),
        }
    }

    fn diversity(&self, opportunity: &Opportunity, context: &MarketContext) -> f64 {
        let load = context
            .venue_load
            .get(&opportunity.source)
            .copied()
            .unwrap_or(0)
            .max(
                context
                    .venue_load
                    .get(&opportunity.target)
                    .copied()
                    .unwrap_or(0),
            );
        1.0 - (load.min(self.max_venue_load) as f64 / self.max_venue_load as f64)
    }
}

impl AlignmentPolicy for ExposurePolicy {
    fn evaluate(&self, opportunity: &Opportunity, context: &MarketContext) -> f64 {
        let headroom = context.headroom();
        let diversity = self.diversity(opportunity, context);
        (0.6 * headroom + 0.4 * diversity).clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Fixed policy (tests, calibration)
// ---------------------------------------------------------------------------

/// Policy returning a constant alignment, for tests and calibration runs.
pub struct FixedAlignment(pub f64);

impl AlignmentPolicy for FixedAlignment {
    fn evaluate(&self, _opportunity: &Opportunity, _context: &MarketContext) -> f64 {
        self.0.clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketContext, Opportunity};

    #[test]
    fn test_full_headroom_empty_venues() {
        let policy = ExposurePolicy::new(4);
        let opp = Opportunity::sample(100.0, 0.1);
        let ctx = MarketContext::sample();
        let a = policy.evaluate(&opp, &ctx);
        assert!((a - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_loaded_venue_reduces_alignment() {
        let policy = ExposurePolicy::new(4);
        let opp = Opportunity::sample(100.0, 0.1);
        let mut ctx = MarketContext::sample();
        ctx.venue_load.insert("uniswap".into(), 2);

        let a = policy.evaluate(&opp, &ctx);
        // diversity = 1 - 2/4 = 0.5 → 0.6·1.0 + 0.4·0.5 = 0.8
        assert!((a - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_saturated_venue_bottoms_out() {
        let policy = ExposurePolicy::new(4);
        let opp = Opportunity::sample(100.0, 0.1);
        let mut ctx = MarketContext::sample();
        ctx.venue_load.insert("sushiswap".into(), 10);

        let a = policy.evaluate(&opp, &ctx);
        assert!((a - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_no_headroom_no_diversity_is_zero() {
        let policy = ExposurePolicy::new(4);
        let opp = Opportunity::sample(100.0, 0.1);
        let mut ctx = MarketContext::sample();
        ctx.committed_exposure = ctx.exposure_cap;
        ctx.venue_load.insert("uniswap".into(), 4);

        assert_eq!(policy.evaluate(&opp, &ctx), 0.0);
    }

    #[test]
    fn test_fixed_alignment_clamps() {
        let opp = Opportunity::sample(1.0, 0.5);
        let ctx = MarketContext::sample();
        assert_eq!(FixedAlignment(0.9).evaluate(&opp, &ctx), 0.9);
        assert_eq!(FixedAlignment(1.7).evaluate(&opp, &ctx), 1.0);
        assert_eq!(FixedAlignment(-0.3).evaluate(&opp, &ctx), 0.0);
    }
}
