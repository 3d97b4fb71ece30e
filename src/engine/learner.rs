//! Learner.
//!
//! Periodically nudges the shared threshold state toward better
//! outcomes: thresholds tighten when the rolling success rate runs low
//! and relax when it runs high, and component weights drift toward
//! whatever separates successes from failures. Every adjustment is
//! capped per cycle and weights are renormalized to sum 1.
//!
//! A divergence guard watches the rolling success rate; after enough
//! consecutive cycles below the floor it freezes all adjustments and
//! raises an alert. Frozen thresholds stay fixed until an operator
//! resets the guard.

use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::config::LearnerConfig;
use crate::engine::feedback::FeedbackCollector;
use crate::events::{EventBus, PipelineEvent};
use crate::types::ThresholdState;

/// Rolling success rate the threshold adjustment steers toward.
const TARGET_SUCCESS_RATE: f64 = 0.6;
/// Proportional gain from rate error to threshold delta.
const THRESHOLD_GAIN: f64 = 0.1;
/// Proportional gain from component separation to weight delta.
const WEIGHT_GAIN: f64 = 0.05;

const EXECUTE_CEILING: f64 = 0.95;
const REJECT_FLOOR: f64 = 0.01;
const WEIGHT_FLOOR: f64 = 0.01;

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct LearnerStatus {
    pub frozen: bool,
    pub low_cycles: u32,
    pub cycles_run: u64,
}

pub struct Learner {
    config: LearnerConfig,
    thresholds: Arc<RwLock<ThresholdState>>,
    events: Arc<EventBus>,
    frozen: bool,
    low_cycles: u32,
    cycles_run: u64,
}

impl Learner {
    pub fn new(
        config: LearnerConfig,
        thresholds: Arc<RwLock<ThresholdState>>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            thresholds,
            events,
            frozen: false,
            low_cycles: 0,
            cycles_run: 0,
        }
    }

    pub fn status(&self) -> LearnerStatus {
        LearnerStatus {
            frozen: self.frozen,
            low_cycles: self.low_cycles,
            cycles_run: self.cycles_run,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Clear the divergence guard after operator intervention.
    pub fn reset_guard(&mut self) {
        self.low_cycles = 0;
        if self.frozen {
            self.frozen = false;
            self.events.publish(PipelineEvent::LearnerUnfrozen);
            info!("Learner divergence guard reset, adjustments resume");
        }
    }

    /// Run one learning cycle against the feedback buffer.
    ///
    /// Returns the newly published threshold state, or None when there
    /// is nothing to learn from or the guard is frozen.
    pub fn run_cycle(&mut self, collector: &FeedbackCollector) -> Option<ThresholdState> {
        let rate = collector.rolling_success_rate()?;
        self.cycles_run += 1;

        if rate < self.config.divergence_floor {
            self.low_cycles += 1;
            if self.low_cycles >= self.config.freeze_after_cycles && !self.frozen {
                self.frozen = true;
                warn!(
                    rolling_success_rate = format!("{rate:.3}"),
                    low_cycles = self.low_cycles,
                    "Learner frozen: success rate diverged below floor"
                );
                self.events.publish(PipelineEvent::LearnerFrozen {
                    rolling_success_rate: rate,
                });
            }
        } else if !self.frozen {
            self.low_cycles = 0;
        }

        if self.frozen {
            return None;
        }

        let current = self.thresholds.read().unwrap().clone();
        let next = self.adjusted(&current, rate, collector);

        // Clamping keeps the state valid; a failure here means a bug,
        // and skipping the cycle is safer than publishing bad state.
        if next.validate().is_err() {
            warn!(version = current.version, "Learner produced invalid state, cycle skipped");
            return None;
        }

        *self.thresholds.write().unwrap() = next.clone();
        self.events.publish(PipelineEvent::ThresholdsAdjusted {
            version: next.version,
            execute_threshold: next.execute_threshold,
            reject_threshold: next.reject_threshold,
        });
        info!(
            version = next.version,
            execute_threshold = format!("{:.3}", next.execute_threshold),
            reject_threshold = format!("{:.3}", next.reject_threshold),
            rolling_success_rate = format!("{rate:.3}"),
            "Thresholds adjusted"
        );

        Some(next)
    }

    /// Compute the next threshold state from the current one.
    ///
    /// A low success rate raises the execute threshold (be pickier); a
    /// high one lowers it. The reject threshold follows at half the
    /// magnitude, always keeping the configured gap.
    fn adjusted(
        &self,
        current: &ThresholdState,
        rate: f64,
        collector: &FeedbackCollector,
    ) -> ThresholdState {
        let gap = self.config.min_threshold_gap;
        let delta = ((TARGET_SUCCESS_RATE - rate) * THRESHOLD_GAIN)
            .clamp(-self.config.max_delta, self.config.max_delta);

        let execute = (current.execute_threshold + delta)
            .clamp(REJECT_FLOOR + gap, EXECUTE_CEILING);
        let reject = (current.reject_threshold + delta * 0.5)
            .clamp(REJECT_FLOOR, execute - gap);

        let mut weights = current.weights.clone();
        if let Some(sep) = collector.component_separation() {
            let cap = self.config.max_delta;
            weights.profit =
                (weights.profit + (sep.profit * WEIGHT_GAIN).clamp(-cap, cap)).max(WEIGHT_FLOOR);
            weights.risk =
                (weights.risk + (sep.risk * WEIGHT_GAIN).clamp(-cap, cap)).max(WEIGHT_FLOOR);
            weights.alignment = (weights.alignment
                + (sep.alignment * WEIGHT_GAIN).clamp(-cap, cap))
            .max(WEIGHT_FLOOR);
        }

        ThresholdState {
            execute_threshold: execute,
            reject_threshold: reject,
            weights: weights.normalized(),
            version: current.version + 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::engine::feedback::{FeedbackCollector, FeedbackSample};
    use crate::types::{ExecutionOutcome, ExecutionResult, FailureKind, Score};
    use chrono::Utc;
    use uuid::Uuid;

    fn make_learner(config: LearnerConfig) -> (Learner, Arc<RwLock<ThresholdState>>, Arc<EventBus>) {
        let thresholds = Arc::new(RwLock::new(ThresholdState::default()));
        let events = Arc::new(EventBus::new());
        let learner = Learner::new(config, Arc::clone(&thresholds), Arc::clone(&events));
        (learner, thresholds, events)
    }

    fn sample(outcome: ExecutionOutcome, profit_comp: f64) -> FeedbackSample {
        FeedbackSample {
            result: ExecutionResult {
                decision_id: Uuid::new_v4(),
                worker_id: "w1".into(),
                outcome,
                realized_profit: 0.0,
                duration_ms: 1,
                shadow: false,
                completed_at: Utc::now(),
            },
            score: Score {
                opportunity_id: Uuid::new_v4(),
                profit_component: profit_comp,
                risk_component: 0.8,
                alignment_component: 0.7,
                viability: 1.0,
                composite: 0.75,
            },
            profit_estimate: 50.0,
        }
    }

    fn fill(collector: &mut FeedbackCollector, successes: usize, failures: usize) {
        for _ in 0..successes {
            collector.record(sample(ExecutionOutcome::Success, 0.9));
        }
        for _ in 0..failures {
            collector.record(sample(
                ExecutionOutcome::Failure(FailureKind::Errored),
                0.3,
            ));
        }
    }

    #[test]
    fn test_empty_buffer_skips_cycle() {
        let (mut learner, thresholds, _) =
            make_learner(AppConfig::default_for_tests().learner);
        let collector = FeedbackCollector::new(16);
        assert!(learner.run_cycle(&collector).is_none());
        assert_eq!(learner.status().cycles_run, 0);
        assert_eq!(thresholds.read().unwrap().version, 0);
    }

    #[test]
    fn test_low_success_rate_tightens_thresholds() {
        let (mut learner, thresholds, _) =
            make_learner(AppConfig::default_for_tests().learner);
        let mut collector = FeedbackCollector::new(32);
        // 40% success is below the 60% target: expect tightening, with
        // the per-cycle delta capped at 0.05.
        fill(&mut collector, 4, 6);

        let next = learner.run_cycle(&collector).unwrap();
        assert!(next.execute_threshold > 0.7);
        assert!(next.execute_threshold - 0.7 <= 0.05 + 1e-9);
        assert_eq!(next.version, 1);
        assert_eq!(thresholds.read().unwrap().version, 1);
    }

    #[test]
    fn test_high_success_rate_relaxes_thresholds() {
        let (mut learner, _, _) = make_learner(AppConfig::default_for_tests().learner);
        let mut collector = FeedbackCollector::new(32);
        fill(&mut collector, 10, 1);

        let next = learner.run_cycle(&collector).unwrap();
        assert!(next.execute_threshold < 0.7);
        assert!(0.7 - next.execute_threshold <= 0.05 + 1e-9);
    }

    #[test]
    fn test_delta_honors_configured_cap() {
        let mut config = AppConfig::default_for_tests().learner;
        config.max_delta = 0.01;
        let (mut learner, _, _) = make_learner(config);
        let mut collector = FeedbackCollector::new(32);
        fill(&mut collector, 3, 7);

        let next = learner.run_cycle(&collector).unwrap();
        assert!((next.execute_threshold - 0.7).abs() <= 0.01 + 1e-9);
    }

    #[test]
    fn test_threshold_gap_preserved() {
        let (mut learner, _, _) = make_learner(AppConfig::default_for_tests().learner);
        let mut collector = FeedbackCollector::new(64);
        fill(&mut collector, 10, 1);

        // Relax repeatedly: the gap between thresholds must never close
        // below the configured minimum.
        for _ in 0..50 {
            if let Some(next) = learner.run_cycle(&collector) {
                assert!(next.execute_threshold - next.reject_threshold >= 0.1 - 1e-9);
                assert!(next.validate().is_ok());
            }
        }
    }

    #[test]
    fn test_weights_drift_toward_separating_component_and_renormalize() {
        let (mut learner, _, _) = make_learner(AppConfig::default_for_tests().learner);
        let mut collector = FeedbackCollector::new(32);
        // Successes carry a much higher profit component than failures.
        fill(&mut collector, 6, 6);

        let next = learner.run_cycle(&collector).unwrap();
        assert!(next.weights.profit > 0.4);
        assert!((next.weights.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_divergence_guard_freezes_after_consecutive_low_cycles() {
        let mut config = AppConfig::default_for_tests().learner;
        config.freeze_after_cycles = 3;
        let (mut learner, thresholds, events) = make_learner(config);
        let mut collector = FeedbackCollector::new(32);
        fill(&mut collector, 0, 10);

        // First two low cycles still adjust; the third trips the guard.
        assert!(learner.run_cycle(&collector).is_some());
        assert!(learner.run_cycle(&collector).is_some());
        assert!(learner.run_cycle(&collector).is_none());
        assert!(learner.is_frozen());

        let frozen_version = thresholds.read().unwrap().version;
        for _ in 0..10 {
            assert!(learner.run_cycle(&collector).is_none());
        }
        assert_eq!(thresholds.read().unwrap().version, frozen_version);

        let alerts = events
            .recent()
            .iter()
            .filter(|r| matches!(r.event, PipelineEvent::LearnerFrozen { .. }))
            .count();
        assert_eq!(alerts, 1);
    }

    #[test]
    fn test_reset_guard_resumes_adjustments() {
        let mut config = AppConfig::default_for_tests().learner;
        config.freeze_after_cycles = 1;
        let (mut learner, _, events) = make_learner(config);
        let mut collector = FeedbackCollector::new(32);
        fill(&mut collector, 0, 10);

        assert!(learner.run_cycle(&collector).is_none());
        assert!(learner.is_frozen());

        learner.reset_guard();
        assert!(!learner.is_frozen());
        assert!(events
            .recent()
            .iter()
            .any(|r| matches!(r.event, PipelineEvent::LearnerUnfrozen)));
    }

    #[test]
    fn test_healthy_rate_clears_low_cycle_streak() {
        let mut config = AppConfig::default_for_tests().learner;
        config.freeze_after_cycles = 2;
        let (mut learner, _, _) = make_learner(config);

        let mut bad = FeedbackCollector::new(32);
        fill(&mut bad, 0, 10);
        let mut good = FeedbackCollector::new(32);
        fill(&mut good, 10, 2);

        assert!(learner.run_cycle(&bad).is_some());
        assert!(learner.run_cycle(&good).is_some());
        // The streak reset above: one more bad cycle must not freeze.
        assert!(learner.run_cycle(&bad).is_some());
        assert!(!learner.is_frozen());
    }
}
