//! Feedback collector.
//!
//! Bounded ring buffer of execution outcomes paired with the score
//! components that justified them. The learner reads rolling aggregates
//! from here; nothing in this module mutates shared state.

use std::collections::VecDeque;
use tracing::debug;

use crate::types::{ExecutionOutcome, ExecutionResult, Score};

/// One recorded outcome with the evidence that led to it.
#[derive(Debug, Clone)]
pub struct FeedbackSample {
    pub result: ExecutionResult,
    pub score: Score,
    /// The opportunity's original profit estimate, for error tracking.
    pub profit_estimate: f64,
}

/// Mean score components among successes vs failures, for weight
/// correlation. Cancelled results are excluded — they say nothing about
/// scoring quality.
#[derive(Debug, Clone, Copy)]
pub struct ComponentSeparation {
    pub profit: f64,
    pub risk: f64,
    pub alignment: f64,
}

pub struct FeedbackCollector {
    samples: VecDeque<FeedbackSample>,
    capacity: usize,
    total_recorded: u64,
}

impl FeedbackCollector {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            total_recorded: 0,
        }
    }

    /// Append a sample, evicting the oldest when full.
    pub fn record(&mut self, sample: FeedbackSample) {
        debug!(
            decision_id = %sample.result.decision_id,
            worker_id = %sample.result.worker_id,
            outcome = ?sample.result.outcome,
            shadow = sample.result.shadow,
            "Feedback recorded"
        );
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.total_recorded += 1;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Lifetime count of recorded samples (not capped by the buffer).
    pub fn total_recorded(&self) -> u64 {
        self.total_recorded
    }

    /// Success rate over the buffer, ignoring cancelled results.
    pub fn rolling_success_rate(&self) -> Option<f64> {
        let decided: Vec<_> = self
            .samples
            .iter()
            .filter(|s| s.result.outcome != ExecutionOutcome::Cancelled)
            .collect();
        if decided.is_empty() {
            return None;
        }
        let wins = decided
            .iter()
            .filter(|s| s.result.outcome.is_success())
            .count();
        Some(wins as f64 / decided.len() as f64)
    }

    /// Mean relative error between estimated and realized profit over
    /// successful executions.
    pub fn rolling_profit_error(&self) -> Option<f64> {
        let successes: Vec<_> = self
            .samples
            .iter()
            .filter(|s| s.result.outcome.is_success())
            .collect();
        if successes.is_empty() {
            return None;
        }
        let sum: f64 = successes
            .iter()
            .map(|s| {
                let denom = s.profit_estimate.max(1.0);
                (s.profit_estimate - s.result.realized_profit).abs() / denom
            })
            .sum();
        Some(sum / successes.len() as f64)
    }

    /// Per-component mean among successes minus mean among failures.
    /// Positive values mean the component correlates with success.
    /// Requires at least one success and one failure.
    pub fn component_separation(&self) -> Option<ComponentSeparation> {
        let mut success = (0.0, 0.0, 0.0, 0usize);
        let mut failure = (0.0, 0.0, 0.0, 0usize);

        for s in &self.samples {
            let bucket = match s.result.outcome {
                ExecutionOutcome::Success => &mut success,
                ExecutionOutcome::Failure(_) => &mut failure,
                ExecutionOutcome::Cancelled => continue,
            };
            bucket.0 += s.score.profit_component;
            bucket.1 += s.score.risk_component;
            bucket.2 += s.score.alignment_component;
            bucket.3 += 1;
        }

        if success.3 == 0 || failure.3 == 0 {
            return None;
        }

        let (sn, fln) = (success.3 as f64, failure.3 as f64);
        Some(ComponentSeparation {
            profit: success.0 / sn - failure.0 / fln,
            risk: success.1 / sn - failure.1 / fln,
            alignment: success.2 / sn - failure.2 / fln,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
