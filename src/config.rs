//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Everything is loaded once at startup and validated before the
//! pipeline starts; after that, only the learner's bounded automatic
//! adjustments change thresholds or weights.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::error::PipelineError;
use crate::types::{ThresholdState, WeightVector, WorkerMode, WorkerRegistration};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub scoring: ScoringConfig,
    pub decision: DecisionConfig,
    pub workers: WorkersConfig,
    pub learner: LearnerConfig,
    pub timeouts: TimeoutsConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    pub name: String,
    /// Seconds between snapshot polls of the discovery collaborator.
    pub intake_interval_secs: u64,
    /// Global cap on simultaneously executing workers.
    pub n_max: usize,
    /// Path for the learned-state snapshot file.
    #[serde(default = "default_state_file")]
    pub state_file: String,
}

fn default_state_file() -> String {
    "hermes_state.json".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    /// Initial weight for the profit component.
    pub weight_profit: f64,
    /// Initial weight for the risk component.
    pub weight_risk: f64,
    /// Initial weight for the alignment component.
    pub weight_alignment: f64,
    /// Profit at which the saturating profit component reaches ~0.6
    /// relative to the normalization curve `p / (p + pivot)`.
    pub profit_pivot: f64,
    /// Below this gross profit the composite is scaled down toward zero —
    /// opportunities that cannot clear costs must not reach execution.
    pub min_viable_profit: f64,
    /// Venue load at which the diversity term of the alignment policy
    /// bottoms out.
    pub max_venue_load: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DecisionConfig {
    pub execute_threshold: f64,
    pub reject_threshold: f64,
    /// Optimize passes before falling back to Hold (1 or 2).
    pub optimize_attempts: u32,
    /// Fraction of committed exposure assumed released per optimize pass.
    pub optimize_relaxation: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkersConfig {
    /// Consecutive failures before a worker is marked Degraded.
    pub degrade_after_failures: u32,
    /// Seconds a Degraded worker is excluded from selection.
    pub cooldown_secs: u64,
    /// Sliding window of recent outcomes used for selection ranking.
    pub success_window: usize,
    /// Workers registered at startup.
    #[serde(default)]
    pub registry: Vec<WorkerEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerEntry {
    pub worker_id: String,
    pub mode: String,
    #[serde(default)]
    pub capability_tags: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LearnerConfig {
    /// Ring buffer capacity for execution feedback.
    pub buffer_capacity: usize,
    /// Run a learning cycle after this many new results.
    pub learn_every: usize,
    /// Per-cycle adjustment cap for thresholds and weights.
    pub max_delta: f64,
    /// Rolling success rate below which the divergence guard arms.
    pub divergence_floor: f64,
    /// Consecutive low-success cycles before adjustments freeze.
    pub freeze_after_cycles: u32,
    /// Minimum gap kept between reject and execute thresholds.
    pub min_threshold_gap: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutsConfig {
    /// Market snapshot poll timeout.
    pub snapshot_secs: u64,
    /// Executor call timeout; breach yields Failure(Timeout).
    pub dispatch_secs: u64,
    /// Supervised approval window; breach reverts the decision to Hold.
    pub approval_secs: u64,
}

impl TimeoutsConfig {
    pub fn snapshot(&self) -> Duration {
        Duration::from_secs(self.snapshot_secs)
    }

    pub fn dispatch(&self) -> Duration {
        Duration::from_secs(self.dispatch_secs)
    }

    pub fn approval(&self) -> Duration {
        Duration::from_secs(self.approval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation. Any failure here is a fatal configuration
    /// error — the pipeline must not start on an invalid config.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.initial_thresholds().validate()?;

        if self.pipeline.n_max == 0 {
            return Err(PipelineError::fatal("n_max must be at least 1"));
        }
        if self.scoring.profit_pivot <= 0.0 || !self.scoring.profit_pivot.is_finite() {
            return Err(PipelineError::fatal("profit_pivot must be positive"));
        }
        if self.scoring.min_viable_profit < 0.0 {
            return Err(PipelineError::fatal("min_viable_profit must be non-negative"));
        }
        if !(1..=2).contains(&self.decision.optimize_attempts) {
            return Err(PipelineError::fatal("optimize_attempts must be 1 or 2"));
        }
        if !(0.0..1.0).contains(&self.decision.optimize_relaxation) {
            return Err(PipelineError::fatal("optimize_relaxation must be in [0,1)"));
        }
        if self.learner.buffer_capacity == 0 || self.learner.learn_every == 0 {
            return Err(PipelineError::fatal(
                "learner buffer_capacity and learn_every must be positive",
            ));
        }
        if !(self.learner.max_delta > 0.0 && self.learner.max_delta <= 0.05) {
            return Err(PipelineError::fatal(
                "learner max_delta must be in (0, 0.05]",
            ));
        }
        if !(0.0..=1.0).contains(&self.learner.divergence_floor) {
            return Err(PipelineError::fatal("divergence_floor must be in [0,1]"));
        }
        // The learner clamps reject_threshold to execute - min_threshold_gap;
        // starting below the gap would make its first move exceed max_delta.
        if self.decision.execute_threshold - self.decision.reject_threshold
            < self.learner.min_threshold_gap
        {
            return Err(PipelineError::fatal(
                "execute and reject thresholds must start at least min_threshold_gap apart",
            ));
        }
        for secs in [
            self.timeouts.snapshot_secs,
            self.timeouts.dispatch_secs,
            self.timeouts.approval_secs,
        ] {
            if secs == 0 {
                return Err(PipelineError::fatal("all timeouts must be positive"));
            }
        }
        for entry in &self.workers.registry {
            entry.parse()?;
        }
        Ok(())
    }

    /// The initial threshold state (version 0) from config.
    pub fn initial_thresholds(&self) -> ThresholdState {
        ThresholdState {
            execute_threshold: self.decision.execute_threshold,
            reject_threshold: self.decision.reject_threshold,
            weights: WeightVector {
                profit: self.scoring.weight_profit,
                risk: self.scoring.weight_risk,
                alignment: self.scoring.weight_alignment,
            },
            version: 0,
        }
    }

    /// Sensible defaults for tests and the dry-run binary.
    pub fn default_for_tests() -> Self {
        Self {
            pipeline: PipelineConfig {
                name: "HERMES-test".into(),
                intake_interval_secs: 1,
                n_max: 3,
                state_file: default_state_file(),
            },
            scoring: ScoringConfig {
                weight_profit: 0.4,
                weight_risk: 0.4,
                weight_alignment: 0.2,
                profit_pivot: 66.67,
                min_viable_profit: 10.0,
                max_venue_load: 4,
            },
            decision: DecisionConfig {
                execute_threshold: 0.7,
                reject_threshold: 0.2,
                optimize_attempts: 2,
                optimize_relaxation: 0.5,
            },
            workers: WorkersConfig {
                degrade_after_failures: 3,
                cooldown_secs: 60,
                success_window: 20,
                registry: Vec::new(),
            },
            learner: LearnerConfig {
                buffer_capacity: 256,
                learn_every: 8,
                max_delta: 0.05,
                divergence_floor: 0.2,
                freeze_after_cycles: 5,
                min_threshold_gap: 0.1,
            },
            timeouts: TimeoutsConfig {
                snapshot_secs: 10,
                dispatch_secs: 30,
                approval_secs: 15,
            },
            dashboard: DashboardConfig {
                enabled: false,
                port: 8080,
            },
        }
    }
}

impl WorkerEntry {
    /// Parse a config entry into a validated registration.
    pub fn parse(&self) -> Result<WorkerRegistration, PipelineError> {
        let mode: WorkerMode = self.mode.parse()?;
        let reg = WorkerRegistration {
            worker_id: self.worker_id.clone(),
            mode,
            capability_tags: self.capability_tags.clone(),
        };
        reg.validate()?;
        Ok(reg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let cfg = AppConfig::default_for_tests();
        assert!(cfg.validate().is_ok());
        let t = cfg.initial_thresholds();
        assert_eq!(t.version, 0);
        assert!((t.weights.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_bad_weights_rejected() {
        let mut cfg = AppConfig::default_for_tests();
        cfg.scoring.weight_profit = 0.9;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_n_max_rejected() {
        let mut cfg = AppConfig::default_for_tests();
        cfg.pipeline.n_max = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_oversized_learner_delta_rejected() {
        let mut cfg = AppConfig::default_for_tests();
        cfg.learner.max_delta = 0.2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut cfg = AppConfig::default_for_tests();
        cfg.decision.execute_threshold = 0.1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_threshold_gap_below_learner_minimum_rejected() {
        let mut cfg = AppConfig::default_for_tests();
        cfg.decision.execute_threshold = 0.7;
        cfg.decision.reject_threshold = 0.65;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_worker_entry_parses() {
        let entry = WorkerEntry {
            worker_id: "alpha".into(),
            mode: "supervised".into(),
            capability_tags: vec!["dex".into()],
        };
        let reg = entry.parse().unwrap();
        assert_eq!(reg.mode, crate::types::WorkerMode::Supervised);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let mut cfg = AppConfig::default_for_tests();
        cfg.workers.registry.push(WorkerEntry {
            worker_id: "w".into(),
            mode: "chaotic".into(),
            capability_tags: vec![],
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_parse_from_toml() {
        let toml_str = r#"
            [pipeline]
            name = "HERMES-001"
            intake_interval_secs = 5
            n_max = 3

            [scoring]
            weight_profit = 0.4
            weight_risk = 0.4
            weight_alignment = 0.2
            profit_pivot = 66.67
            min_viable_profit = 10.0
            max_venue_load = 4

            [decision]
            execute_threshold = 0.7
            reject_threshold = 0.2
            optimize_attempts = 2
            optimize_relaxation = 0.5

            [workers]
            degrade_after_failures = 3
            cooldown_secs = 60
            success_window = 20

            [[workers.registry]]
            worker_id = "alpha"
            mode = "autonomous"

            [learner]
            buffer_capacity = 256
            learn_every = 8
            max_delta = 0.05
            divergence_floor = 0.2
            freeze_after_cycles = 5
            min_threshold_gap = 0.1

            [timeouts]
            snapshot_secs = 10
            dispatch_secs = 30
            approval_secs = 15

            [dashboard]
            enabled = true
            port = 8080
        "#;
        let cfg: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.workers.registry.len(), 1);
        assert_eq!(cfg.pipeline.name, "HERMES-001");
    }
}
