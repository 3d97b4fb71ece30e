//! Strategy layer — scoring and verdicts.
//!
//! Pure, deterministic evaluation of candidate opportunities: the
//! alignment policy, the multi-factor scorer, and the decision engine
//! that turns a score into a verdict against the adaptive thresholds.

pub mod decision;
pub mod policy;
pub mod scorer;

pub use decision::{DecisionEngine, DecisionEngineConfig};
pub use policy::{AlignmentPolicy, ExposurePolicy, FixedAlignment};
pub use scorer::{OpportunityScorer, ScorerConfig};
