//! Error taxonomy for the pipeline.
//!
//! Every failure is one of four categories. Only `ConfigurationFatal`
//! stops the whole pipeline; the rest are handled at the stage where
//! they occur (reject, hold, or failure-count increment).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed input at a boundary (opportunity or worker record).
    /// Rejected synchronously, logged, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// A collaborator did not respond within its configured window.
    /// Soft failure: the decision reverts to Hold or the worker's
    /// failure count increments.
    #[error("timeout: {0}")]
    Timeout(String),

    /// An execution attempt failed. Recorded as feedback; the pipeline
    /// continues.
    #[error("execution failure: {0}")]
    ExecutionFailure(String),

    /// Unrecoverable configuration problem (unknown worker id, corrupted
    /// threshold state). The pipeline transitions to Halted and requires
    /// an explicit restart with validated configuration.
    #[error("fatal configuration error: {0}")]
    ConfigurationFatal(String),
}

impl PipelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::ExecutionFailure(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::ConfigurationFatal(msg.into())
    }

    /// Whether this error must halt the whole pipeline.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigurationFatal(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
