//! Error taxonomy for attack runs.
//!
//! Errors fall into three families. Input errors are the caller's fault and are
//! never worth retrying. Model errors carry diagnostic detail about the
//! classifier. Computation errors abort the run at the step that produced them.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AttackError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Model,
    Computation,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttackError {
    #[error("invalid epsilon {epsilon}: must be finite and within [0, {max}]")]
    InvalidEpsilon { epsilon: f64, max: f64 },
    #[error("invalid step size {step_size}: must be finite and positive")]
    InvalidStepSize { step_size: f64 },
    #[error("unsupported attack kind `{0}`")]
    UnsupportedAttackKind(String),
    #[error("malformed image: {0}")]
    MalformedImage(String),
    #[error("invalid range {0}")]
    InvalidRange(String),
    #[error("input tensor leaves the valid range [{low}, {high}]")]
    OutOfRange { low: f64, high: f64 },
    #[error("unknown model `{0}`")]
    UnknownModel(String),

    #[error("gradient unavailable: {0}")]
    GradientUnavailable(String),
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("non-finite {what} at step {step}")]
    NonFinite { step: usize, what: &'static str },
    #[error("internal error: {0}")]
    Internal(String),
}

impl AttackError {
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidEpsilon { .. }
            | Self::InvalidStepSize { .. }
            | Self::UnsupportedAttackKind(_)
            | Self::MalformedImage(_)
            | Self::InvalidRange(_)
            | Self::OutOfRange { .. }
            | Self::UnknownModel(_) => ErrorCategory::Input,
            Self::GradientUnavailable(_) | Self::ShapeMismatch { .. } => ErrorCategory::Model,
            Self::NonFinite { .. } | Self::Internal(_) => ErrorCategory::Computation,
        }
    }

    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
