use thiserror::Error;

/// Errors raised by every analysis engine.
///
/// All of them describe bad input or bad parameters; none is transient, so
/// callers should report them rather than retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Invalid filter spec: {0}")]
    InvalidFilterSpec(String),
    #[error("Unstable filter: {0}")]
    UnstableFilter(String),
    #[error("Channel mismatch: {left} vs {right}")]
    ChannelMismatch { left: String, right: String },
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

impl AnalysisError {
    pub(crate) fn parameter(name: &'static str, reason: impl Into<String>) -> Self {
        AnalysisError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(left: impl Into<String>, right: impl Into<String>) -> Self {
        AnalysisError::ChannelMismatch {
            left: left.into(),
            right: right.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
