//! Error kinds raised by the analysis engine

use thiserror::Error;

use crate::models::BucketKey;

/// Errors produced by the normalizer, extrapolator, trainer and classifier.
///
/// `Parse` and `Configuration` signal a setup mistake and abort the whole
/// run. `InsufficientData` and `MissingBucket` are data problems and are
/// handled at the selector-group boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// Malformed timestamp or duration string
    #[error("cannot parse {what} from '{input}'")]
    Parse { what: &'static str, input: String },

    /// Missing capacity source, bad quantile levels, incompatible schema options
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Fewer points than the operation needs, or an empty query result
    #[error("insufficient data: needed at least {needed} points, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Classification attempted against a bucket that was never trained
    #[error("no trained thresholds for bucket {0}")]
    MissingBucket(BucketKey),
}

impl EngineError {
    pub fn parse(what: &'static str, input: impl Into<String>) -> Self {
        EngineError::Parse {
            what,
            input: input.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Configuration(message.into())
    }

    /// Whether this error should abort the entire run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Parse { .. } | EngineError::Configuration(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
