use std::fmt;
use std::time::Duration;

use mailctx_core::errors::{InferenceError, ValidationError};
use mailctx_store::StoreError;

/// Which merge argument failed its precondition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeSide {
    Existing,
    Incoming,
}

impl fmt::Display for MergeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Existing => "existing",
            Self::Incoming => "incoming",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("incomplete signal: missing {0}")]
    IncompleteSignal(&'static str),

    #[error("confidence {best_confidence:.3} below {threshold:.3} after {attempts} attempts")]
    ConfidenceNotReached {
        attempts: u32,
        best_confidence: f64,
        threshold: f64,
    },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<EngineError>,
    },

    #[error("merged context is invalid: {0}")]
    MergeValidation(#[source] ValidationError),

    #[error("invalid {side} context: {source}")]
    InvalidInput {
        side: MergeSide,
        #[source]
        source: ValidationError,
    },

    #[error("template quality {score:.3} below minimum {minimum:.3}")]
    TemplateQuality { score: f64, minimum: f64 },

    #[error("response rejected (confidence {confidence:.3}): {reason}")]
    ResponseRejected { reason: String, confidence: f64 },

    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    /// Whether another attempt at the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::IncompleteSignal(_) => true,
            Self::Inference(e) => e.is_retryable(),
            Self::Store(e) => e.is_conflict(),
            _ => false,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::IncompleteSignal(_) => "incomplete_signal",
            Self::ConfidenceNotReached { .. } => "confidence_not_reached",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::MergeValidation(_) => "merge_validation",
            Self::InvalidInput { .. } => "invalid_input",
            Self::TemplateQuality { .. } => "template_quality",
            Self::ResponseRejected { .. } => "response_rejected",
            Self::Timeout(_) => "timeout",
            Self::Inference(_) => "inference",
            Self::Store(_) => "store",
            Self::NotFound(_) => "not_found",
            Self::Cancelled => "cancelled",
        }
    }

    /// The validation failure behind this error, if any.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(v) | Self::MergeValidation(v) => Some(v),
            Self::InvalidInput { source, .. } => Some(source),
            Self::RetriesExhausted { last, .. } => last.validation(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailctx_core::errors::{EntityRef, ValidationRule};

    fn verr() -> ValidationError {
        ValidationError::new(
            ValidationRule::OutOfRange,
            "confidence_score",
            EntityRef::Context("ctx_1".into()),
            "1.5 not in [0, 1]",
        )
    }

    #[test]
    fn retryability() {
        assert!(EngineError::IncompleteSignal("topics").is_retryable());
        assert!(EngineError::Inference(InferenceError::Overloaded).is_retryable());
        assert!(!EngineError::Inference(InferenceError::InvalidRequest("x".into())).is_retryable());
        assert!(!EngineError::Validation(verr()).is_retryable());
        assert!(!EngineError::MergeValidation(verr()).is_retryable());
        assert!(!EngineError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(EngineError::Store(StoreError::Conflict("rev".into())).is_retryable());
    }

    #[test]
    fn validation_reaches_through_wrappers() {
        let err = EngineError::RetriesExhausted {
            attempts: 3,
            last: Box::new(EngineError::Validation(verr())),
        };
        assert_eq!(err.validation().unwrap().rule, ValidationRule::OutOfRange);
        assert_eq!(err.error_kind(), "retries_exhausted");
    }

    #[test]
    fn invalid_input_names_side() {
        let err = EngineError::InvalidInput {
            side: MergeSide::Incoming,
            source: verr(),
        };
        assert!(err.to_string().starts_with("invalid incoming context"));
    }
}
