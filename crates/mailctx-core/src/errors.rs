use std::fmt;
use std::time::Duration;

/// What a caller should do with a failed call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The same input will fail again.
    GiveUp,
    /// Transient; the same input may succeed later.
    Retry,
    /// The call was interrupted rather than rejected.
    Stop,
}

/// Failure of a black-box inference call (signal extraction or text generation).
#[derive(Clone, Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("malformed inference output: {0}")]
    MalformedOutput(String),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("inference backend overloaded")]
    Overloaded,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl InferenceError {
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::AuthenticationFailed(_) | Self::InvalidRequest(_) | Self::MalformedOutput(_) => Disposition::GiveUp,
            Self::Cancelled => Disposition::Stop,
            Self::RateLimited { .. }
            | Self::ServerError { .. }
            | Self::Overloaded
            | Self::NetworkError(_)
            | Self::Unavailable(_)
            | Self::Timeout(_) => Disposition::Retry,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.disposition() == Disposition::Retry
    }

    pub fn is_fatal(&self) -> bool {
        self.disposition() == Disposition::GiveUp
    }

    /// Server-provided wait, when the backend sent one.
    pub fn suggested_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::MalformedOutput(_) => "malformed_output",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::Overloaded => "overloaded",
            Self::NetworkError(_) => "network_error",
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Maps a non-success HTTP status from an inference backend.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 422 => Self::InvalidRequest(body),
            429 => Self::RateLimited { retry_after: None },
            503 => Self::Unavailable(body),
            529 => Self::Overloaded,
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

/// Which invariant a [`ValidationError`] reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValidationRule {
    MalformedIdentifier,
    TooManyTopics,
    OutOfRange,
    MissingMetadata,
    EmptyField,
    InvalidEmail,
    FutureTimestamp,
    DuplicateKey,
    ContentLength,
    PlaceholderMismatch,
    NoChange,
    ThreadMismatch,
}

impl ValidationRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedIdentifier => "malformed_identifier",
            Self::TooManyTopics => "too_many_topics",
            Self::OutOfRange => "out_of_range",
            Self::MissingMetadata => "missing_metadata",
            Self::EmptyField => "empty_field",
            Self::InvalidEmail => "invalid_email",
            Self::FutureTimestamp => "future_timestamp",
            Self::DuplicateKey => "duplicate_key",
            Self::ContentLength => "content_length",
            Self::PlaceholderMismatch => "placeholder_mismatch",
            Self::NoChange => "no_change",
            Self::ThreadMismatch => "thread_mismatch",
        }
    }
}

impl fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record a validation failure was found in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityRef {
    Context(String),
    Project(String),
    Relationship(String),
    Template(String),
    Response(String),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Context(id) => write!(f, "context {id}"),
            Self::Project(id) => write!(f, "project {id}"),
            Self::Relationship(id) => write!(f, "relationship {id}"),
            Self::Template(id) => write!(f, "template {id}"),
            Self::Response(id) => write!(f, "response {id}"),
        }
    }
}

/// A single violated invariant. Validation is fail-fast, so one error is
/// reported per call.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{rule} on {entity} field `{field}`: {detail}")]
pub struct ValidationError {
    pub rule: ValidationRule,
    pub field: &'static str,
    pub entity: EntityRef,
    pub detail: String,
}

impl ValidationError {
    pub fn new(
        rule: ValidationRule,
        field: &'static str,
        entity: EntityRef,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            rule,
            field,
            entity,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispositions() {
        assert_eq!(InferenceError::Overloaded.disposition(), Disposition::Retry);
        assert_eq!(InferenceError::MalformedOutput("{".into()).disposition(), Disposition::GiveUp);
        assert_eq!(InferenceError::Cancelled.disposition(), Disposition::Stop);
    }

    #[test]
    fn retryable_classification() {
        assert!(InferenceError::RateLimited { retry_after: None }.is_retryable());
        assert!(InferenceError::ServerError { status: 500, body: "err".into() }.is_retryable());
        assert!(InferenceError::Overloaded.is_retryable());
        assert!(InferenceError::NetworkError("tcp".into()).is_retryable());
        assert!(InferenceError::Unavailable("loading".into()).is_retryable());
        assert!(InferenceError::Timeout(Duration::from_secs(5)).is_retryable());
    }

    #[test]
    fn fatal_classification() {
        assert!(InferenceError::AuthenticationFailed("bad key".into()).is_fatal());
        assert!(InferenceError::InvalidRequest("bad".into()).is_fatal());
        assert!(InferenceError::MalformedOutput("not json".into()).is_fatal());
        assert!(!InferenceError::MalformedOutput("x".into()).is_retryable());
    }

    #[test]
    fn cancelled_is_neither() {
        let cancelled = InferenceError::Cancelled;
        assert!(!cancelled.is_retryable());
        assert!(!cancelled.is_fatal());
    }

    #[test]
    fn only_rate_limits_suggest_a_wait() {
        let limited = InferenceError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(limited.suggested_delay(), Some(Duration::from_secs(5)));
        assert_eq!(InferenceError::Timeout(Duration::from_secs(5)).suggested_delay(), None);
    }

    #[test]
    fn from_status_mapping() {
        assert!(InferenceError::from_status(401, "unauthorized".into()).is_fatal());
        assert!(InferenceError::from_status(422, "schema".into()).is_fatal());
        assert!(InferenceError::from_status(429, "slow down".into()).is_retryable());
        assert!(matches!(
            InferenceError::from_status(503, "warming".into()),
            InferenceError::Unavailable(_)
        ));
        assert!(InferenceError::from_status(502, "bad gateway".into()).is_retryable());
        assert!(InferenceError::from_status(404, "nope".into()).is_fatal());
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(InferenceError::Cancelled.error_kind(), "cancelled");
        assert_eq!(InferenceError::Overloaded.error_kind(), "overloaded");
        assert_eq!(
            InferenceError::MalformedOutput(String::new()).error_kind(),
            "malformed_output"
        );
    }

    #[test]
    fn validation_error_display_names_rule_field_and_entity() {
        let err = ValidationError::new(
            ValidationRule::OutOfRange,
            "relevance_score",
            EntityRef::Project("proj_abc".into()),
            "1.3 not in [0, 1]",
        );
        let msg = err.to_string();
        assert!(msg.contains("out_of_range"));
        assert!(msg.contains("relevance_score"));
        assert!(msg.contains("project proj_abc"));
    }
}
