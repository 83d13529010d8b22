//! Confidence-gated retry around one analysis attempt.
//!
//! Each attempt extracts, builds and validates a context. The gate accepts
//! it once the context's confidence clears the threshold, retries low
//! confidence and retryable failures with backoff, and fails fast on
//! anything else.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use mailctx_core::context::Context;
use mailctx_settings::{AnalysisSettings, ConfidencePolicyKind};

use crate::error::EngineError;
use crate::retry::{self, RetryPolicy, Sleeper, TokioSleeper};

/// Metadata key set when a context was accepted through a boost.
pub const CONFIDENCE_BOOSTED: &str = "confidence_boosted";

const BOOST_FACTOR: f64 = 1.2;

/// How a below-threshold confidence is treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConfidencePolicy {
    #[default]
    Strict,
    /// Multiply by 1.2 and cap at the threshold. Accepts anything within
    /// a factor of 1.2 of the threshold.
    BoostToThreshold,
}

impl ConfidencePolicy {
    /// The confidence to accept with, or `None` when the attempt is low.
    pub fn accept(self, confidence: f64, threshold: f64) -> Option<f64> {
        if confidence >= threshold {
            return Some(confidence);
        }
        match self {
            Self::Strict => None,
            Self::BoostToThreshold => {
                let boosted = (confidence * BOOST_FACTOR).min(threshold);
                (boosted >= threshold).then_some(boosted)
            }
        }
    }
}

impl From<ConfidencePolicyKind> for ConfidencePolicy {
    fn from(kind: ConfidencePolicyKind) -> Self {
        match kind {
            ConfidencePolicyKind::Strict => Self::Strict,
            ConfidencePolicyKind::BoostToThreshold => Self::BoostToThreshold,
        }
    }
}

/// Classification of one attempt, used for logging and the final error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Accepted,
    LowConfidence,
    Retryable,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::LowConfidence => "low_confidence",
            Self::Retryable => "retryable",
            Self::Failed => "failed",
        }
    }
}

#[derive(Clone)]
pub struct ConfidenceGate {
    threshold: f64,
    policy: ConfidencePolicy,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl ConfidenceGate {
    pub fn new(threshold: f64, retry: RetryPolicy) -> Self {
        Self {
            threshold,
            policy: ConfidencePolicy::Strict,
            retry,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn from_settings(settings: &AnalysisSettings) -> Self {
        Self::new(settings.acceptance_threshold, RetryPolicy::from_analysis(settings))
            .with_policy(settings.confidence_policy.into())
    }

    pub fn with_policy(mut self, policy: ConfidencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Drive `attempt` through the gate. `attempt` receives the 1-based
    /// attempt number and produces a validated context.
    pub async fn run<F, Fut>(&self, attempt: F) -> Result<Context, EngineError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Context, EngineError>>,
    {
        retry::with_deadline(self.retry.deadline, self.attempts(attempt)).await
    }

    async fn attempts<F, Fut>(&self, mut attempt: F) -> Result<Context, EngineError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Context, EngineError>>,
    {
        let max_attempts = self.retry.max_attempts;
        let mut best_confidence: Option<f64> = None;
        let mut last_error: Option<EngineError> = None;

        for n in 1..=max_attempts {
            let (outcome, suggested) = match attempt(n).await {
                Ok(mut context) => match self.policy.accept(context.confidence_score, self.threshold) {
                    Some(accepted) => {
                        if accepted != context.confidence_score {
                            context.confidence_score = accepted;
                            context
                                .metadata
                                .insert(CONFIDENCE_BOOSTED.to_string(), "true".to_string());
                        }
                        info!(
                            attempt = n,
                            confidence = context.confidence_score,
                            outcome = AttemptOutcome::Accepted.as_str(),
                            "analysis accepted"
                        );
                        return Ok(context);
                    }
                    None => {
                        let confidence = context.confidence_score;
                        best_confidence = Some(best_confidence.map_or(confidence, |b| b.max(confidence)));
                        last_error = None;
                        (AttemptOutcome::LowConfidence, None)
                    }
                },
                Err(e) if self.retry.should_retry(&e) => {
                    let suggested = retry::suggested_delay(&e);
                    warn!(attempt = n, error = %e, kind = e.error_kind(), "analysis attempt failed");
                    last_error = Some(e);
                    (AttemptOutcome::Retryable, suggested)
                }
                Err(e) => {
                    warn!(
                        attempt = n,
                        error = %e,
                        outcome = AttemptOutcome::Failed.as_str(),
                        "analysis failed"
                    );
                    return Err(e);
                }
            };

            debug!(
                attempt = n,
                max_attempts,
                outcome = outcome.as_str(),
                best_confidence = best_confidence.unwrap_or(0.0),
                threshold = self.threshold,
                "attempt not accepted"
            );
            if n < max_attempts {
                self.sleeper.sleep(self.retry.delay_for(n - 1, suggested)).await;
            }
        }

        match last_error {
            Some(last) => Err(EngineError::RetriesExhausted {
                attempts: max_attempts,
                last: Box::new(last),
            }),
            None => Err(EngineError::ConfidenceNotReached {
                attempts: max_attempts,
                best_confidence: best_confidence.unwrap_or(0.0),
                threshold: self.threshold,
            }),
        }
    }
}
