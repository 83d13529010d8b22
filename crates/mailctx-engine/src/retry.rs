use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use mailctx_settings::{AnalysisSettings, BackoffKind, ResponseSettings};

use crate::error::EngineError;

/// Delay schedule between attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^retry`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retry number `retry` (0 = the first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        match self {
            Self::Fixed(d) => *d,
            Self::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(retry.min(31));
                base.saturating_mul(factor).min(*max)
            }
        }
    }
}

/// Suspends the retry loop between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and remembers every requested delay.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
    }
}

type RetryPredicate = Arc<dyn Fn(&EngineError) -> bool + Send + Sync>;

/// Attempt budget, backoff schedule, overall deadline and the rule deciding
/// which failures are worth another attempt.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub deadline: Option<Duration>,
    retryable: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            deadline: None,
            retryable: Arc::new(EngineError::is_retryable),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Replace the default [`EngineError::is_retryable`] classification.
    pub fn with_retryable<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&EngineError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    pub fn from_analysis(settings: &AnalysisSettings) -> Self {
        let base = Duration::from_millis(settings.retry_delay_ms);
        let backoff = match settings.backoff {
            BackoffKind::Fixed => Backoff::Fixed(base),
            BackoffKind::Exponential => Backoff::Exponential {
                base,
                max: Duration::from_millis(settings.max_retry_delay_ms),
            },
        };
        let policy = Self::new(settings.max_attempts, backoff);
        if settings.deadline_ms > 0 {
            policy.with_deadline(Duration::from_millis(settings.deadline_ms))
        } else {
            policy
        }
    }

    pub fn from_responses(settings: &ResponseSettings) -> Self {
        Self::new(
            settings.max_attempts,
            Backoff::Fixed(Duration::from_millis(settings.retry_delay_ms)),
        )
    }

    pub fn should_retry(&self, error: &EngineError) -> bool {
        (self.retryable)(error)
    }

    /// Delay before retry `retry`. A server-suggested delay wins over the
    /// schedule.
    pub fn delay_for(&self, retry: u32, suggested: Option<Duration>) -> Duration {
        suggested.unwrap_or_else(|| self.backoff.delay(retry))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// budget runs out. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, sleeper: &dyn Sleeper, mut op: F) -> Result<T, EngineError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let attempts = async {
            for attempt in 1..=self.max_attempts {
                let err = match op(attempt).await {
                    Ok(value) => return Ok(value),
                    Err(e) if !self.should_retry(&e) => return Err(e),
                    Err(e) => e,
                };
                if attempt == self.max_attempts {
                    return Err(EngineError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                let delay = self.delay_for(attempt - 1, suggested_delay(&err));
                warn!(
                    attempt,
                    max_attempts = self.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retryable failure, backing off"
                );
                sleeper.sleep(delay).await;
            }
            Err(EngineError::Cancelled)
        };
        with_deadline(self.deadline, attempts).await
    }
}

/// Bound `fut` by `deadline` when one is set.
pub(crate) async fn with_deadline<T, Fut>(deadline: Option<Duration>, fut: Fut) -> Result<T, EngineError>
where
    Fut: Future<Output = Result<T, EngineError>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| EngineError::Timeout(limit))?,
        None => fut.await,
    }
}

pub(crate) fn suggested_delay(error: &EngineError) -> Option<Duration> {
    match error {
        EngineError::Inference(e) => e.suggested_delay(),
        _ => None,
    }
}
