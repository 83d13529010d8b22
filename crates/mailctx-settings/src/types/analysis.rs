use serde::{Deserialize, Serialize};

/// Context analysis: acceptance gate, retry budget and batching.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisSettings {
    /// Minimum signal confidence for a context to be accepted.
    pub acceptance_threshold: f64,
    /// Minimum importance / confidence for a topic, entity or relationship
    /// to become part of the context.
    pub item_threshold: f64,
    /// Total attempts per email, including the first.
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    /// Delay before the second attempt; the base for exponential backoff.
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Wall-clock budget for one email across all attempts.
    pub deadline_ms: u64,
    pub batch_concurrency: usize,
    pub confidence_policy: ConfidencePolicyKind,
    /// Attempts at an optimistic merge-then-store before giving up.
    pub store_attempts: u32,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.75,
            item_threshold: 0.75,
            max_attempts: 3,
            backoff: BackoffKind::Fixed,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 10_000,
            deadline_ms: 30_000,
            batch_concurrency: 32,
            confidence_policy: ConfidencePolicyKind::Strict,
            store_attempts: 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfidencePolicyKind {
    /// Below-threshold confidence is a failed attempt.
    Strict,
    /// Below-threshold confidence is boosted (x1.2, capped at the threshold).
    BoostToThreshold,
}

/// Bounded cache in front of signal extraction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            ttl_secs: 3600,
        }
    }
}
