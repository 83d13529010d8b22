//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MailctxSettings::default()`]
//! 2. If `~/.mailctx/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `MAILCTX_*` environment variable overrides (highest priority)
//! 4. Validate ranges and cross-field rules
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{BackoffKind, MailctxSettings};

/// Resolve the path to the settings file (`~/.mailctx/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".mailctx").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<MailctxSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or an invalid value is an
/// error.
pub fn load_settings_from_path(path: &Path) -> Result<MailctxSettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// Same as [`load_settings_from_path`] with an explicit environment lookup.
pub fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<MailctxSettings> {
    let defaults = serde_json::to_value(MailctxSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_owned(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Syntax {
            path: path.to_owned(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: MailctxSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `MAILCTX_*` overrides. Values that fail to parse or fall outside
/// their range are ignored with a warning.
pub fn apply_env_overrides(settings: &mut MailctxSettings, env: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup: env };

    // ── Analysis ────────────────────────────────────────────────────
    if let Some(v) = env.f64_in("MAILCTX_ACCEPTANCE_THRESHOLD", 0.0, 1.0) {
        settings.analysis.acceptance_threshold = v;
    }
    if let Some(v) = env.f64_in("MAILCTX_ITEM_THRESHOLD", 0.0, 1.0) {
        settings.analysis.item_threshold = v;
    }
    if let Some(v) = env.u64_in("MAILCTX_MAX_ATTEMPTS", 1, 20) {
        settings.analysis.max_attempts = v as u32;
    }
    if let Some(v) = env.u64_in("MAILCTX_RETRY_DELAY_MS", 0, 600_000) {
        settings.analysis.retry_delay_ms = v;
        settings.analysis.max_retry_delay_ms = settings.analysis.max_retry_delay_ms.max(v);
    }
    if let Some(v) = env.string("MAILCTX_BACKOFF") {
        match v.to_lowercase().as_str() {
            "fixed" => settings.analysis.backoff = BackoffKind::Fixed,
            "exponential" => settings.analysis.backoff = BackoffKind::Exponential,
            _ => tracing::warn!(key = "MAILCTX_BACKOFF", value = %v, "unknown backoff, ignoring"),
        }
    }
    if let Some(v) = env.u64_in("MAILCTX_DEADLINE_MS", 100, 3_600_000) {
        settings.analysis.deadline_ms = v;
    }
    if let Some(v) = env.u64_in("MAILCTX_BATCH_CONCURRENCY", 1, 1024) {
        settings.analysis.batch_concurrency = v as usize;
    }

    // ── Cache ───────────────────────────────────────────────────────
    if let Some(v) = env.bool("MAILCTX_CACHE_ENABLED") {
        settings.cache.enabled = v;
    }
    if let Some(v) = env.u64_in("MAILCTX_CACHE_MAX_ENTRIES", 1, 1_000_000) {
        settings.cache.max_entries = v as usize;
    }
    if let Some(v) = env.u64_in("MAILCTX_CACHE_TTL_SECS", 1, 86_400 * 30) {
        settings.cache.ttl_secs = v;
    }

    // ── Responses ───────────────────────────────────────────────────
    if let Some(v) = env.f64_in("MAILCTX_MIN_RESPONSE_CONFIDENCE", 0.0, 1.0) {
        settings.responses.min_confidence = v;
    }

    // ── Inference ───────────────────────────────────────────────────
    if let Some(v) = env.string("MAILCTX_EXTRACTOR_URL") {
        settings.inference.extractor_url = Some(v);
    }
    if let Some(v) = env.string("MAILCTX_GENERATOR_URL") {
        settings.inference.generator_url = Some(v);
    }

    // ── Storage / logging ───────────────────────────────────────────
    if let Some(v) = env.string("MAILCTX_DB_PATH") {
        settings.storage.database_path = v;
    }
    if let Some(v) = env.string("MAILCTX_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("MAILCTX_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Finite floats within `[min, max]`.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.trim().parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
        }
        result
    }

    fn f64_in(&self, name: &str, min: f64, max: f64) -> Option<f64> {
        let val = (self.lookup)(name)?;
        let result = parse_f64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, min, max, "invalid float env var, ignoring");
        }
        result
    }
}
