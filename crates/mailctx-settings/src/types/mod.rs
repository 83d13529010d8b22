//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file only needs the keys it changes.

mod analysis;
mod generation;
mod runtime;

pub use analysis::*;
pub use generation::*;
pub use runtime::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "analysis": { "acceptanceThreshold": 0.8 },
///   "cache": { "ttlSecs": 600 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MailctxSettings {
    pub analysis: AnalysisSettings,
    pub cache: CacheSettings,
    pub templates: TemplateSettings,
    pub responses: ResponseSettings,
    pub inference: InferenceSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl MailctxSettings {
    /// Range and cross-field checks that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        unit_interval("analysis.acceptanceThreshold", self.analysis.acceptance_threshold)?;
        unit_interval("analysis.itemThreshold", self.analysis.item_threshold)?;
        unit_interval("templates.minQualityScore", self.templates.min_quality_score)?;
        unit_interval("responses.minConfidence", self.responses.min_confidence)?;
        unit_interval("responses.toneMarkerRatio", self.responses.tone_marker_ratio)?;

        if self.analysis.max_attempts == 0 {
            return Err(SettingsError::invalid("analysis.maxAttempts", "must be at least 1"));
        }
        if self.analysis.batch_concurrency == 0 {
            return Err(SettingsError::invalid("analysis.batchConcurrency", "must be at least 1"));
        }
        if self.analysis.retry_delay_ms > self.analysis.max_retry_delay_ms {
            return Err(SettingsError::invalid(
                "analysis.retryDelayMs",
                format!(
                    "{} exceeds maxRetryDelayMs {}",
                    self.analysis.retry_delay_ms, self.analysis.max_retry_delay_ms
                ),
            ));
        }
        if self.templates.min_content_length > self.templates.max_content_length {
            return Err(SettingsError::invalid(
                "templates.minContentLength",
                format!(
                    "{} exceeds maxContentLength {}",
                    self.templates.min_content_length, self.templates.max_content_length
                ),
            ));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(SettingsError::invalid("cache.maxEntries", "must be at least 1 when enabled"));
        }
        if self.inference.extractor == ExtractorKind::Http && self.inference.extractor_url.is_none() {
            return Err(SettingsError::invalid(
                "inference.extractorUrl",
                "required when inference.extractor is \"http\"",
            ));
        }
        Ok(())
    }
}

fn unit_interval(key: &'static str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::invalid(key, format!("{value} is not in [0, 1]")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        MailctxSettings::default().validate().unwrap();
    }

    #[test]
    fn serde_roundtrip_uses_camel_case() {
        let settings = MailctxSettings::default();
        let json = serde_json::to_value(&settings).unwrap();
        assert!(json["analysis"].get("acceptanceThreshold").is_some());
        assert!(json["templates"].get("maxContentLength").is_some());
        let back: MailctxSettings = serde_json::from_value(json).unwrap();
        assert_eq!(back.analysis.max_attempts, settings.analysis.max_attempts);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: MailctxSettings =
            serde_json::from_str(r#"{"analysis": {"maxAttempts": 5}}"#).unwrap();
        assert_eq!(settings.analysis.max_attempts, 5);
        assert_eq!(settings.analysis.acceptance_threshold, 0.75);
        assert_eq!(settings.cache.max_entries, 1000);
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let mut settings = MailctxSettings::default();
        settings.analysis.acceptance_threshold = 1.2;
        let err = settings.validate().unwrap_err();
        assert!(matches!(
            err,
            SettingsError::InvalidValue { key: "analysis.acceptanceThreshold", .. }
        ));
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut settings = MailctxSettings::default();
        settings.analysis.max_attempts = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn inverted_content_bounds_rejected() {
        let mut settings = MailctxSettings::default();
        settings.templates.min_content_length = 20_000;
        assert!(matches!(
            settings.validate().unwrap_err(),
            SettingsError::InvalidValue { key: "templates.minContentLength", .. }
        ));
    }

    #[test]
    fn http_extractor_needs_url() {
        let mut settings = MailctxSettings::default();
        settings.inference.extractor = ExtractorKind::Http;
        assert!(settings.validate().is_err());
        settings.inference.extractor_url = Some("http://localhost:8500/analyze".into());
        settings.validate().unwrap();
    }
}
