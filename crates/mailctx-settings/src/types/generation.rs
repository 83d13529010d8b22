use serde::{Deserialize, Serialize};

/// Template admission rules.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateSettings {
    pub min_content_length: usize,
    pub max_content_length: usize,
    pub min_quality_score: f64,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            min_content_length: 50,
            max_content_length: 10_000,
            min_quality_score: 0.75,
        }
    }
}

/// Response generation and validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseSettings {
    pub min_confidence: f64,
    /// Share of a tone's marker words a reply must contain.
    pub tone_marker_ratio: f64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub prohibited_terms: Vec<String>,
}

impl Default for ResponseSettings {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            tone_marker_ratio: 0.3,
            max_attempts: 3,
            retry_delay_ms: 1000,
            prohibited_terms: ["confidential", "private", "secret", "classified"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Which inference backends to use.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InferenceSettings {
    pub extractor: ExtractorKind,
    pub extractor_url: Option<String>,
    pub generator_url: Option<String>,
    pub generator_model: String,
    pub request_timeout_ms: u64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            extractor: ExtractorKind::Lexical,
            extractor_url: None,
            generator_url: None,
            generator_model: "default".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtractorKind {
    /// In-process keyword extraction.
    Lexical,
    /// Remote inference service speaking JSON over HTTP.
    Http,
}
