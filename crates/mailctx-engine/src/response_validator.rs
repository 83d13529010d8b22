use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use mailctx_core::errors::{EntityRef, ValidationError, ValidationRule};
use mailctx_core::provider::QualityScorer;
use mailctx_core::response::{ContextData, Response};
use mailctx_core::text::Normalized;
use mailctx_settings::ResponseSettings;

use crate::error::EngineError;

const GREETINGS: &[&str] = &["hello", "hi", "dear", "greetings", "good morning", "good afternoon"];
const CLOSINGS: &[&str] = &["regards", "sincerely", "best", "thanks", "thank you", "cheers"];

/// Names of the sub-scores recorded in [`ResponseVerdict::metrics`].
pub mod metric {
    pub const STRUCTURE: &str = "structure";
    pub const TONE_MARKERS: &str = "tone_markers";
    pub const PROHIBITED_TERMS: &str = "prohibited_terms";
    pub const CONFIDENCE: &str = "confidence";
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResponseRules {
    pub min_confidence: f64,
    pub tone_marker_ratio: f64,
    pub prohibited_terms: Vec<String>,
}

impl From<&ResponseSettings> for ResponseRules {
    fn from(s: &ResponseSettings) -> Self {
        Self {
            min_confidence: s.min_confidence,
            tone_marker_ratio: s.tone_marker_ratio,
            prohibited_terms: s.prohibited_terms.iter().map(|t| t.to_lowercase()).collect(),
        }
    }
}

impl Default for ResponseRules {
    fn default() -> Self {
        Self::from(&ResponseSettings::default())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseVerdict {
    pub passed: bool,
    /// One entry per failed check.
    pub reasons: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
}

impl ResponseVerdict {
    pub fn reason(&self) -> String {
        if self.reasons.is_empty() {
            "validation successful".to_string()
        } else {
            self.reasons.join("; ")
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    fn fail(&mut self, reason: impl Into<String>) {
        self.passed = false;
        self.reasons.push(reason.into());
    }
}

/// Structure, tone, vocabulary and scored-confidence checks on a reply.
#[derive(Clone)]
pub struct ResponseValidator {
    rules: ResponseRules,
    scorer: Arc<dyn QualityScorer>,
}

impl ResponseValidator {
    pub fn new(rules: ResponseRules, scorer: Arc<dyn QualityScorer>) -> Self {
        Self { rules, scorer }
    }

    /// Run every check. A failed check lowers the verdict; only empty
    /// content is an error.
    pub async fn validate(&self, response: &Response, context: &ContextData) -> Result<ResponseVerdict, EngineError> {
        let content = response.content.trim();
        if content.is_empty() {
            return Err(ValidationError::new(
                ValidationRule::EmptyField,
                "content",
                EntityRef::Response(response.response_id.to_string()),
                "response content is empty",
            )
            .into());
        }

        let text = Normalized::new(content);
        let mut verdict = ResponseVerdict {
            passed: true,
            ..Default::default()
        };

        // Raw line count, blank lines included.
        let lines = response.content.split('\n').count();
        let has_greeting = text.count_of(GREETINGS) > 0;
        let has_closing = text.count_of(CLOSINGS) > 0;
        let structure = [has_greeting, has_closing, lines > 2]
            .iter()
            .filter(|ok| **ok)
            .count() as f64
            / 3.0;
        verdict.metrics.insert(metric::STRUCTURE.into(), structure);
        if !has_greeting {
            verdict.fail("missing greeting");
        }
        if !has_closing {
            verdict.fail("missing closing");
        }
        if lines <= 2 {
            verdict.fail(format!("{lines} lines, expected more than 2"));
        }

        let markers = response.tone.markers();
        let tone_score = if markers.is_empty() {
            1.0
        } else {
            text.count_of(markers) as f64 / markers.len() as f64
        };
        verdict.metrics.insert(metric::TONE_MARKERS.into(), tone_score);
        if tone_score < self.rules.tone_marker_ratio {
            verdict.fail(format!(
                "tone markers {tone_score:.2} below {:.2} for {}",
                self.rules.tone_marker_ratio, response.tone
            ));
        }

        let hits: Vec<&str> = self
            .rules
            .prohibited_terms
            .iter()
            .map(String::as_str)
            .filter(|term| text.contains(term))
            .collect();
        verdict
            .metrics
            .insert(metric::PROHIBITED_TERMS.into(), hits.len() as f64);
        if !hits.is_empty() {
            verdict.fail(format!("prohibited terms: {}", hits.join(", ")));
        }

        let score = self.scorer.score(content, context, response.tone).await;
        verdict.metrics.insert(metric::CONFIDENCE.into(), score.aggregate);
        for (name, value) in &score.components {
            verdict.metrics.insert(name.clone(), *value);
        }
        if score.aggregate < self.rules.min_confidence {
            verdict.fail(format!(
                "confidence {:.3} below {:.3}",
                score.aggregate, self.rules.min_confidence
            ));
        }

        debug!(
            response_id = %response.response_id,
            passed = verdict.passed,
            confidence = score.aggregate,
            "response validated"
        );
        Ok(verdict)
    }
}
