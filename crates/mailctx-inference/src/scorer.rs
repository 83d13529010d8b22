use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use mailctx_core::provider::{QualityScore, QualityScorer};
use mailctx_core::response::ContextData;
use mailctx_core::text::{words, Normalized};
use mailctx_core::wire::ResponseTone;

pub const CONTEXT_RELEVANCE: &str = "context_relevance";
pub const TONE_CONSISTENCY: &str = "tone_consistency";
pub const RESPONSE_COHERENCE: &str = "response_coherence";
pub const PROFESSIONAL_LANGUAGE: &str = "professional_language";

/// Score for a tone that has no marker list.
const UNLISTED_TONE_SCORE: f64 = 0.8;

const GREETINGS: &[&str] = &["hello", "hi", "dear"];
const CLOSINGS: &[&str] = &["regards", "sincerely", "best"];
const INFORMAL: &[&str] = &["yeah", "nah", "gonna", "wanna", "hey"];
const PROFESSIONAL: &[&str] = &["please", "thank you", "regards", "sincerely"];

/// Lexical reply-quality heuristics. Four components in [0, 1], averaged:
/// overlap with context terms, tone markers, greeting/closing/body
/// structure, and professional vs. informal vocabulary.
#[derive(Clone, Debug, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score_sync(&self, content: &str, context: &ContextData, tone: ResponseTone) -> QualityScore {
        let text = Normalized::new(content);
        let mut components = BTreeMap::new();
        components.insert(CONTEXT_RELEVANCE.to_string(), context_relevance(&text, context));
        components.insert(TONE_CONSISTENCY.to_string(), tone_consistency(&text, tone));
        components.insert(RESPONSE_COHERENCE.to_string(), coherence(content, &text));
        components.insert(PROFESSIONAL_LANGUAGE.to_string(), professional_language(&text));
        QualityScore::from_components(components)
    }
}

#[async_trait]
impl QualityScorer for HeuristicScorer {
    async fn score(&self, content: &str, context: &ContextData, tone: ResponseTone) -> QualityScore {
        self.score_sync(content, context, tone)
    }
}

fn context_relevance(text: &Normalized, context: &ContextData) -> f64 {
    let terms: BTreeSet<String> = context
        .values()
        .filter_map(|v| v.as_str())
        .flat_map(words)
        .collect();
    let overlap = terms.iter().filter(|t| text.has_word(t)).count();
    (overlap as f64 / (terms.len() as f64 + 1e-6)).min(1.0)
}

fn tone_consistency(text: &Normalized, tone: ResponseTone) -> f64 {
    let markers = tone.indicators();
    if markers.is_empty() {
        return UNLISTED_TONE_SCORE;
    }
    (text.count_of(markers) as f64 / markers.len() as f64).min(1.0)
}

fn coherence(raw: &str, text: &Normalized) -> f64 {
    let parts = raw.split('.').count();
    if parts < 2 {
        return 0.5;
    }
    let has_greeting = text.count_of(GREETINGS) > 0;
    let has_closing = text.count_of(CLOSINGS) > 0;
    let has_body = parts >= 3;
    [has_greeting, has_closing, has_body].iter().filter(|b| **b).count() as f64 / 3.0
}

fn professional_language(text: &Normalized) -> f64 {
    let informal = text.count_of(INFORMAL);
    let professional = text.count_of(PROFESSIONAL);
    if informal > 0 {
        (1.0 - 0.2 * informal as f64).max(0.0)
    } else if professional > 0 {
        1.0
    } else {
        0.8
    }
}
