use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use mailctx_core::errors::InferenceError;
use mailctx_core::provider::SignalExtractor;
use mailctx_core::signal::{AnalysisSignal, EntitySignal, RelationshipSignal, TopicSignal};

const MIN_WORD_LENGTH: usize = 3;
const MAX_TOPICS: usize = 10;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\w.+-]+@[\w-]+(?:\.[\w-]+)+").unwrap());
static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+|www\.\S+").unwrap());
static MONEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\d[\d,]*(?:\.\d+)?(?:\s?[kKmMbB]\b)?").unwrap());
static PERCENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)?%").unwrap());
static QUARTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bQ[1-4]\b").unwrap());
static DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:today|tomorrow|yesterday|next week|monday|tuesday|wednesday|thursday|friday|saturday|sunday|january|february|march|april|june|july|august|september|october|november|december)\b",
    )
    .unwrap()
});

const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "all", "also", "and", "any", "are", "because", "been",
    "before", "being", "below", "between", "both", "but", "can", "could", "did", "does", "doing",
    "down", "during", "each", "few", "for", "from", "further", "had", "has", "have", "having",
    "her", "here", "hers", "him", "his", "how", "into", "its", "just", "more", "most", "nor",
    "not", "now", "off", "once", "only", "other", "our", "ours", "out", "over", "own", "same",
    "she", "should", "some", "such", "than", "that", "the", "their", "theirs", "them", "then",
    "there", "these", "they", "this", "those", "through", "too", "under", "until", "very",
    "was", "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will",
    "with", "would", "you", "your", "yours",
];

/// Role nouns that mark a relationship to the sender, keyed by singular form.
const ROLE_WORDS: &[&str] = &[
    "stakeholder", "team", "client", "customer", "vendor", "supplier", "partner", "manager",
    "colleague",
];

/// Deterministic, dependency-free signal extraction from raw email text.
///
/// Topics are ranked by term frequency blended with how early the term
/// appears; entities come from pattern matches; relationships from mail
/// addresses and role nouns. Good enough to drive the pipeline without a
/// model, and fully reproducible for tests.
#[derive(Clone, Debug, Default)]
pub struct KeywordExtractor;

impl KeywordExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Ranked keywords with importance in [0, 1], highest first.
    pub fn keywords(&self, text: &str, top_n: usize) -> Vec<TopicSignal> {
        rank_terms(&tokenize(text), top_n)
    }

    pub fn extract(&self, text: &str) -> Result<AnalysisSignal, InferenceError> {
        if text.trim().is_empty() {
            return Err(InferenceError::InvalidRequest("empty email content".into()));
        }

        let tokens = tokenize(text);
        let topics = rank_terms(&tokens, MAX_TOPICS);
        let entities = extract_entities(text);
        let relationships = extract_relationships(text, &tokens);

        let mut confidence = 0.4 + 0.05 * tokens.len().min(8) as f64;
        if !entities.is_empty() {
            confidence += 0.1;
        }
        if !relationships.is_empty() {
            confidence += 0.1;
        }
        let confidence = confidence.min(0.95);

        debug!(
            topics = topics.len(),
            entity_kinds = entities.len(),
            relationships = relationships.len(),
            confidence,
            "lexical extraction"
        );

        Ok(AnalysisSignal {
            confidence: Some(confidence),
            topics: Some(topics),
            entities,
            relationships,
        })
    }
}

#[async_trait]
impl SignalExtractor for KeywordExtractor {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn infer(&self, text: &str) -> Result<AnalysisSignal, InferenceError> {
        self.extract(text)
    }
}

/// Lowercased content words, in order, with URLs, addresses, stop words and
/// short or numeric tokens removed.
fn tokenize(text: &str) -> Vec<String> {
    let without_urls = URL.replace_all(text, " ");
    let cleaned = EMAIL.replace_all(&without_urls, " ");
    cleaned
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= MIN_WORD_LENGTH)
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

fn rank_terms(tokens: &[String], top_n: usize) -> Vec<TopicSignal> {
    if tokens.is_empty() {
        return Vec::new();
    }

    // term -> (count, first position)
    let mut stats: HashMap<String, (usize, usize)> = HashMap::new();
    for (pos, token) in tokens.iter().enumerate() {
        stats.entry(token.clone()).or_insert((0, pos)).0 += 1;
    }
    let mut bigrams: HashMap<String, (usize, usize)> = HashMap::new();
    for (pos, pair) in tokens.windows(2).enumerate() {
        if pair[0] != pair[1] {
            bigrams
                .entry(format!("{} {}", pair[0], pair[1]))
                .or_insert((0, pos))
                .0 += 1;
        }
    }
    stats.extend(bigrams.into_iter().filter(|(_, (count, _))| *count >= 2));

    let max_count = stats.values().map(|(c, _)| *c).max().unwrap_or(1) as f64;
    let len = tokens.len() as f64;

    let mut ranked: Vec<(String, f64, usize)> = stats
        .into_iter()
        .map(|(term, (count, first))| {
            let importance = 0.6 * (count as f64 / max_count) + 0.4 * (1.0 - first as f64 / len);
            (term, importance, first)
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.2.cmp(&b.2))
            .then(a.0.cmp(&b.0))
    });

    ranked
        .into_iter()
        .take(top_n)
        .map(|(text, importance, _)| TopicSignal { text, importance })
        .collect()
}

fn extract_entities(text: &str) -> BTreeMap<String, Vec<EntitySignal>> {
    let patterns: [(&str, &Regex, f64); 5] = [
        ("ADDRESS", &*EMAIL, 0.95),
        ("MONEY", &*MONEY, 0.9),
        ("PERCENT", &*PERCENT, 0.9),
        ("QUARTER", &*QUARTER, 0.85),
        ("DATE", &*DATE, 0.8),
    ];

    let mut entities: BTreeMap<String, Vec<EntitySignal>> = BTreeMap::new();
    for (kind, pattern, confidence) in patterns {
        for m in pattern.find_iter(text) {
            let mut value = m.as_str().trim().to_string();
            if kind == "QUARTER" {
                value = value.to_uppercase();
            }
            let found = entities.entry(kind.to_string()).or_default();
            if !found.iter().any(|e| e.text.eq_ignore_ascii_case(&value)) {
                found.push(EntitySignal { text: value, confidence });
            }
        }
    }

    // Capitalised words inside a sentence are weak name candidates.
    let names = entities.entry("NAME".to_string()).or_default();
    for sentence in text.split(['.', '!', '?', '\n']) {
        for word in sentence.split_whitespace().skip(1) {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric());
            let starts_upper = word.chars().next().is_some_and(char::is_uppercase);
            if starts_upper
                && word.chars().count() >= MIN_WORD_LENGTH
                && !QUARTER.is_match(word)
                && !DATE.is_match(word)
                && !names.iter().any(|e| e.text == word)
            {
                names.push(EntitySignal { text: word.to_string(), confidence: 0.6 });
            }
        }
    }
    entities.retain(|_, found| !found.is_empty());
    entities
}

fn extract_relationships(text: &str, tokens: &[String]) -> Vec<RelationshipSignal> {
    let mut relationships = Vec::new();

    let mut addresses: Vec<(String, usize)> = Vec::new();
    for m in EMAIL.find_iter(text) {
        let address = m.as_str().to_lowercase();
        match addresses.iter_mut().find(|(a, _)| *a == address) {
            Some((_, count)) => *count += 1,
            None => addresses.push((address, 1)),
        }
    }
    for (address, mentions) in addresses {
        relationships.push(RelationshipSignal {
            source: address.clone(),
            confidence: mention_confidence(0.8, mentions),
            kind: "correspondent".into(),
            importance: Some(mention_importance(mentions)),
            address: Some(address),
        });
    }

    let mut roles: Vec<(&str, usize)> = Vec::new();
    for token in tokens {
        let singular = token.strip_suffix('s').unwrap_or(token);
        if let Some(&role) = ROLE_WORDS.iter().find(|r| **r == singular) {
            match roles.iter_mut().find(|(r, _)| *r == role) {
                Some((_, count)) => *count += 1,
                None => roles.push((role, 1)),
            }
        }
    }
    for (role, mentions) in roles {
        relationships.push(RelationshipSignal {
            source: role.to_string(),
            confidence: mention_confidence(0.8, mentions),
            kind: role.to_string(),
            importance: Some(mention_importance(mentions)),
            address: None,
        });
    }

    relationships
}

fn mention_confidence(base: f64, mentions: usize) -> f64 {
    (base + 0.05 * mentions.saturating_sub(1) as f64).min(0.95)
}

fn mention_importance(mentions: usize) -> f64 {
    (0.5 + 0.1 * mentions.saturating_sub(1) as f64).min(1.0)
}
