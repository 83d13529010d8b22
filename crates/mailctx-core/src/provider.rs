use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::InferenceError;
use crate::response::ContextData;
use crate::signal::AnalysisSignal;
use crate::wire::ResponseTone;

/// Black-box inference over raw email text.
#[async_trait]
pub trait SignalExtractor: Send + Sync {
    fn name(&self) -> &str;

    async fn infer(&self, text: &str) -> Result<AnalysisSignal, InferenceError>;
}

/// Black-box text generation from a prompt.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, InferenceError>;
}

/// Scores a piece of reply text against its context and intended tone.
#[async_trait]
pub trait QualityScorer: Send + Sync {
    async fn score(&self, content: &str, context: &ContextData, tone: ResponseTone) -> QualityScore;
}

/// Aggregate quality plus the individual components it was averaged from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub aggregate: f64,
    pub components: BTreeMap<String, f64>,
}

impl QualityScore {
    /// Aggregate = arithmetic mean of the components.
    pub fn from_components(components: BTreeMap<String, f64>) -> Self {
        let aggregate = if components.is_empty() {
            0.0
        } else {
            components.values().sum::<f64>() / components.len() as f64
        };
        Self { aggregate, components }
    }

    pub fn component(&self, name: &str) -> Option<f64> {
        self.components.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_is_mean() {
        let mut c = BTreeMap::new();
        c.insert("a".to_string(), 1.0);
        c.insert("b".to_string(), 0.5);
        let q = QualityScore::from_components(c);
        assert!((q.aggregate - 0.75).abs() < 1e-9);
        assert_eq!(q.component("b"), Some(0.5));
        assert_eq!(q.component("z"), None);
    }

    #[test]
    fn empty_components_score_zero() {
        assert_eq!(QualityScore::from_components(BTreeMap::new()).aggregate, 0.0);
    }
}
