use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Raw output of the inference collaborator for one email. Ephemeral: it is
/// turned into a [`Context`](crate::context::Context) and dropped.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSignal {
    pub confidence: Option<f64>,
    pub topics: Option<Vec<TopicSignal>>,
    #[serde(default)]
    pub entities: BTreeMap<String, Vec<EntitySignal>>,
    #[serde(default)]
    pub relationships: Vec<RelationshipSignal>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopicSignal {
    pub text: String,
    pub importance: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntitySignal {
    pub text: String,
    pub confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationshipSignal {
    pub source: String,
    pub confidence: f64,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub importance: Option<f64>,
    /// Mail address of the related party, when inference resolved one.
    #[serde(default)]
    pub address: Option<String>,
}

impl AnalysisSignal {
    pub fn is_complete(&self) -> bool {
        self.confidence.is_some() && self.topics.is_some()
    }

    /// Entities across every kind, in kind order.
    pub fn all_entities(&self) -> impl Iterator<Item = &EntitySignal> {
        self.entities.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_partial_payload() {
        let json = r#"{"confidence": 0.8, "topics": [{"text": "budget", "importance": 0.9}]}"#;
        let signal: AnalysisSignal = serde_json::from_str(json).unwrap();
        assert!(signal.is_complete());
        assert!(signal.entities.is_empty());
        assert!(signal.relationships.is_empty());
    }

    #[test]
    fn missing_topics_is_incomplete() {
        let signal: AnalysisSignal = serde_json::from_str(r#"{"confidence": 0.8}"#).unwrap();
        assert!(!signal.is_complete());
    }

    #[test]
    fn all_entities_flattens_kinds() {
        let mut signal = AnalysisSignal::default();
        signal.entities.insert(
            "ORG".into(),
            vec![EntitySignal { text: "Acme".into(), confidence: 0.9 }],
        );
        signal.entities.insert(
            "MONEY".into(),
            vec![EntitySignal { text: "$5M".into(), confidence: 0.8 }],
        );
        let texts: Vec<&str> = signal.all_entities().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["$5M", "Acme"]);
    }
}
