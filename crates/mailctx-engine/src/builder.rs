use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};

use mailctx_core::context::{meta, Context, ProjectContext, RelationshipContext, MAX_TOPICS};
use mailctx_core::ids::{ContextId, EmailId, PersonId, ProjectId, ThreadId};
use mailctx_core::signal::{AnalysisSignal, RelationshipSignal, TopicSignal};
use mailctx_core::wire::{ProjectStatus, RelationshipType};

use crate::error::EngineError;
use crate::validator::is_valid_email;

pub const DEFAULT_SOURCE: &str = "context-engine";
pub const BUILDER_VERSION: &str = "1.0.0";

/// Domain for relationship addresses inference could not resolve. `.invalid`
/// is reserved and never routes.
pub const UNRESOLVED_DOMAIN: &str = "unresolved.invalid";

/// Default importance recorded for a relationship that carries none.
const DEFAULT_IMPORTANCE: f64 = 0.5;

/// Turns one [`AnalysisSignal`] into a [`Context`]. No I/O; `build_at`
/// takes the clock as an argument.
#[derive(Clone, Debug)]
pub struct ContextBuilder {
    item_threshold: f64,
    source: String,
}

impl ContextBuilder {
    pub fn new(item_threshold: f64) -> Self {
        Self {
            item_threshold,
            source: DEFAULT_SOURCE.to_string(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn item_threshold(&self) -> f64 {
        self.item_threshold
    }

    pub fn build(
        &self,
        signal: &AnalysisSignal,
        email_id: &EmailId,
        thread_id: &ThreadId,
        extractor: &str,
    ) -> Result<Context, EngineError> {
        self.build_at(signal, email_id, thread_id, extractor, Utc::now())
    }

    pub fn build_at(
        &self,
        signal: &AnalysisSignal,
        email_id: &EmailId,
        thread_id: &ThreadId,
        extractor: &str,
        now: DateTime<Utc>,
    ) -> Result<Context, EngineError> {
        let confidence = signal.confidence.ok_or(EngineError::IncompleteSignal("confidence"))?;
        let topics = signal.topics.as_ref().ok_or(EngineError::IncompleteSignal("topics"))?;

        let key_terms: BTreeSet<String> = signal
            .all_entities()
            .filter(|e| e.confidence >= self.item_threshold)
            .map(|e| e.text.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        let mut project_contexts: Vec<ProjectContext> = Vec::new();
        for topic in topics
            .iter()
            .filter(|t| t.importance >= self.item_threshold && !t.text.trim().is_empty())
        {
            let project = self.project_from(topic, &key_terms, now);
            if project_contexts.iter().all(|p| p.project_id != project.project_id) {
                project_contexts.push(project);
            }
        }

        let mut relationship_contexts: Vec<RelationshipContext> = Vec::new();
        for relation in signal
            .relationships
            .iter()
            .filter(|r| r.confidence >= self.item_threshold)
        {
            let rel = relationship_from(relation, now);
            match relationship_contexts.iter().position(|r| r.person_id == rel.person_id) {
                Some(i) if relationship_contexts[i].interaction_frequency < rel.interaction_frequency => {
                    relationship_contexts[i] = rel;
                }
                Some(_) => {}
                None => relationship_contexts.push(rel),
            }
        }

        let mut seen = HashSet::new();
        let topic_texts: Vec<String> = topics
            .iter()
            .map(|t| t.text.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
            .take(MAX_TOPICS)
            .collect();

        let mut metadata = BTreeMap::new();
        metadata.insert(meta::SOURCE.to_string(), self.source.clone());
        metadata.insert(meta::VERSION.to_string(), BUILDER_VERSION.to_string());
        metadata.insert(meta::TIMESTAMP.to_string(), now.to_rfc3339());
        metadata.insert(meta::EXTRACTOR.to_string(), extractor.to_string());

        Ok(Context {
            context_id: ContextId::new(),
            email_id: email_id.clone(),
            thread_id: thread_id.clone(),
            project_contexts,
            relationship_contexts,
            topics: topic_texts,
            confidence_score: confidence,
            analyzed_at: now,
            metadata,
        })
    }

    fn project_from(&self, topic: &TopicSignal, key_terms: &BTreeSet<String>, now: DateTime<Utc>) -> ProjectContext {
        let name = topic.text.trim().to_string();
        // A project always carries at least its own name as a key term.
        let key_terms = if key_terms.is_empty() {
            BTreeSet::from([name.clone()])
        } else {
            key_terms.clone()
        };
        ProjectContext {
            project_id: ProjectId::derived_from(&name),
            status: project_status(topic.importance),
            relevance_score: topic.importance,
            key_terms,
            attributes: BTreeMap::new(),
            last_updated: now,
            name,
        }
    }
}

pub fn project_status(importance: f64) -> ProjectStatus {
    if importance > 0.8 {
        ProjectStatus::Active
    } else if importance > 0.5 {
        ProjectStatus::OnHold
    } else {
        ProjectStatus::Archived
    }
}

pub fn relationship_type(confidence: f64) -> RelationshipType {
    if confidence > 0.8 {
        RelationshipType::TeamMember
    } else if confidence > 0.6 {
        RelationshipType::Stakeholder
    } else {
        RelationshipType::Client
    }
}

fn relationship_from(relation: &RelationshipSignal, now: DateTime<Utc>) -> RelationshipContext {
    let source = relation.source.trim();
    let mut sentiment_metrics = BTreeMap::new();
    sentiment_metrics.insert("confidence".to_string(), relation.confidence);
    sentiment_metrics.insert(
        "importance".to_string(),
        relation.importance.unwrap_or(DEFAULT_IMPORTANCE),
    );
    RelationshipContext {
        person_id: PersonId::derived_from(source),
        email_address: resolve_address(relation),
        name: source.to_string(),
        relationship_type: relationship_type(relation.confidence),
        interaction_frequency: relation.confidence,
        last_interaction: now,
        sentiment_metrics,
    }
}

/// Signal address, else the source itself when it is an address, else a
/// placeholder under [`UNRESOLVED_DOMAIN`].
pub fn resolve_address(relation: &RelationshipSignal) -> String {
    if let Some(address) = relation.address.as_deref().map(str::trim) {
        if is_valid_email(address) {
            return address.to_lowercase();
        }
    }
    let source = relation.source.trim();
    if is_valid_email(source) {
        return source.to_lowercase();
    }
    format!("{}@{UNRESOLVED_DOMAIN}", slug(source))
}

fn slug(text: &str) -> String {
    let mut out = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailctx_core::signal::EntitySignal;

    fn topic(text: &str, importance: f64) -> TopicSignal {
        TopicSignal {
            text: text.into(),
            importance,
        }
    }

    fn relation(source: &str, confidence: f64) -> RelationshipSignal {
        RelationshipSignal {
            source: source.into(),
            confidence,
            kind: String::new(),
            importance: None,
            address: None,
        }
    }

    fn signal() -> AnalysisSignal {
        let mut entities = BTreeMap::new();
        entities.insert(
            "QUARTER".to_string(),
            vec![
                EntitySignal { text: "Q4".into(), confidence: 0.9 },
                EntitySignal { text: "Q3".into(), confidence: 0.4 },
            ],
        );
        entities.insert(
            "ORG".to_string(),
            vec![EntitySignal { text: "Q4".into(), confidence: 0.8 }],
        );
        AnalysisSignal {
            confidence: Some(0.96),
            topics: Some(vec![topic("sales targets", 0.9), topic("budget", 0.6), topic("offsite", 0.76)]),
            entities,
            relationships: vec![relation("ana@example.com", 0.85), relation("stakeholder", 0.7), relation("vendor", 0.3)],
        }
    }

    fn build(signal: &AnalysisSignal) -> Context {
        ContextBuilder::new(0.75)
            .build(signal, &EmailId::from_raw("e1"), &ThreadId::from_raw("t1"), "test")
            .unwrap()
    }

    #[test]
    fn missing_confidence_is_incomplete() {
        let mut s = signal();
        s.confidence = None;
        let err = ContextBuilder::new(0.75)
            .build(&s, &EmailId::from_raw("e1"), &ThreadId::from_raw("t1"), "test")
            .unwrap_err();
        assert!(matches!(err, EngineError::IncompleteSignal("confidence")));
    }

    #[test]
    fn missing_topics_is_incomplete() {
        let mut s = signal();
        s.topics = None;
        let err = ContextBuilder::new(0.75)
            .build(&s, &EmailId::from_raw("e1"), &ThreadId::from_raw("t1"), "test")
            .unwrap_err();
        assert!(matches!(err, EngineError::IncompleteSignal("topics")));
    }

    #[test]
    fn blank_topics_never_become_projects() {
        let mut s = signal();
        s.topics = Some(vec![topic("  ", 0.9), topic("sales", 0.9)]);
        let ctx = build(&s);
        assert_eq!(ctx.topics, vec!["sales".to_string()]);
        let names: Vec<&str> = ctx.project_contexts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["sales"]);
        assert!(crate::validator::validate(&ctx).is_ok());
    }

    #[test]
    fn projects_only_for_important_topics() {
        let ctx = build(&signal());
        let names: Vec<&str> = ctx.project_contexts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["sales targets", "offsite"]);
        assert_eq!(ctx.project_contexts[0].status, ProjectStatus::Active);
        assert_eq!(ctx.project_contexts[1].status, ProjectStatus::OnHold);
        assert_eq!(ctx.project_contexts[0].relevance_score, 0.9);
    }

    #[test]
    fn key_terms_are_confident_entities_deduplicated() {
        let ctx = build(&signal());
        let terms: Vec<&String> = ctx.project_contexts[0].key_terms.iter().collect();
        assert_eq!(terms, vec!["Q4"]);
    }

    #[test]
    fn key_terms_fall_back_to_project_name() {
        let mut s = signal();
        s.entities.clear();
        let ctx = build(&s);
        assert!(ctx.project_contexts[0].key_terms.contains("sales targets"));
    }

    #[test]
    fn project_id_is_stable_across_builds() {
        let a = build(&signal());
        let b = build(&signal());
        assert_ne!(a.context_id, b.context_id);
        assert_eq!(a.project_contexts[0].project_id, b.project_contexts[0].project_id);
        assert_eq!(a.project_contexts[0].project_id, ProjectId::derived_from("Sales Targets"));
    }

    #[test]
    fn relationships_typed_by_confidence() {
        let ctx = build(&signal());
        assert_eq!(ctx.relationship_contexts.len(), 1);
        let rel = &ctx.relationship_contexts[0];
        assert_eq!(rel.relationship_type, RelationshipType::TeamMember);
        assert_eq!(rel.email_address, "ana@example.com");
        assert_eq!(rel.sentiment_metrics["importance"], DEFAULT_IMPORTANCE);
        assert_eq!(rel.sentiment_metrics["confidence"], 0.85);
    }

    #[test]
    fn thresholds_map_to_types_and_statuses() {
        assert_eq!(relationship_type(0.81), RelationshipType::TeamMember);
        assert_eq!(relationship_type(0.8), RelationshipType::Stakeholder);
        assert_eq!(relationship_type(0.6), RelationshipType::Client);
        assert_eq!(project_status(0.8), ProjectStatus::OnHold);
        assert_eq!(project_status(0.5), ProjectStatus::Archived);
    }

    #[test]
    fn unresolved_addresses_use_reserved_domain() {
        assert_eq!(
            resolve_address(&relation("Regional Stakeholders", 0.9)),
            "regional-stakeholders@unresolved.invalid"
        );
        assert_eq!(resolve_address(&relation("!!!", 0.9)), "unknown@unresolved.invalid");
        let mut with_address = relation("Ana", 0.9);
        with_address.address = Some("Ana@Example.com".into());
        assert_eq!(resolve_address(&with_address), "ana@example.com");
    }

    #[test]
    fn duplicate_relationships_keep_most_confident() {
        let mut s = signal();
        s.relationships.push(relation("ANA@example.com ", 0.95));
        let ctx = build(&s);
        assert_eq!(ctx.relationship_contexts.len(), 1);
        assert_eq!(ctx.relationship_contexts[0].interaction_frequency, 0.95);
    }

    #[test]
    fn topics_deduplicated_and_capped() {
        let mut s = signal();
        let mut topics: Vec<TopicSignal> = (0..15).map(|i| topic(&format!("t{i}"), 0.1)).collect();
        topics.insert(1, topic("T0", 0.1));
        s.topics = Some(topics);
        let ctx = build(&s);
        assert_eq!(ctx.topics.len(), MAX_TOPICS);
        assert_eq!(ctx.topics[0], "t0");
        assert_eq!(ctx.topics[1], "t1");
    }

    #[test]
    fn metadata_carries_required_keys() {
        let ctx = build(&signal());
        for key in [meta::SOURCE, meta::VERSION, meta::TIMESTAMP, meta::EXTRACTOR] {
            assert!(ctx.metadata.contains_key(key), "missing {key}");
        }
        assert_eq!(ctx.metadata[meta::EXTRACTOR], "test");
        assert_eq!(ctx.confidence_score, 0.96);
    }
}
