//! Deterministic merge of two contexts from the same thread.
//!
//! Commutative fields: topic set, project and relationship key sets,
//! relevance max, key-term union, frequency mean, `last_interaction` max,
//! confidence max.
//!
//! Non-commutative fields: ids (taken from `existing`), `analyzed_at` (taken
//! from `incoming`), metadata collisions (incoming wins), `update_count`.
//! A project or relationship present on both sides keeps every other field
//! (name, status, attributes, `last_updated`, sentiment) from `existing`.
//!
//! A union that breaks an invariant, such as more than [`MAX_TOPICS`](mailctx_core::context::MAX_TOPICS)
//! topics, fails with [`EngineError::MergeValidation`].

use chrono::{DateTime, Utc};

use mailctx_core::context::{meta, Context, ProjectContext, RelationshipContext};
use mailctx_core::errors::{EntityRef, ValidationError, ValidationRule};

use crate::error::{EngineError, MergeSide};
use crate::validator;

pub fn merge(existing: &Context, incoming: &Context) -> Result<Context, EngineError> {
    merge_at(existing, incoming, Utc::now())
}

pub fn merge_at(existing: &Context, incoming: &Context, now: DateTime<Utc>) -> Result<Context, EngineError> {
    validator::validate_at(existing, now).map_err(|source| EngineError::InvalidInput {
        side: MergeSide::Existing,
        source,
    })?;
    validator::validate_at(incoming, now).map_err(|source| EngineError::InvalidInput {
        side: MergeSide::Incoming,
        source,
    })?;
    if existing.thread_id != incoming.thread_id {
        return Err(EngineError::InvalidInput {
            side: MergeSide::Incoming,
            source: ValidationError::new(
                ValidationRule::ThreadMismatch,
                "thread_id",
                EntityRef::Context(incoming.context_id.to_string()),
                format!("{} does not belong to thread {}", incoming.thread_id, existing.thread_id),
            ),
        });
    }

    let merged = combine(existing, incoming);
    validator::validate_at(&merged, now).map_err(EngineError::MergeValidation)?;
    Ok(merged)
}

/// Field-level combination without any validation.
fn combine(existing: &Context, incoming: &Context) -> Context {
    let mut project_contexts: Vec<ProjectContext> = existing
        .project_contexts
        .iter()
        .map(|p| match incoming.project(&p.project_id) {
            Some(other) => merge_project(p, other),
            None => p.clone(),
        })
        .collect();
    project_contexts.extend(
        incoming
            .project_contexts
            .iter()
            .filter(|p| existing.project(&p.project_id).is_none())
            .cloned(),
    );

    let mut relationship_contexts: Vec<RelationshipContext> = existing
        .relationship_contexts
        .iter()
        .map(|r| match incoming.relationship(&r.person_id) {
            Some(other) => merge_relationship(r, other),
            None => r.clone(),
        })
        .collect();
    relationship_contexts.extend(
        incoming
            .relationship_contexts
            .iter()
            .filter(|r| existing.relationship(&r.person_id).is_none())
            .cloned(),
    );

    let mut topics = existing.topics.clone();
    for topic in &incoming.topics {
        if !topics.contains(topic) {
            topics.push(topic.clone());
        }
    }

    let mut metadata = existing.metadata.clone();
    metadata.extend(incoming.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
    let previous = existing
        .update_count_raw()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(0);
    metadata.insert(meta::UPDATE_COUNT.to_string(), (previous + 1).to_string());

    Context {
        context_id: existing.context_id.clone(),
        email_id: existing.email_id.clone(),
        thread_id: existing.thread_id.clone(),
        project_contexts,
        relationship_contexts,
        topics,
        confidence_score: existing.confidence_score.max(incoming.confidence_score),
        analyzed_at: incoming.analyzed_at,
        metadata,
    }
}

fn merge_project(existing: &ProjectContext, incoming: &ProjectContext) -> ProjectContext {
    let mut merged = existing.clone();
    merged.relevance_score = existing.relevance_score.max(incoming.relevance_score);
    merged.key_terms.extend(incoming.key_terms.iter().cloned());
    merged
}

fn merge_relationship(existing: &RelationshipContext, incoming: &RelationshipContext) -> RelationshipContext {
    let mut merged = existing.clone();
    // Mean of the two values only, not a running mean over every analysis.
    merged.interaction_frequency = (existing.interaction_frequency + incoming.interaction_frequency) / 2.0;
    merged.last_interaction = existing.last_interaction.max(incoming.last_interaction);
    merged
}
