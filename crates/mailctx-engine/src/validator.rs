//! Invariant checks for [`Context`] records.
//!
//! Validation is decoupled from construction: builders and mergers produce
//! plain values, and these functions decide whether a value may be stored.
//! Checks run in a fixed order and stop at the first violation.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use mailctx_core::context::{Context, ProjectContext, RelationshipContext, MAX_TOPICS, REQUIRED_METADATA};
use mailctx_core::errors::{EntityRef, ValidationError, ValidationRule};
use mailctx_core::ids::is_well_formed;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$").unwrap()
});

pub fn is_valid_email(address: &str) -> bool {
    EMAIL.is_match(address)
}

pub fn validate(context: &Context) -> Result<(), ValidationError> {
    validate_at(context, Utc::now())
}

/// [`validate`] against an explicit clock.
pub fn validate_at(context: &Context, now: DateTime<Utc>) -> Result<(), ValidationError> {
    let entity = || EntityRef::Context(context.context_id.to_string());

    check_id(context.context_id.as_str(), "context_id", entity)?;
    check_id(context.email_id.as_str(), "email_id", entity)?;
    check_id(context.thread_id.as_str(), "thread_id", entity)?;

    if context.topics.len() > MAX_TOPICS {
        return Err(ValidationError::new(
            ValidationRule::TooManyTopics,
            "topics",
            entity(),
            format!("{} topics, at most {MAX_TOPICS} allowed", context.topics.len()),
        ));
    }
    check_unit(context.confidence_score, "confidence_score", entity)?;

    for key in REQUIRED_METADATA {
        if !context.metadata.contains_key(key) {
            return Err(ValidationError::new(
                ValidationRule::MissingMetadata,
                "metadata",
                entity(),
                format!("missing required key {key:?}"),
            ));
        }
    }

    let mut project_ids = HashSet::new();
    for project in &context.project_contexts {
        validate_project(project, now)?;
        if !project_ids.insert(&project.project_id) {
            return Err(ValidationError::new(
                ValidationRule::DuplicateKey,
                "project_id",
                entity(),
                format!("project {} appears more than once", project.project_id),
            ));
        }
    }

    let mut person_ids = HashSet::new();
    for relationship in &context.relationship_contexts {
        validate_relationship(relationship, now)?;
        if !person_ids.insert(&relationship.person_id) {
            return Err(ValidationError::new(
                ValidationRule::DuplicateKey,
                "person_id",
                entity(),
                format!("person {} appears more than once", relationship.person_id),
            ));
        }
    }

    check_not_future(context.analyzed_at, now, "analyzed_at", entity)
}

pub fn validate_project(project: &ProjectContext, now: DateTime<Utc>) -> Result<(), ValidationError> {
    let entity = || EntityRef::Project(project.project_id.to_string());

    check_id(project.project_id.as_str(), "project_id", entity)?;
    check_non_empty(&project.name, "name", entity)?;
    check_unit(project.relevance_score, "relevance_score", entity)?;
    if project.key_terms.is_empty() || project.key_terms.iter().any(|t| t.trim().is_empty()) {
        return Err(ValidationError::new(
            ValidationRule::EmptyField,
            "key_terms",
            entity(),
            "key terms must be non-empty",
        ));
    }
    check_not_future(project.last_updated, now, "last_updated", entity)
}

pub fn validate_relationship(rel: &RelationshipContext, now: DateTime<Utc>) -> Result<(), ValidationError> {
    let entity = || EntityRef::Relationship(rel.person_id.to_string());

    check_id(rel.person_id.as_str(), "person_id", entity)?;
    check_non_empty(&rel.name, "name", entity)?;
    if !is_valid_email(&rel.email_address) {
        return Err(ValidationError::new(
            ValidationRule::InvalidEmail,
            "email_address",
            entity(),
            format!("{:?} is not a valid address", rel.email_address),
        ));
    }
    check_unit(rel.interaction_frequency, "interaction_frequency", entity)?;
    for (metric, value) in &rel.sentiment_metrics {
        if !(-1.0..=1.0).contains(value) {
            return Err(ValidationError::new(
                ValidationRule::OutOfRange,
                "sentiment_metrics",
                entity(),
                format!("{metric} = {value} not in [-1, 1]"),
            ));
        }
    }
    check_not_future(rel.last_interaction, now, "last_interaction", entity)
}

fn check_id(value: &str, field: &'static str, entity: impl Fn() -> EntityRef) -> Result<(), ValidationError> {
    if is_well_formed(value) {
        Ok(())
    } else {
        Err(ValidationError::new(
            ValidationRule::MalformedIdentifier,
            field,
            entity(),
            format!("{value:?} is not a well-formed identifier"),
        ))
    }
}

fn check_unit(value: f64, field: &'static str, entity: impl Fn() -> EntityRef) -> Result<(), ValidationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new(
            ValidationRule::OutOfRange,
            field,
            entity(),
            format!("{value} not in [0, 1]"),
        ))
    }
}

fn check_non_empty(value: &str, field: &'static str, entity: impl Fn() -> EntityRef) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::new(ValidationRule::EmptyField, field, entity(), "must not be empty"))
    } else {
        Ok(())
    }
}

fn check_not_future(
    at: DateTime<Utc>,
    now: DateTime<Utc>,
    field: &'static str,
    entity: impl Fn() -> EntityRef,
) -> Result<(), ValidationError> {
    if at <= now {
        Ok(())
    } else {
        Err(ValidationError::new(
            ValidationRule::FutureTimestamp,
            field,
            entity(),
            format!("{} is after {}", at.to_rfc3339(), now.to_rfc3339()),
        ))
    }
}
