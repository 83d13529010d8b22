use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ContextId, EmailId, PersonId, ProjectId, ThreadId};
use crate::wire::{ProjectStatus, RelationshipType};

/// Upper bound on `Context::topics`.
pub const MAX_TOPICS: usize = 10;

/// Metadata keys every context must carry.
pub const REQUIRED_METADATA: [&str; 3] = [meta::SOURCE, meta::VERSION, meta::TIMESTAMP];

/// Well-known metadata keys.
pub mod meta {
    pub const SOURCE: &str = "source";
    pub const VERSION: &str = "version";
    pub const TIMESTAMP: &str = "timestamp";
    pub const EXTRACTOR: &str = "extractor";
    pub const UPDATE_COUNT: &str = "update_count";
}

/// A project inferred from email topics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectContext {
    pub project_id: ProjectId,
    pub name: String,
    pub status: ProjectStatus,
    pub relevance_score: f64,
    pub key_terms: BTreeSet<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub last_updated: DateTime<Utc>,
}

/// A correspondent inferred from email relationships.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipContext {
    pub person_id: PersonId,
    pub email_address: String,
    pub name: String,
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    pub interaction_frequency: f64,
    pub last_interaction: DateTime<Utc>,
    #[serde(default)]
    pub sentiment_metrics: BTreeMap<String, f64>,
}

/// Structured context derived from one email, or from several emails of
/// the same thread after merging.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub context_id: ContextId,
    pub email_id: EmailId,
    pub thread_id: ThreadId,
    pub project_contexts: Vec<ProjectContext>,
    pub relationship_contexts: Vec<RelationshipContext>,
    pub topics: Vec<String>,
    pub confidence_score: f64,
    pub analyzed_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

impl Context {
    pub fn project(&self, id: &ProjectId) -> Option<&ProjectContext> {
        self.project_contexts.iter().find(|p| &p.project_id == id)
    }

    pub fn relationship(&self, id: &PersonId) -> Option<&RelationshipContext> {
        self.relationship_contexts.iter().find(|r| &r.person_id == id)
    }

    /// Raw `update_count` metadata value, if present.
    pub fn update_count_raw(&self) -> Option<&str> {
        self.metadata.get(meta::UPDATE_COUNT).map(String::as_str)
    }
}
