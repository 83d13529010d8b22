use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EmailId, ResponseId, TemplateId, ThreadId};
use crate::wire::{ResponseStatus, ResponseTone};

/// Free-form values describing the email being answered (sender name,
/// project, original content, ...). Also the source for template
/// placeholders.
pub type ContextData = BTreeMap<String, serde_json::Value>;

/// Lineage and bookkeeping keys stored in `Response::metadata`.
pub mod lineage {
    pub const ORIGINAL_RESPONSE_ID: &str = "original_response_id";
    pub const ORIGINAL_CONTENT: &str = "original_content";
    pub const CUSTOMIZATION: &str = "customization";
    pub const PRESERVED_CONTEXT: &str = "preserved_context";
    pub const VALIDATION: &str = "validation";
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub response_id: ResponseId,
    pub email_id: EmailId,
    pub thread_id: Option<ThreadId>,
    pub content: String,
    pub template_id: Option<TemplateId>,
    pub template_version: Option<u32>,
    pub tone: ResponseTone,
    pub status: ResponseStatus,
    pub confidence_score: f64,
    pub context_match_score: f64,
    #[serde(default)]
    pub learning_metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub context_data: ContextData,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub generated_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl Response {
    /// A fresh draft with zeroed scores.
    pub fn draft(email_id: EmailId, content: impl Into<String>, tone: ResponseTone) -> Self {
        let now = Utc::now();
        Self {
            response_id: ResponseId::new(),
            email_id,
            thread_id: None,
            content: content.into(),
            template_id: None,
            template_version: None,
            tone,
            status: ResponseStatus::Draft,
            confidence_score: 0.0,
            context_match_score: 0.0,
            learning_metrics: BTreeMap::new(),
            context_data: ContextData::new(),
            metadata: BTreeMap::new(),
            generated_at: now,
            last_updated_at: now,
        }
    }

    /// Id of the response this one was customised from.
    pub fn original_response_id(&self) -> Option<&str> {
        self.metadata
            .get(lineage::ORIGINAL_RESPONSE_ID)
            .and_then(|v| v.as_str())
    }
}

/// Edits applied by `customize_response`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customization {
    /// Literal `(from, to)` replacements, applied in order.
    #[serde(default)]
    pub replacements: Vec<(String, String)>,
    #[serde(default)]
    pub append: Option<String>,
    #[serde(default)]
    pub tone: Option<ResponseTone>,
}

impl Customization {
    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty() && self.append.is_none() && self.tone.is_none()
    }
}

/// Per-request generation preferences.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default)]
    pub template_category: Option<crate::wire::TemplateCategory>,
    /// Appended after the body unless already present.
    #[serde(default)]
    pub signature: Option<String>,
}
