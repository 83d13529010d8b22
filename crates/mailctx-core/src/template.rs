use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ids::TemplateId;
use crate::response::ContextData;
use crate::wire::{ResponseTone, TemplateCategory};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(\w+)\}").unwrap());

/// One version of a response template. `template_id` is shared by every
/// version; `(template_id, version)` is unique.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseTemplate {
    pub template_id: TemplateId,
    pub name: String,
    pub content: String,
    pub tone: ResponseTone,
    pub category: TemplateCategory,
    pub placeholders: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub is_active: bool,
    pub version: u32,
    pub usage_metrics: UsageMetrics,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetrics {
    pub usage_count: u64,
    pub success_rate: f64,
}

/// Per-version usage record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageAnalytics {
    pub template_id: TemplateId,
    pub version: u32,
    pub usage_count: u64,
    pub success_rate: f64,
    pub last_used: Option<DateTime<Utc>>,
}

impl UsageAnalytics {
    pub fn zeroed(template_id: TemplateId, version: u32) -> Self {
        Self {
            template_id,
            version,
            usage_count: 0,
            success_rate: 0.0,
            last_used: None,
        }
    }

    pub fn metrics(&self) -> UsageMetrics {
        UsageMetrics {
            usage_count: self.usage_count,
            success_rate: self.success_rate,
        }
    }
}

/// Input for creating a template at version 1.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTemplate {
    pub name: String,
    pub content: String,
    pub tone: ResponseTone,
    #[serde(default)]
    pub category: TemplateCategory,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Declared placeholder list; must equal the set found in `content`.
    #[serde(default)]
    pub placeholders: Option<BTreeSet<String>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Changes requested for a new template version.
#[derive(Clone, Debug, Default)]
pub struct TemplateRevision {
    pub content: Option<String>,
    pub tone: Option<ResponseTone>,
}

impl TemplateRevision {
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.tone.is_none()
    }
}

/// Outcome reported for one use of a template. `success = None` counts the
/// use without touching the success rate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UsageData {
    pub success: Option<bool>,
}

/// Filters over current template versions, ANDed together.
#[derive(Clone, Debug, Default)]
pub struct TemplateQuery {
    pub tags: BTreeSet<String>,
    pub category: Option<TemplateCategory>,
    pub name_pattern: Option<String>,
}

/// Names of every `{placeholder}` in `content`.
pub fn extract_placeholders(content: &str) -> BTreeSet<String> {
    PLACEHOLDER
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .collect()
}

/// Substitute `{name}` with the matching context value. Unknown placeholders
/// are left in place.
pub fn fill_placeholders(content: &str, values: &ContextData) -> String {
    PLACEHOLDER
        .replace_all(content, |caps: &regex::Captures<'_>| match values.get(&caps[1]) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => caps[0].to_string(),
            Some(other) => other.to_string(),
        })
        .into_owned()
}
