//! Versioned response templates with per-version usage analytics.
//!
//! Every create or revise produces a new immutable version row; the current
//! pointer moves forward and older versions stay readable. Content checks
//! (length, placeholder set, scored quality) run before anything is written.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use mailctx_core::errors::{EntityRef, ValidationError, ValidationRule};
use mailctx_core::ids::TemplateId;
use mailctx_core::provider::QualityScorer;
use mailctx_core::response::ContextData;
use mailctx_core::template::{
    extract_placeholders, NewTemplate, ResponseTemplate, TemplateQuery, TemplateRevision, UsageAnalytics,
    UsageData, UsageMetrics,
};
use mailctx_core::wire::{ResponseTone, TemplateCategory};
use mailctx_settings::TemplateSettings;
use mailctx_store::{StoreError, TemplateRepo};

use crate::error::EngineError;

#[derive(Clone, Debug, PartialEq)]
pub struct TemplateRules {
    pub min_content_length: usize,
    pub max_content_length: usize,
    pub min_quality_score: f64,
}

impl From<&TemplateSettings> for TemplateRules {
    fn from(s: &TemplateSettings) -> Self {
        Self {
            min_content_length: s.min_content_length,
            max_content_length: s.max_content_length,
            min_quality_score: s.min_quality_score,
        }
    }
}

impl Default for TemplateRules {
    fn default() -> Self {
        Self::from(&TemplateSettings::default())
    }
}

#[derive(Clone)]
pub struct TemplateStore {
    repo: TemplateRepo,
    scorer: Arc<dyn QualityScorer>,
    rules: TemplateRules,
}

impl TemplateStore {
    pub fn new(repo: TemplateRepo, scorer: Arc<dyn QualityScorer>, rules: TemplateRules) -> Self {
        Self { repo, scorer, rules }
    }

    /// Validate and persist version 1 of a new template.
    #[instrument(skip_all, fields(name = %input.name))]
    pub async fn create(&self, input: NewTemplate) -> Result<ResponseTemplate, EngineError> {
        let template_id = TemplateId::new();
        let entity = EntityRef::Template(template_id.to_string());
        if input.name.trim().is_empty() {
            return Err(ValidationError::new(ValidationRule::EmptyField, "name", entity, "template name is empty").into());
        }

        let placeholders = self
            .check_content(&input.content, input.tone, input.category, input.placeholders.as_ref(), &entity)
            .await?;

        let template = ResponseTemplate {
            template_id,
            name: input.name.trim().to_string(),
            content: input.content,
            tone: input.tone,
            category: input.category,
            placeholders,
            tags: input.tags,
            is_active: true,
            version: 1,
            usage_metrics: UsageMetrics::default(),
            metadata: input.metadata,
            created_at: Utc::now(),
        };
        self.repo.insert_version(&template)?;
        info!(template_id = %template.template_id, name = %template.name, "template created");
        Ok(template)
    }

    /// Write version n+1 with the requested changes applied to the current
    /// version. Older versions are kept.
    #[instrument(skip(self, revision), fields(template_id = %template_id))]
    pub async fn version(
        &self,
        template_id: &TemplateId,
        revision: TemplateRevision,
    ) -> Result<ResponseTemplate, EngineError> {
        let entity = EntityRef::Template(template_id.to_string());
        if revision.is_empty() {
            return Err(no_change(entity));
        }
        let current = self.get(template_id)?;
        let content = revision.content.unwrap_or_else(|| current.content.clone());
        let tone = revision.tone.unwrap_or(current.tone);
        if content == current.content && tone == current.tone {
            return Err(no_change(entity));
        }

        let placeholders = self
            .check_content(&content, tone, current.category, None, &entity)
            .await?;

        let next = ResponseTemplate {
            content,
            tone,
            placeholders,
            version: current.version + 1,
            usage_metrics: UsageMetrics::default(),
            created_at: Utc::now(),
            ..current
        };
        self.repo.insert_version(&next)?;
        info!(template_id = %template_id, version = next.version, "template versioned");
        Ok(next)
    }

    /// Current version.
    pub fn get(&self, template_id: &TemplateId) -> Result<ResponseTemplate, EngineError> {
        self.repo.current(template_id).map_err(not_found)
    }

    /// Every version, oldest first.
    pub fn get_versions(&self, template_id: &TemplateId) -> Result<Vec<ResponseTemplate>, EngineError> {
        self.repo.versions(template_id).map_err(not_found)
    }

    /// Record one use of the current version.
    pub fn track_usage(&self, template_id: &TemplateId, usage: UsageData) -> Result<UsageAnalytics, EngineError> {
        self.repo.track_usage(template_id, usage.success).map_err(not_found)
    }

    /// Current versions matching every filter in `query`.
    pub fn find(&self, query: &TemplateQuery) -> Result<Vec<ResponseTemplate>, EngineError> {
        let candidates = self
            .repo
            .list_current(query.category, None, query.name_pattern.as_deref(), false)?;
        let found: Vec<_> = candidates
            .into_iter()
            .filter(|t| query.tags.is_subset(&t.tags))
            .collect();
        debug!(count = found.len(), "templates found");
        Ok(found)
    }

    /// Best active template for a tone: highest success rate, then most
    /// used, then name.
    pub fn select(
        &self,
        tone: ResponseTone,
        category: Option<TemplateCategory>,
    ) -> Result<Option<ResponseTemplate>, EngineError> {
        let candidates = self.repo.list_current(category, Some(tone), None, true)?;
        Ok(candidates.into_iter().min_by(rank))
    }

    async fn check_content(
        &self,
        content: &str,
        tone: ResponseTone,
        category: TemplateCategory,
        declared: Option<&BTreeSet<String>>,
        entity: &EntityRef,
    ) -> Result<BTreeSet<String>, EngineError> {
        let length = content.chars().count();
        if length < self.rules.min_content_length || length > self.rules.max_content_length {
            return Err(ValidationError::new(
                ValidationRule::ContentLength,
                "content",
                entity.clone(),
                format!(
                    "{length} characters, expected {}..={}",
                    self.rules.min_content_length, self.rules.max_content_length
                ),
            )
            .into());
        }

        let found = extract_placeholders(content);
        if found.is_empty() {
            return Err(ValidationError::new(
                ValidationRule::PlaceholderMismatch,
                "placeholders",
                entity.clone(),
                "content has no placeholders",
            )
            .into());
        }
        if let Some(declared) = declared {
            if *declared != found {
                return Err(ValidationError::new(
                    ValidationRule::PlaceholderMismatch,
                    "placeholders",
                    entity.clone(),
                    format!("declared {declared:?}, content has {found:?}"),
                )
                .into());
            }
        }

        let score = self
            .scorer
            .score(content, &quality_context(tone, category), tone)
            .await;
        if score.aggregate < self.rules.min_quality_score {
            return Err(EngineError::TemplateQuality {
                score: score.aggregate,
                minimum: self.rules.min_quality_score,
            });
        }
        Ok(found)
    }
}

/// What a template is scored against when it has no email to answer yet.
fn quality_context(tone: ResponseTone, category: TemplateCategory) -> ContextData {
    let mut ctx = ContextData::new();
    ctx.insert("tone".into(), tone.as_str().to_lowercase().into());
    ctx.insert(
        "category".into(),
        category.as_str().to_lowercase().replace('_', " ").into(),
    );
    ctx
}

fn rank(a: &ResponseTemplate, b: &ResponseTemplate) -> Ordering {
    b.usage_metrics
        .success_rate
        .total_cmp(&a.usage_metrics.success_rate)
        .then_with(|| b.usage_metrics.usage_count.cmp(&a.usage_metrics.usage_count))
        .then_with(|| a.name.cmp(&b.name))
}

fn no_change(entity: EntityRef) -> EngineError {
    ValidationError::new(ValidationRule::NoChange, "revision", entity, "no content or tone change requested").into()
}

fn not_found(e: StoreError) -> EngineError {
    match e {
        StoreError::NotFound(what) => EngineError::NotFound(what),
        other => EngineError::Store(other),
    }
}
