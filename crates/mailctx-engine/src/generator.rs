use std::sync::Arc;

use serde_json::Value;
use tracing::{info, instrument, warn};

use mailctx_core::errors::{EntityRef, ValidationError, ValidationRule};
use mailctx_core::ids::{is_well_formed, EmailId, ResponseId, ThreadId};
use mailctx_core::provider::TextGenerator;
use mailctx_core::response::{lineage, ContextData, Customization, Preferences, Response};
use mailctx_core::template::{fill_placeholders, UsageData};
use mailctx_core::wire::{ResponseStatus, ResponseTone};
use mailctx_store::{ResponseRepo, StoreError};

use crate::error::EngineError;
use crate::response_validator::{metric, ResponseValidator, ResponseVerdict};
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::templates::TemplateStore;

/// Context key holding the body of the email being answered.
pub const EMAIL_CONTENT: &str = "email_content";
/// Context key holding the thread the email belongs to.
pub const THREAD_ID: &str = "thread_id";

/// Scorer component used as the context-match score when present.
const CONTEXT_MATCH_COMPONENT: &str = "context_relevance";

/// Drafts replies from templates and a text generator, and derives
/// customised variants of stored replies.
pub struct ResponseGenerator {
    templates: TemplateStore,
    generator: Arc<dyn TextGenerator>,
    validator: ResponseValidator,
    responses: ResponseRepo,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl ResponseGenerator {
    pub fn new(
        templates: TemplateStore,
        generator: Arc<dyn TextGenerator>,
        validator: ResponseValidator,
        responses: ResponseRepo,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            templates,
            generator,
            validator,
            responses,
            retry,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn get_response(&self, response_id: &ResponseId) -> Result<Response, EngineError> {
        self.responses.get(response_id).map_err(not_found)
    }

    #[instrument(skip_all, fields(email_id = %email_id, tone = %tone))]
    pub async fn generate_response(
        &self,
        email_id: &EmailId,
        context_data: &ContextData,
        tone: ResponseTone,
        preferences: &Preferences,
    ) -> Result<Response, EngineError> {
        let entity = || EntityRef::Response(email_id.to_string());
        if !is_well_formed(email_id.as_str()) {
            return Err(ValidationError::new(
                ValidationRule::MalformedIdentifier,
                "email_id",
                entity(),
                format!("{:?} is not a valid identifier", email_id.as_str()),
            )
            .into());
        }
        if context_data.is_empty() {
            return Err(ValidationError::new(ValidationRule::EmptyField, "context_data", entity(), "no context supplied").into());
        }

        let template = self.templates.select(tone, preferences.template_category)?;
        let filled = template.as_ref().map(|t| fill_placeholders(&t.content, context_data));
        let prompt = build_prompt(context_data, tone, filled.as_deref());

        let generator = &self.generator;
        let prompt = prompt.as_str();
        let text = self
            .retry
            .run(self.sleeper.as_ref(), |_attempt| async move {
                Ok::<_, EngineError>(generator.generate(prompt).await?)
            })
            .await?;

        let mut response = Response::draft(
            email_id.clone(),
            with_signature(text.trim(), preferences.signature.as_deref()),
            tone,
        );
        response.status = ResponseStatus::Generated;
        response.thread_id = context_data
            .get(THREAD_ID)
            .and_then(Value::as_str)
            .filter(|t| is_well_formed(t))
            .map(ThreadId::from_raw);
        response.template_id = template.as_ref().map(|t| t.template_id.clone());
        response.template_version = template.as_ref().map(|t| t.version);
        response.context_data = context_data.clone();
        response
            .metadata
            .insert("generator_model".into(), Value::from(generator.model()));

        let verdict = self.validator.validate(&response, context_data).await?;
        if let Some(t) = &template {
            self.templates.track_usage(
                &t.template_id,
                UsageData {
                    success: Some(verdict.passed),
                },
            )?;
        }
        if !verdict.passed {
            warn!(reason = %verdict.reason(), "generated response rejected");
            return Err(rejected(&verdict));
        }

        apply_verdict(&mut response, &verdict);
        self.responses.insert(&response)?;
        info!(
            response_id = %response.response_id,
            template_id = response.template_id.as_ref().map(|t| t.as_str()).unwrap_or("none"),
            confidence = response.confidence_score,
            "response generated"
        );
        Ok(response)
    }

    /// Derive a new response from a stored one. The original row is left
    /// untouched; the new one records where it came from.
    #[instrument(skip_all, fields(response_id = %response_id, preserve_context = preserve_context))]
    pub async fn customize_response(
        &self,
        response_id: &ResponseId,
        customization: Customization,
        preserve_context: bool,
    ) -> Result<Response, EngineError> {
        if customization.is_empty() {
            return Err(ValidationError::new(
                ValidationRule::NoChange,
                "customization",
                EntityRef::Response(response_id.to_string()),
                "no customization requested",
            )
            .into());
        }
        let original = self.get_response(response_id)?;

        let mut content = original.content.clone();
        for (from, to) in &customization.replacements {
            if !from.is_empty() {
                content = content.replace(from.as_str(), to);
            }
        }
        if let Some(extra) = &customization.append {
            content = format!("{}\n\n{}", content.trim_end(), extra.trim());
        }

        let mut custom = Response::draft(
            original.email_id.clone(),
            content,
            customization.tone.unwrap_or(original.tone),
        );
        custom.status = ResponseStatus::Customized;
        custom.thread_id = original.thread_id.clone();
        custom.template_id = original.template_id.clone();
        custom.template_version = original.template_version;
        if preserve_context {
            custom.context_data = original.context_data.clone();
            custom.metadata = original.metadata.clone();
            custom
                .metadata
                .insert(lineage::ORIGINAL_CONTENT.into(), Value::from(original.content.clone()));
        }
        custom
            .metadata
            .insert(lineage::ORIGINAL_RESPONSE_ID.into(), Value::from(original.response_id.as_str()));
        custom.metadata.insert(
            lineage::CUSTOMIZATION.into(),
            serde_json::to_value(&customization).unwrap_or_default(),
        );
        custom
            .metadata
            .insert(lineage::PRESERVED_CONTEXT.into(), Value::from(preserve_context));

        let verdict = self.validator.validate(&custom, &original.context_data).await?;
        if !verdict.passed {
            warn!(reason = %verdict.reason(), "customized response rejected");
            return Err(rejected(&verdict));
        }
        apply_verdict(&mut custom, &verdict);
        self.responses.insert(&custom)?;
        info!(
            response_id = %custom.response_id,
            original = %original.response_id,
            "response customized"
        );
        Ok(custom)
    }
}

fn build_prompt(context: &ContextData, tone: ResponseTone, template: Option<&str>) -> String {
    let mut prompt = format!(
        "Write a {} reply to the email below.\n",
        tone.as_str().to_lowercase()
    );
    if let Some(email) = context.get(EMAIL_CONTENT).and_then(Value::as_str) {
        prompt.push_str("\nEmail:\n");
        prompt.push_str(email.trim());
        prompt.push('\n');
    }
    let facts: Vec<String> = context
        .iter()
        .filter(|(k, _)| k.as_str() != EMAIL_CONTENT)
        .map(|(k, v)| match v {
            Value::String(s) => format!("- {k}: {s}"),
            other => format!("- {k}: {other}"),
        })
        .collect();
    if !facts.is_empty() {
        prompt.push_str("\nContext:\n");
        prompt.push_str(&facts.join("\n"));
        prompt.push('\n');
    }
    if let Some(template) = template {
        prompt.push_str("\nBase the reply on this template:\n");
        prompt.push_str(template);
        prompt.push('\n');
    }
    prompt
}

fn with_signature(body: &str, signature: Option<&str>) -> String {
    match signature.map(str::trim).filter(|s| !s.is_empty()) {
        Some(sig) if !body.contains(sig) => format!("{body}\n\n{sig}"),
        _ => body.to_string(),
    }
}

fn apply_verdict(response: &mut Response, verdict: &ResponseVerdict) {
    let confidence = verdict.metric(metric::CONFIDENCE).unwrap_or(0.0).clamp(0.0, 1.0);
    response.confidence_score = confidence;
    response.context_match_score = verdict
        .metric(CONTEXT_MATCH_COMPONENT)
        .unwrap_or(confidence)
        .clamp(0.0, 1.0);
    response.learning_metrics = verdict.metrics.clone();
    response.metadata.insert(
        lineage::VALIDATION.into(),
        serde_json::to_value(verdict).unwrap_or_default(),
    );
}

fn rejected(verdict: &ResponseVerdict) -> EngineError {
    EngineError::ResponseRejected {
        reason: verdict.reason(),
        confidence: verdict.metric(metric::CONFIDENCE).unwrap_or(0.0),
    }
}

fn not_found(e: StoreError) -> EngineError {
    match e {
        StoreError::NotFound(what) => EngineError::NotFound(what),
        other => EngineError::Store(other),
    }
}
