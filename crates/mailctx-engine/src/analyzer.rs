use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use mailctx_core::context::Context;
use mailctx_core::errors::{EntityRef, ValidationError, ValidationRule};
use mailctx_core::ids::{is_well_formed, EmailId, ThreadId};
use mailctx_core::provider::SignalExtractor;
use mailctx_settings::AnalysisSettings;
use mailctx_store::{ContextRepo, StoredContext};

use crate::builder::ContextBuilder;
use crate::error::EngineError;
use crate::gate::ConfidenceGate;
use crate::{merger, validator};

const DEFAULT_BATCH_CONCURRENCY: usize = 32;
const DEFAULT_STORE_ATTEMPTS: u32 = 5;

/// One email awaiting analysis.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub email_id: EmailId,
    pub content: String,
    pub thread_id: ThreadId,
}

impl BatchItem {
    pub fn new(email_id: impl Into<String>, content: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            email_id: EmailId::from_raw(email_id),
            content: content.into(),
            thread_id: ThreadId::from_raw(thread_id),
        }
    }
}

/// Per-item results of a batch, each list in input order.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub succeeded: Vec<Context>,
    pub failed: Vec<(EmailId, EngineError)>,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn cancelled(&self) -> usize {
        self.failed
            .iter()
            .filter(|(_, e)| matches!(e, EngineError::Cancelled))
            .count()
    }
}

/// Turns email text into validated contexts and folds them into the
/// per-thread record.
pub struct ContextAnalyzer {
    extractor: Arc<dyn SignalExtractor>,
    builder: ContextBuilder,
    gate: ConfidenceGate,
    contexts: Option<ContextRepo>,
    batch_concurrency: usize,
    store_attempts: u32,
}

impl ContextAnalyzer {
    pub fn new(extractor: Arc<dyn SignalExtractor>, builder: ContextBuilder, gate: ConfidenceGate) -> Self {
        Self {
            extractor,
            builder,
            gate,
            contexts: None,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            store_attempts: DEFAULT_STORE_ATTEMPTS,
        }
    }

    pub fn from_settings(extractor: Arc<dyn SignalExtractor>, settings: &AnalysisSettings) -> Self {
        Self::new(
            extractor,
            ContextBuilder::new(settings.item_threshold),
            ConfidenceGate::from_settings(settings),
        )
        .with_batch_concurrency(settings.batch_concurrency)
        .with_store_attempts(settings.store_attempts)
    }

    pub fn with_store(mut self, contexts: ContextRepo) -> Self {
        self.contexts = Some(contexts);
        self
    }

    pub fn with_batch_concurrency(mut self, limit: usize) -> Self {
        self.batch_concurrency = limit.max(1);
        self
    }

    pub fn with_store_attempts(mut self, attempts: u32) -> Self {
        self.store_attempts = attempts.max(1);
        self
    }

    /// Extract, build and validate a context for one email, retrying through
    /// the confidence gate.
    #[instrument(skip_all, fields(email_id = %email_id, thread_id = %thread_id))]
    pub async fn analyze(&self, email_id: &EmailId, content: &str, thread_id: &ThreadId) -> Result<Context, EngineError> {
        check_input(email_id, content, thread_id)?;

        let extractor = &self.extractor;
        let builder = &self.builder;
        let context = self
            .gate
            .run(|_attempt| async move {
                let signal = extractor.infer(content).await?;
                let context = builder.build(&signal, email_id, thread_id, extractor.name())?;
                validator::validate(&context)?;
                Ok(context)
            })
            .await?;

        info!(
            context_id = %context.context_id,
            confidence = context.confidence_score,
            projects = context.project_contexts.len(),
            relationships = context.relationship_contexts.len(),
            "email analyzed"
        );
        Ok(context)
    }

    /// Analyze independent emails with bounded concurrency. A failed item
    /// never affects its siblings; cancelling `cancel` fails every item that
    /// has not finished yet with [`EngineError::Cancelled`].
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn analyze_batch(&self, items: Vec<BatchItem>, cancel: &CancellationToken) -> BatchOutcome {
        let results: Vec<(EmailId, Result<Context, EngineError>)> = stream::iter(items)
            .map(|item| async move {
                let result = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(EngineError::Cancelled),
                    r = self.analyze(&item.email_id, &item.content, &item.thread_id) => r,
                };
                (item.email_id, result)
            })
            .buffered(self.batch_concurrency)
            .collect()
            .await;

        let mut outcome = BatchOutcome::default();
        for (email_id, result) in results {
            match result {
                Ok(context) => outcome.succeeded.push(context),
                Err(e) => {
                    warn!(email_id = %email_id, error = %e, kind = e.error_kind(), "batch item failed");
                    outcome.failed.push((email_id, e));
                }
            }
        }
        info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            cancelled = outcome.cancelled(),
            "batch analysis finished"
        );
        outcome
    }

    pub fn merge(&self, existing: &Context, incoming: &Context) -> Result<Context, EngineError> {
        merger::merge(existing, incoming)
    }

    /// Analyze an email and fold the result into its thread's stored
    /// context, retrying the read-merge-write on concurrent updates.
    #[instrument(skip_all, fields(email_id = %email_id, thread_id = %thread_id))]
    pub async fn analyze_and_store(
        &self,
        email_id: &EmailId,
        content: &str,
        thread_id: &ThreadId,
    ) -> Result<StoredContext, EngineError> {
        let repo = self
            .contexts
            .as_ref()
            .ok_or_else(|| EngineError::NotFound("context store is not configured".into()))?;
        let incoming = self.analyze(email_id, content, thread_id).await?;
        let stored = repo.merge_then_store(thread_id, self.store_attempts, |existing| match existing {
            None => Ok(incoming.clone()),
            Some(existing) => merger::merge(existing, &incoming),
        })?;
        info!(
            context_id = %stored.context.context_id,
            revision = stored.revision,
            "thread context stored"
        );
        Ok(stored)
    }
}

fn check_input(email_id: &EmailId, content: &str, thread_id: &ThreadId) -> Result<(), ValidationError> {
    let entity = || EntityRef::Context(email_id.to_string());
    if !is_well_formed(email_id.as_str()) {
        return Err(ValidationError::new(
            ValidationRule::MalformedIdentifier,
            "email_id",
            entity(),
            format!("{:?} is not a valid identifier", email_id.as_str()),
        ));
    }
    if !is_well_formed(thread_id.as_str()) {
        return Err(ValidationError::new(
            ValidationRule::MalformedIdentifier,
            "thread_id",
            entity(),
            format!("{:?} is not a valid identifier", thread_id.as_str()),
        ));
    }
    if content.trim().is_empty() {
        return Err(ValidationError::new(
            ValidationRule::EmptyField,
            "content",
            entity(),
            "email content is empty",
        ));
    }
    Ok(())
}
