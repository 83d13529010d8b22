//! Service wiring from settings.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tracing::info;

use mailctx_core::provider::{QualityScorer, SignalExtractor};
use mailctx_engine::{
    CachedExtractor, ContextAnalyzer, ResponseGenerator, ResponseRules, ResponseValidator, RetryPolicy,
    TemplateRules, TemplateStore,
};
use mailctx_inference::{HeuristicScorer, HttpExtractor, HttpGenerator, KeywordExtractor};
use mailctx_settings::{ExtractorKind, MailctxSettings};
use mailctx_store::{ContextRepo, Database, ResponseRepo, TemplateRepo};

pub struct App {
    pub settings: &'static MailctxSettings,
    pub db: Database,
    scorer: Arc<dyn QualityScorer>,
}

impl App {
    pub fn open(settings: &'static MailctxSettings) -> Result<Self> {
        let path = settings.storage.resolved_path();
        let db = Database::open(&path).with_context(|| format!("opening database at {}", path.display()))?;
        Ok(Self {
            settings,
            db,
            scorer: Arc::new(HeuristicScorer::new()),
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.settings.inference.request_timeout_ms)
    }

    fn extractor(&self) -> Result<Arc<dyn SignalExtractor>> {
        let inference = &self.settings.inference;
        let inner: Arc<dyn SignalExtractor> = match inference.extractor {
            ExtractorKind::Lexical => Arc::new(KeywordExtractor::new()),
            ExtractorKind::Http => {
                let url = inference
                    .extractor_url
                    .as_deref()
                    .context("inference.extractorUrl is required for the http extractor")?;
                Arc::new(HttpExtractor::new(url, self.timeout())?)
            }
        };
        info!(extractor = inner.name(), cache = self.settings.cache.enabled, "signal extractor ready");
        if self.settings.cache.enabled {
            Ok(Arc::new(CachedExtractor::from_settings(inner, &self.settings.cache)))
        } else {
            Ok(inner)
        }
    }

    pub fn contexts(&self) -> ContextRepo {
        ContextRepo::new(self.db.clone())
    }

    pub fn analyzer(&self) -> Result<ContextAnalyzer> {
        Ok(ContextAnalyzer::from_settings(self.extractor()?, &self.settings.analysis).with_store(self.contexts()))
    }

    pub fn templates(&self) -> TemplateStore {
        TemplateStore::new(
            TemplateRepo::new(self.db.clone()),
            self.scorer.clone(),
            TemplateRules::from(&self.settings.templates),
        )
    }

    pub fn responses(&self) -> ResponseRepo {
        ResponseRepo::new(self.db.clone())
    }

    pub fn generator(&self) -> Result<ResponseGenerator> {
        let inference = &self.settings.inference;
        let url = inference
            .generator_url
            .as_deref()
            .context("inference.generatorUrl is required to generate responses")?;
        let llm = HttpGenerator::new(url, inference.generator_model.as_str(), self.timeout())?;
        Ok(ResponseGenerator::new(
            self.templates(),
            Arc::new(llm),
            ResponseValidator::new(ResponseRules::from(&self.settings.responses), self.scorer.clone()),
            self.responses(),
            RetryPolicy::from_responses(&self.settings.responses),
        ))
    }
}
