use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use mailctx_core::errors::InferenceError;
use mailctx_core::provider::{QualityScore, QualityScorer, SignalExtractor, TextGenerator};
use mailctx_core::response::ContextData;
use mailctx_core::signal::AnalysisSignal;
use mailctx_core::wire::ResponseTone;

/// Pre-programmed outcome for one scripted call.
#[derive(Clone, Debug)]
pub enum Scripted<T> {
    Ok(T),
    Err(InferenceError),
    /// Wait, then produce the inner outcome.
    Delay(Duration, Box<Scripted<T>>),
}

impl<T: Clone> Scripted<T> {
    pub fn delayed(delay: Duration, inner: Scripted<T>) -> Self {
        Self::Delay(delay, Box::new(inner))
    }

    async fn resolve(&self) -> Result<T, InferenceError> {
        let mut current = self;
        loop {
            match current {
                Self::Ok(value) => return Ok(value.clone()),
                Self::Err(e) => return Err(e.clone()),
                Self::Delay(delay, inner) => {
                    tokio::time::sleep(*delay).await;
                    current = inner.as_ref();
                }
            }
        }
    }
}

/// Hands out scripted outcomes in order. Once the script runs out it either
/// repeats the final entry (`repeat_last`) or fails with `InvalidRequest`.
struct Script<T> {
    steps: Vec<Scripted<T>>,
    repeat_last: bool,
    calls: AtomicUsize,
}

impl<T: Clone> Script<T> {
    fn new(steps: Vec<Scripted<T>>, repeat_last: bool) -> Self {
        Self {
            steps,
            repeat_last,
            calls: AtomicUsize::new(0),
        }
    }

    async fn next(&self, who: &str) -> Result<T, InferenceError> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        let step = match self.steps.get(idx) {
            Some(step) => step,
            None if self.repeat_last && !self.steps.is_empty() => &self.steps[self.steps.len() - 1],
            None => {
                return Err(InferenceError::InvalidRequest(format!(
                    "{who}: no response configured for call {idx}"
                )))
            }
        };
        step.resolve().await
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Signal extractor returning pre-programmed outcomes in sequence.
pub struct ScriptedExtractor {
    script: Script<AnalysisSignal>,
}

impl ScriptedExtractor {
    pub fn new(steps: Vec<Scripted<AnalysisSignal>>) -> Self {
        Self {
            script: Script::new(steps, false),
        }
    }

    /// Always answers with the same signal.
    pub fn always(signal: AnalysisSignal) -> Self {
        Self {
            script: Script::new(vec![Scripted::Ok(signal)], true),
        }
    }

    /// Always fails with the same error.
    pub fn failing(error: InferenceError) -> Self {
        Self {
            script: Script::new(vec![Scripted::Err(error)], true),
        }
    }

    pub fn call_count(&self) -> usize {
        self.script.calls()
    }
}

#[async_trait]
impl SignalExtractor for ScriptedExtractor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn infer(&self, _text: &str) -> Result<AnalysisSignal, InferenceError> {
        self.script.next("ScriptedExtractor").await
    }
}

/// Signal extractor backed by a closure over the input text.
pub struct FnExtractor<F> {
    f: F,
    calls: AtomicUsize,
}

impl<F> FnExtractor<F>
where
    F: Fn(&str) -> Result<AnalysisSignal, InferenceError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> SignalExtractor for FnExtractor<F>
where
    F: Fn(&str) -> Result<AnalysisSignal, InferenceError> + Send + Sync,
{
    fn name(&self) -> &str {
        "fn"
    }

    async fn infer(&self, text: &str) -> Result<AnalysisSignal, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.f)(text)
    }
}

/// Text generator returning scripted completions and recording prompts.
pub struct MockGenerator {
    script: Script<String>,
    prompts: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn new(steps: Vec<Scripted<String>>) -> Self {
        Self {
            script: Script::new(steps, false),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(text: impl Into<String>) -> Self {
        Self {
            script: Script::new(vec![Scripted::Ok(text.into())], true),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.script.calls()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn generate(&self, prompt: &str) -> Result<String, InferenceError> {
        self.prompts.lock().push(prompt.to_string());
        self.script.next("MockGenerator").await
    }
}

/// Scorer that returns the same aggregate for everything.
#[derive(Clone, Debug)]
pub struct FixedScorer {
    pub aggregate: f64,
}

impl FixedScorer {
    pub fn new(aggregate: f64) -> Self {
        Self { aggregate }
    }
}

#[async_trait]
impl QualityScorer for FixedScorer {
    async fn score(&self, _content: &str, _context: &ContextData, _tone: ResponseTone) -> QualityScore {
        let mut components = BTreeMap::new();
        components.insert("fixed".to_string(), self.aggregate);
        QualityScore::from_components(components)
    }
}
