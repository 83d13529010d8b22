//! # mailctx-engine
//!
//! Context pipeline and response generation.
//!
//! - **Builder / validator / merger**: signal → context, structural checks,
//!   deterministic merge of two contexts for one thread
//! - **Gate**: confidence-gated retry with backoff and an overall deadline
//! - **Cache**: bounded, TTL'd memo in front of signal extraction
//! - **Templates**: versioned templates with per-version usage analytics
//! - **Analyzer / generator**: the services the binary exposes
//!
//! ## Crate Position
//!
//! Depends on: mailctx-core, mailctx-settings, mailctx-store.
//! Depended on by: the `mailctx` binary.

#![deny(unsafe_code)]

pub mod analyzer;
pub mod builder;
pub mod cache;
pub mod error;
pub mod gate;
pub mod generator;
pub mod merger;
pub mod response_validator;
pub mod retry;
pub mod templates;
pub mod validator;

pub use analyzer::{BatchItem, BatchOutcome, ContextAnalyzer};
pub use builder::ContextBuilder;
pub use cache::{BoundedCache, CachedExtractor, Clock, ManualClock, SystemClock};
pub use error::{EngineError, MergeSide};
pub use gate::{ConfidenceGate, ConfidencePolicy};
pub use generator::ResponseGenerator;
pub use response_validator::{ResponseRules, ResponseValidator, ResponseVerdict};
pub use retry::{Backoff, RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};
pub use templates::{TemplateRules, TemplateStore};
