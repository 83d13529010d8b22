//! Concrete collaborators behind the `mailctx-core` provider traits.
//!
//! - [`KeywordExtractor`]: deterministic in-process signal extraction
//! - [`HttpExtractor`] / [`HttpGenerator`]: remote inference services over JSON
//! - [`HeuristicScorer`]: lexical reply-quality scoring
//! - [`mock`]: scripted collaborators for tests

pub mod http;
pub mod lexical;
pub mod scorer;

pub mod mock;

pub use http::{HttpExtractor, HttpGenerator};
pub use lexical::KeywordExtractor;
pub use scorer::HeuristicScorer;
