//! Article enrichment: summaries, dual sentiment/impact verdicts, categories.
//!
//! Every stage tries the remote completion provider first and degrades to a
//! deterministic local model (or a fixed default) without ever failing.

pub mod briefing;
pub mod cache;
pub mod category;
pub mod digest;
pub mod local;
pub mod parse;
pub mod provider;
pub mod retry;
pub mod sentiment;
pub mod summarize;

use std::sync::Arc;

use newsroom_core::SentimentVerdict;

pub use briefing::{select_priority, BriefingWriter};
pub use cache::{fingerprint, ResponseCache};
pub use category::CategoryClassifier;
pub use digest::DigestSelector;
pub use local::{
    ExtractiveSummarizer, KeywordZeroShotClassifier, LocalClassifier, LocalModelError,
    LocalSummarizer,
};
pub use provider::{CompletionProvider, CompletionRequest, GroqClient, ProviderError};
pub use retry::{call_with_retry, classify_rate_limit, RateLimitKind, RetryPolicy};
pub use sentiment::SentimentClassifier;
pub use summarize::Summarizer;

pub const CRATE_NAME: &str = "newsroom-enrich";

/// The three per-article stages, shared by every worker of a run.
#[derive(Clone)]
pub struct EnrichmentStages {
    pub summarizer: Arc<Summarizer>,
    pub sentiment: Arc<SentimentClassifier>,
    pub category: Arc<CategoryClassifier>,
}

impl EnrichmentStages {
    pub fn new(summarizer: Summarizer, sentiment: SentimentClassifier, category: CategoryClassifier) -> Self {
        Self {
            summarizer: Arc::new(summarizer),
            sentiment: Arc::new(sentiment),
            category: Arc::new(category),
        }
    }

    /// No remote provider: local summaries, local categories, default sentiment.
    pub fn local_only(cache: Arc<ResponseCache<SentimentVerdict>>) -> Self {
        Self::new(
            Summarizer::new(None, Arc::new(ExtractiveSummarizer::default())),
            SentimentClassifier::new(None, cache),
            CategoryClassifier::new(None, Arc::new(KeywordZeroShotClassifier::default())),
        )
    }
}

/// First `max` characters of `s`, on a char boundary.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
