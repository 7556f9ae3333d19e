use std::sync::Arc;
use std::time::Duration;

use newsroom_core::Category;
use serde_json::json;
use tracing::{debug, warn};

use crate::digest::DigestSelector;
use crate::local::LocalClassifier;
use crate::parse::{first_success, CATEGORY_TIERS};
use crate::provider::{CompletionProvider, CompletionRequest};
use crate::retry::{call_with_retry, RetryPolicy};
use crate::truncate_chars;

pub const DEFAULT_CATEGORY_MODEL: &str = "llama-3.1-8b-instant";

const MAX_PROMPT_TEXT_CHARS: usize = 1200;

/// Maps an article onto the fixed taxonomy. Always yields a taxonomy label.
pub struct CategoryClassifier {
    provider: Option<Arc<dyn CompletionProvider>>,
    local: Arc<dyn LocalClassifier>,
    model: String,
    retry: RetryPolicy,
}

impl CategoryClassifier {
    pub fn new(provider: Option<Arc<dyn CompletionProvider>>, local: Arc<dyn LocalClassifier>) -> Self {
        Self {
            provider,
            local,
            model: DEFAULT_CATEGORY_MODEL.to_string(),
            retry: RetryPolicy::with_buffer(Duration::from_secs(2)),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn classify(&self, text: &str) -> Category {
        let text = text.trim();
        if text.is_empty() {
            return Category::General;
        }
        if let Some(label) = self.remote_label(text).await {
            return label;
        }
        self.local_label(text).await.unwrap_or(Category::General)
    }

    async fn remote_label(&self, text: &str) -> Option<Category> {
        let provider = self.provider.as_deref()?;

        let input = DigestSelector::CLASSIFIER.shrink_for_prompt(text);
        let prompt = json!({
            "task": "Choose the best category for the news item.",
            "rules": [
                "Pick exactly one label from the list.",
                "Use 'global' for cross-border, international items that are not primarily politics/war.",
                "Use 'general' when nothing else fits.",
                "Return JSON only: {\"category\": \"<label>\"}."
            ],
            "labels": Category::labels(),
            "text": truncate_chars(&input, MAX_PROMPT_TEXT_CHARS),
        });
        let request = CompletionRequest {
            model: self.model.clone(),
            system: None,
            prompt: prompt.to_string(),
            temperature: 0.0,
            max_tokens: 60,
        };
        let request = &request;

        let raw = match call_with_retry("category", &self.retry, || provider.complete(request)).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "remote category failed; using local classifier");
                return None;
            }
        };
        let label = first_success(raw.trim(), CATEGORY_TIERS);
        if label.is_none() {
            debug!(raw = %truncate_chars(raw.trim(), 200), "category unparseable; using local classifier");
        }
        label
    }

    async fn local_label(&self, text: &str) -> Option<Category> {
        let local = Arc::clone(&self.local);
        let owned = text.to_string();
        match tokio::task::spawn_blocking(move || local.rank(&owned, &Category::ALL)).await {
            Ok(Ok(ranked)) => ranked.first().map(|(label, _)| *label),
            Ok(Err(err)) => {
                warn!(error = %err, "local classifier failed; using general");
                None
            }
            Err(err) => {
                warn!(error = %err, "local classifier task panicked; using general");
                None
            }
        }
    }
}
