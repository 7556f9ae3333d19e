use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use crate::digest::DigestSelector;
use crate::local::LocalSummarizer;
use crate::parse::{first_success, limit_sentences, SUMMARY_TIERS};
use crate::provider::{CompletionProvider, CompletionRequest};
use crate::retry::{call_with_retry, RetryPolicy};
use crate::truncate_chars;

pub const DEFAULT_SUMMARY_MODEL: &str = "groq/compound-mini";

const MIN_INPUT_CHARS: usize = 30;
const MAX_PROMPT_TEXT_CHARS: usize = 3000;
const MAX_SUMMARY_SENTENCES: usize = 4;

/// Remote summary first, local extractive summary second, original text last.
pub struct Summarizer {
    provider: Option<Arc<dyn CompletionProvider>>,
    local: Arc<dyn LocalSummarizer>,
    model: String,
    retry: RetryPolicy,
}

impl Summarizer {
    pub fn new(provider: Option<Arc<dyn CompletionProvider>>, local: Arc<dyn LocalSummarizer>) -> Self {
        Self {
            provider,
            local,
            model: DEFAULT_SUMMARY_MODEL.to_string(),
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

    pub async fn summarize(&self, text: &str) -> String {
        let trimmed = text.trim();
        if trimmed.chars().count() < MIN_INPUT_CHARS {
            debug!("summary skipped: text too short");
            return text.to_string();
        }

        if let Some(summary) = self.remote_summary(trimmed).await {
            return summary;
        }
        match self.local_summary(trimmed).await {
            Some(summary) => summary,
            None => text.to_string(),
        }
    }

    async fn remote_summary(&self, text: &str) -> Option<String> {
        let Some(provider) = self.provider.as_deref() else {
            debug!("remote summarizer disabled: no credential");
            return None;
        };

        let input = DigestSelector::SUMMARY.shrink_for_prompt(text);
        let prompt = json!({
            "task": "Summarize the news article in 2-3 sentences max.",
            "rules": [
                "Write a concise, factual summary.",
                "Capture the key points of the article.",
                "No bullet points.",
                "No opinions.",
                "Return JSON only: {\"summary\": \"...\"}."
            ],
            "text": truncate_chars(&input, MAX_PROMPT_TEXT_CHARS),
        });
        let request = CompletionRequest {
            model: self.model.clone(),
            system: None,
            prompt: prompt.to_string(),
            temperature: 0.2,
            max_tokens: 120,
        };
        let request = &request;

        let raw = match call_with_retry("summarizer", &self.retry, || provider.complete(request)).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "remote summary failed; using local summarizer");
                return None;
            }
        };
        if raw.trim().is_empty() {
            debug!("remote summary empty; using local summarizer");
            return None;
        }
        match first_success(&raw, SUMMARY_TIERS) {
            Some(summary) => Some(limit_sentences(&summary, MAX_SUMMARY_SENTENCES)),
            None => {
                debug!("remote summary unparseable; using local summarizer");
                None
            }
        }
    }

    async fn local_summary(&self, text: &str) -> Option<String> {
        let local = Arc::clone(&self.local);
        let owned = text.to_string();
        match tokio::task::spawn_blocking(move || local.summarize(&owned)).await {
            Ok(Ok(summary)) if !summary.trim().is_empty() => Some(summary.trim().to_string()),
            Ok(Ok(_)) => None,
            Ok(Err(err)) => {
                warn!(error = %err, "local summarizer failed; keeping original text");
                None
            }
            Err(err) => {
                warn!(error = %err, "local summarizer task panicked; keeping original text");
                None
            }
        }
    }
}
