use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use newsroom_core::EnrichedArticle;
use serde_json::json;
use tracing::{debug, warn};

use crate::cache::{fingerprint, ResponseCache};
use crate::parse::summary_json_only;
use crate::provider::{CompletionProvider, CompletionRequest};
use crate::retry::{call_with_retry, RetryPolicy};

pub const DEFAULT_BRIEFING_MODEL: &str = "llama-3.1-8b-instant";
pub const BRIEFING_ITEMS: usize = 6;

/// Most urgent first; ties keep their incoming (newest-first) order.
pub fn select_priority(articles: &[EnrichedArticle], limit: usize) -> Vec<&EnrichedArticle> {
    let mut ranked: Vec<&EnrichedArticle> = articles.iter().collect();
    ranked.sort_by_key(|a| a.impact_level.rank());
    ranked.truncate(limit);
    ranked
}

/// Narrative summary over the current top-priority items.
pub struct BriefingWriter {
    provider: Option<Arc<dyn CompletionProvider>>,
    cache: ResponseCache<String>,
    model: String,
    retry: RetryPolicy,
}

impl BriefingWriter {
    pub fn new(provider: Option<Arc<dyn CompletionProvider>>) -> Self {
        Self {
            provider,
            cache: ResponseCache::new(64),
            model: DEFAULT_BRIEFING_MODEL.to_string(),
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

    pub async fn brief(
        &self,
        articles: &[EnrichedArticle],
        last_fetch: Option<DateTime<Utc>>,
    ) -> Option<String> {
        let provider = self.provider.as_deref()?;
        let top = select_priority(articles, BRIEFING_ITEMS);
        if top.is_empty() {
            return None;
        }

        let key = cache_key(&top, last_fetch);
        if let Some(hit) = self.cache.get(&key) {
            debug!("briefing cache hit");
            return Some(hit);
        }

        let items: Vec<_> = top
            .iter()
            .map(|a| {
                json!({
                    "title": a.title,
                    "priority": a.impact_level.as_str(),
                    "category": a.category.as_str(),
                    "source": a.source,
                })
            })
            .collect();
        let prompt = json!({
            "task": "Write a brief narrative summary of today's top priority news.",
            "rules": [
                "2-3 sentences.",
                "Focus on dominant themes and why they matter.",
                "No bullet points.",
                "Return JSON only: {\"summary\": \"...\"}."
            ],
            "items": items,
        });
        let request = CompletionRequest {
            model: self.model.clone(),
            system: None,
            prompt: prompt.to_string(),
            temperature: 0.3,
            max_tokens: 140,
        };
        let request = &request;

        let raw = match call_with_retry("briefing", &self.retry, || provider.complete(request)).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "briefing request failed");
                return None;
            }
        };
        let summary = summary_json_only(&raw)?;
        self.cache.insert(key, summary.clone());
        Some(summary)
    }
}

fn cache_key(items: &[&EnrichedArticle], last_fetch: Option<DateTime<Utc>>) -> String {
    let mut lines = vec![last_fetch
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()];
    lines.extend(items.iter().map(|a| {
        format!(
            "{}|{}|{}|{}",
            a.title,
            a.impact_level.as_str(),
            a.category.as_str(),
            a.source
        )
    }));
    fingerprint(&lines.join("\n"))
}
