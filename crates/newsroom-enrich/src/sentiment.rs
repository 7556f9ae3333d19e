use std::sync::Arc;
use std::time::Duration;

use newsroom_core::SentimentVerdict;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::cache::{fingerprint, ResponseCache};
use crate::digest::DigestSelector;
use crate::parse::{first_success, normalize_impact_level, SentimentFields, SENTIMENT_TIERS};
use crate::provider::{CompletionProvider, CompletionRequest};
use crate::retry::{call_with_retry, RetryPolicy};
use crate::truncate_chars;

pub const DEFAULT_SENTIMENT_MODEL: &str = "llama-3.1-8b-instant";

pub const REASON_TOO_SHORT: &str = "default: too little text";
pub const REASON_DISABLED: &str = "default: LLM disabled";
pub const REASON_EMPTY: &str = "default: empty response";
pub const REASON_UNPARSEABLE: &str = "default: unparseable response";
pub const REASON_FAILED: &str = "default: exception";

const MIN_INPUT_CHARS: usize = 40;
const MAX_PROMPT_TEXT_CHARS: usize = 1200;
const SYSTEM_PROMPT: &str = "You are a JSON API. Output JSON only.";
const STRICT_RULE: &str = "Return JSON only. No code blocks, markdown, or explanations.";

const RULES: &[&str] = &[
    "tone: 1 word describing the tone",
    "impact: <sentiment> for <subject>",
    "impact sentiment: positive|negative|neutral|mixed|uncertain",
    "impact_level: critical|important|routine",
    "be conservative: if unsure, choose important (not critical)",
    "critical = immediate, time-sensitive, large-scale impact happening now (active threat, mass casualty, major disaster, emergency orders, system-wide outage)",
    "important = notable developments affecting a country, institution, or large community",
    "routine = informational or follow-up updates that do not require immediate attention",
    "crime/legal stories are usually important unless there is an active ongoing threat to public safety",
    "reason: 1 short sentence (max ~12 words) explaining why impact_level was chosen",
];

/// Dual tone/impact classification. Never fails; every failure path yields a
/// neutral verdict whose reason names the cause.
pub struct SentimentClassifier {
    provider: Option<Arc<dyn CompletionProvider>>,
    cache: Arc<ResponseCache<SentimentVerdict>>,
    model: String,
    retry: RetryPolicy,
}

impl SentimentClassifier {
    pub fn new(
        provider: Option<Arc<dyn CompletionProvider>>,
        cache: Arc<ResponseCache<SentimentVerdict>>,
    ) -> Self {
        Self {
            provider,
            cache,
            model: DEFAULT_SENTIMENT_MODEL.to_string(),
            retry: RetryPolicy::with_buffer(Duration::from_secs(3)),
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

    pub async fn classify(&self, title: &str, summary: &str) -> SentimentVerdict {
        let combined = format!("{}\n{}", title.trim(), summary.trim())
            .trim()
            .to_string();
        let key = fingerprint(&combined);
        if let Some(hit) = self.cache.get(&key) {
            debug!("sentiment cache hit");
            return hit;
        }

        if combined.chars().count() < MIN_INPUT_CHARS {
            debug!("sentiment skipped: text too short");
            return SentimentVerdict::neutral(REASON_TOO_SHORT);
        }
        let Some(provider) = self.provider.as_deref() else {
            debug!("remote sentiment disabled: no credential");
            return SentimentVerdict::neutral(REASON_DISABLED);
        };

        let text = DigestSelector::CLASSIFIER.shrink_for_prompt(&combined);
        let text = truncate_chars(&text, MAX_PROMPT_TEXT_CHARS);

        let first = self.request(build_prompt(&text, false), 0.2, 220);
        let first = &first;
        let raw = match call_with_retry("sentiment", &self.retry, || provider.complete(first)).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "remote sentiment failed; using defaults");
                return SentimentVerdict::neutral(REASON_FAILED);
            }
        };
        let raw = raw.trim();
        if raw.is_empty() {
            debug!("remote sentiment empty; using defaults");
            return SentimentVerdict::neutral(REASON_EMPTY);
        }
        if let Some(verdict) = parse_verdict(raw) {
            self.cache.insert(key, verdict.clone());
            return verdict;
        }

        debug!(raw = %truncate_chars(raw, 400), "sentiment unparseable; retrying with strict prompt");
        let strict = self.request(build_prompt(&text, true), 0.0, 120);
        let strict = &strict;
        match call_with_retry("sentiment", &self.retry, || provider.complete(strict)).await {
            Ok(raw) => {
                if let Some(verdict) = parse_verdict(raw.trim()) {
                    self.cache.insert(key, verdict.clone());
                    return verdict;
                }
            }
            Err(err) => warn!(error = %err, "strict sentiment retry failed"),
        }

        debug!("sentiment unparseable after strict retry; using defaults");
        SentimentVerdict::neutral(REASON_UNPARSEABLE)
    }

    fn request(&self, prompt: String, temperature: f32, max_tokens: u32) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            system: Some(SYSTEM_PROMPT.to_string()),
            prompt,
            temperature,
            max_tokens,
        }
    }
}

fn build_prompt(text: &str, strict: bool) -> String {
    let mut rules: Vec<&str> = Vec::with_capacity(RULES.len() + 1);
    if strict {
        rules.push(STRICT_RULE);
    }
    rules.extend_from_slice(RULES);
    let prompt: Value = json!({
        "task": "Return JSON for tone, impact, confidence, impact_level, reason.",
        "rules": rules,
        "format": {
            "tone": "<tone>",
            "impact": "<sentiment> for <subject>",
            "confidence": "<float 0.0-1.0>",
            "impact_level": "<critical|important|routine>",
            "reason": "<short explanation>"
        },
        "text": text,
    });
    prompt.to_string()
}

fn parse_verdict(raw: &str) -> Option<SentimentVerdict> {
    let fields: SentimentFields = first_success(raw, SENTIMENT_TIERS)?;
    let defaults = SentimentVerdict::neutral("");
    Some(SentimentVerdict {
        tone: fields.tone.unwrap_or(defaults.tone),
        impact: fields.impact.unwrap_or(defaults.impact),
        confidence: fields.confidence.unwrap_or(defaults.confidence),
        impact_level: normalize_impact_level(fields.impact_level.as_deref()),
        reason: fields.reason.unwrap_or_default(),
    })
}
