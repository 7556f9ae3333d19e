//! Rate-limit-aware retries around remote completion calls.
//!
//! Short token-window limits are retried after the provider's hint (or a
//! parsed "try again in Ns", or a default) plus a per-stage buffer. Daily
//! quota exhaustion and every other failure are returned immediately.

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::provider::ProviderError;

static TRY_AGAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)try again in ([0-9.]+)s").expect("valid retry regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitKind {
    /// Tokens-per-minute style window; worth waiting out.
    TokenWindow,
    /// Requests-per-day style quota; nothing to gain from waiting.
    DailyQuota,
    /// Rate limited, but the window could not be identified.
    Unclassified,
}

/// `None` when the error is not a rate limit at all.
pub fn classify_rate_limit(err: &ProviderError) -> Option<RateLimitKind> {
    let message = err.to_string();
    let lower = message.to_lowercase();
    let limited = lower.contains("rate limit")
        || message.contains("429")
        || matches!(err, ProviderError::Status { status: 429, .. });
    if !limited {
        return None;
    }
    if lower.contains("requests per day") || lower.contains("rpd") {
        Some(RateLimitKind::DailyQuota)
    } else if lower.contains("tokens per minute") || lower.contains("tpm") {
        Some(RateLimitKind::TokenWindow)
    } else {
        Some(RateLimitKind::Unclassified)
    }
}

/// Delay parsed from a "try again in 1.25s" message fragment.
pub fn parse_try_again(message: &str) -> Option<Duration> {
    let caps = TRY_AGAIN_RE.captures(message)?;
    let secs: f64 = caps.get(1)?.as_str().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub default_delay: Duration,
    pub buffer: Duration,
    pub min_sleep: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            default_delay: Duration::from_secs(2),
            buffer: Duration::from_secs(2),
            min_sleep: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn with_buffer(buffer: Duration) -> Self {
        Self {
            buffer,
            ..Self::default()
        }
    }

    pub fn delay_for(&self, err: &ProviderError) -> Duration {
        let base = err
            .retry_after()
            .or_else(|| parse_try_again(&err.to_string()))
            .unwrap_or(self.default_delay);
        (base + self.buffer).max(self.min_sleep)
    }
}

/// Runs `operation`, sleeping through token-window rate limits.
pub async fn call_with_retry<T, F, Fut>(
    stage: &'static str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let total = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match classify_rate_limit(&err) {
            Some(RateLimitKind::TokenWindow) if attempt < total => {
                let delay = policy.delay_for(&err);
                info!(
                    stage,
                    attempt,
                    max_attempts = total,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited on token window; waiting before retry"
                );
                let started = Instant::now();
                tokio::time::sleep(delay).await;
                info!(
                    stage,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "retry wait complete"
                );
                attempt += 1;
            }
            Some(RateLimitKind::TokenWindow) => {
                warn!(stage, attempts = total, "token-window retries exhausted");
                return Err(err);
            }
            Some(RateLimitKind::DailyQuota) => {
                warn!(stage, "daily quota exhausted; not retrying");
                return Err(err);
            }
            Some(RateLimitKind::Unclassified) | None => return Err(err),
        }
    }
}
