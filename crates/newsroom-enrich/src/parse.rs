//! Tiered parsing of free-form model output.
//!
//! Each stage declares an ordered list of tiers; the first tier that yields a
//! value wins. Tiers are plain functions so each can be tested on its own.

use std::sync::LazyLock;

use newsroom_core::{Category, ImpactLevel};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

pub type ParseTier<T> = fn(&str) -> Option<T>;

pub fn first_success<T>(raw: &str, tiers: &[ParseTier<T>]) -> Option<T> {
    tiers.iter().find_map(|tier| tier(raw))
}

/// Trim whitespace and stray backticks left by markdown fences.
pub fn strip_fences(raw: &str) -> &str {
    raw.trim().trim_matches('`').trim()
}

/// The whole input if it is a `{...}` block, else the outermost embedded one.
pub fn json_object_slice(raw: &str) -> Option<&str> {
    let cleaned = raw.trim();
    if cleaned.starts_with('{') && cleaned.ends_with('}') {
        return Some(cleaned);
    }
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    (end > start).then(|| &cleaned[start..=end])
}

pub fn json_object(raw: &str) -> Option<Map<String, Value>> {
    let slice = json_object_slice(raw)?;
    match serde_json::from_str::<Value>(slice).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Non-empty string form of a JSON value. Null and blank strings are `None`.
fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn after_colon(line: &str) -> String {
    line.split_once(':')
        .map(|(_, rest)| rest.trim().to_string())
        .unwrap_or_default()
}

// ---- summaries ----

fn summary_from_json(raw: &str) -> Option<String> {
    json_object(strip_fences(raw))?
        .get("summary")
        .and_then(value_text)
}

fn summary_from_prefix(raw: &str) -> Option<String> {
    let cleaned = strip_fences(raw);
    let lower = cleaned.to_lowercase();
    if !lower.starts_with("summary:") {
        return None;
    }
    let rest = after_colon(cleaned);
    (!rest.is_empty()).then_some(rest)
}

fn summary_from_plain(raw: &str) -> Option<String> {
    let cleaned = strip_fences(raw);
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

pub const SUMMARY_TIERS: &[ParseTier<String>] =
    &[summary_from_json, summary_from_prefix, summary_from_plain];

/// JSON `{"summary": ...}` only; free text is rejected.
pub fn summary_json_only(raw: &str) -> Option<String> {
    json_object(raw.trim())?.get("summary").and_then(value_text)
}

/// Truncate to at most `max` sentences, splitting after `.`, `!` or `?`.
pub fn limit_sentences(text: &str, max: usize) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut count = 0;
    let mut end = normalized.len();
    let mut iter = normalized.char_indices().peekable();
    while let Some((idx, ch)) = iter.next() {
        if matches!(ch, '.' | '!' | '?') && matches!(iter.peek(), Some((_, ' '))) {
            count += 1;
            if count == max {
                end = idx + ch.len_utf8();
                break;
            }
        }
    }
    normalized[..end].trim().to_string()
}

// ---- sentiment ----

/// Sentiment fields as read from model output, before defaults are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentimentFields {
    pub tone: Option<String>,
    pub impact: Option<String>,
    pub confidence: Option<String>,
    pub impact_level: Option<String>,
    pub reason: Option<String>,
}

impl SentimentFields {
    fn is_empty(&self) -> bool {
        self.tone.is_none()
            && self.impact.is_none()
            && self.confidence.is_none()
            && self.impact_level.is_none()
            && self.reason.is_none()
    }
}

const SENTIMENT_KEYS: &[&str] = &[
    "tone",
    "impact",
    "confidence",
    "impact_level",
    "priority",
    "reason",
    "impact_reason",
    "rationale",
];

fn sentiment_from_json(raw: &str) -> Option<SentimentFields> {
    let map = json_object(raw)?;
    let lowered: Map<String, Value> = map
        .into_iter()
        .map(|(k, v)| (k.to_lowercase().replace(' ', "_"), v))
        .collect();
    if !SENTIMENT_KEYS.iter().any(|k| lowered.contains_key(*k)) {
        return None;
    }
    Some(SentimentFields {
        tone: pick(&lowered, &["tone"]),
        impact: pick(&lowered, &["impact"]),
        confidence: pick(&lowered, &["confidence"]),
        impact_level: pick(&lowered, &["impact_level", "priority"]),
        reason: pick(&lowered, &["reason", "impact_reason", "rationale"]),
    })
}

fn pick(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| map.get(*k).and_then(value_text))
}

fn sentiment_from_lines(raw: &str) -> Option<SentimentFields> {
    let mut fields = SentimentFields::default();
    let mut seen = false;
    for line in raw.lines() {
        let line = line.trim();
        let lower = line.to_lowercase();
        let slot = if lower.starts_with("tone:") {
            &mut fields.tone
        } else if lower.starts_with("impact:") {
            &mut fields.impact
        } else if lower.starts_with("confidence:") {
            &mut fields.confidence
        } else if lower.starts_with("impact_level:") || lower.starts_with("impact level:") {
            &mut fields.impact_level
        } else if lower.starts_with("reason:") || lower.starts_with("rationale:") {
            &mut fields.reason
        } else {
            continue;
        };
        seen = true;
        let value = after_colon(line);
        if !value.is_empty() {
            *slot = Some(value);
        }
    }
    (seen && !fields.is_empty()).then_some(fields)
}

pub const SENTIMENT_TIERS: &[ParseTier<SentimentFields>] =
    &[sentiment_from_json, sentiment_from_lines];

/// Unrecognized labels collapse to `Important`; the raw value is logged.
pub fn normalize_impact_level(raw: Option<&str>) -> ImpactLevel {
    let Some(raw) = raw else {
        return ImpactLevel::default();
    };
    match ImpactLevel::from_label(raw) {
        Some(level) => level,
        None => {
            warn!(raw_impact_level = raw, "unrecognized impact level; using important");
            ImpactLevel::default()
        }
    }
}

// ---- category ----

fn clean_label(candidate: &str) -> String {
    candidate
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`'))
        .to_lowercase()
}

fn category_from_json(raw: &str) -> Option<Category> {
    let map = json_object(strip_fences(raw))?;
    let label = map.get("category").and_then(value_text)?;
    Category::from_label(&label)
}

fn category_from_lines(raw: &str) -> Option<Category> {
    strip_fences(raw).lines().find_map(|line| {
        let line = line.trim();
        if !line.to_lowercase().starts_with("category") {
            return None;
        }
        let candidate = line
            .split_once(':')
            .or_else(|| line.split_once('-'))
            .map(|(_, rest)| clean_label(rest))?;
        Category::from_label(&candidate)
    })
}

static LABEL_MENTIONS: LazyLock<Vec<(Category, Regex)>> = LazyLock::new(|| {
    Category::ALL
        .into_iter()
        .map(|label| {
            let re = Regex::new(&format!(r"\b{}\b", regex::escape(label.as_str())))
                .expect("valid label regex");
            (label, re)
        })
        .collect()
});

fn category_from_mention(raw: &str) -> Option<Category> {
    let lowered = strip_fences(raw).to_lowercase();
    LABEL_MENTIONS
        .iter()
        .find(|(_, re)| re.is_match(&lowered))
        .map(|(label, _)| *label)
}

pub const CATEGORY_TIERS: &[ParseTier<Category>] =
    &[category_from_json, category_from_lines, category_from_mention];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_tiers_accept_bare_embedded_and_prefixed_forms() {
        assert_eq!(
            first_success(r#"{"summary": "Rates held."}"#, SUMMARY_TIERS).as_deref(),
            Some("Rates held.")
        );
        assert_eq!(
            first_success("```json\n{\"summary\": \"Rates held.\"}\n```", SUMMARY_TIERS).as_deref(),
            Some("Rates held.")
        );
        assert_eq!(
            first_success("Here you go: {\"summary\": \"Rates held.\"} hope it helps", SUMMARY_TIERS)
                .as_deref(),
            Some("Rates held.")
        );
        assert_eq!(
            first_success("Summary: Rates held.", SUMMARY_TIERS).as_deref(),
            Some("Rates held.")
        );
        assert_eq!(
            first_success("Rates held steady.", SUMMARY_TIERS).as_deref(),
            Some("Rates held steady.")
        );
        assert_eq!(first_success("  ``` ", SUMMARY_TIERS), None);
    }

    #[test]
    fn json_only_summary_rejects_prose() {
        assert_eq!(summary_json_only("Rates held."), None);
        assert_eq!(summary_json_only(r#"{"summary": "  "}"#), None);
        assert_eq!(
            summary_json_only(r#"{"summary": "A. B."}"#).as_deref(),
            Some("A. B.")
        );
    }

    #[test]
    fn sentence_limit_truncates_after_terminal_punctuation() {
        assert_eq!(limit_sentences("A one. B two! C three? D four. E five.", 4), "A one. B two! C three? D four.");
        assert_eq!(limit_sentences("Only  one.", 4), "Only one.");
        assert_eq!(limit_sentences("Ends without stop", 2), "Ends without stop");
    }

    #[test]
    fn sentiment_json_normalizes_keys_and_aliases() {
        let raw = r#"Sure! {"Tone": "grim", "Impact": "negative for airlines", "confidence": 0.8,
                     "Priority": "high", "rationale": "mass cancellations"}"#;
        let fields = first_success(raw, SENTIMENT_TIERS).unwrap();
        assert_eq!(fields.tone.as_deref(), Some("grim"));
        assert_eq!(fields.confidence.as_deref(), Some("0.8"));
        assert_eq!(fields.impact_level.as_deref(), Some("high"));
        assert_eq!(fields.reason.as_deref(), Some("mass cancellations"));
    }

    #[test]
    fn sentiment_lines_are_a_fallback() {
        let raw = "tone: upbeat\nImpact: positive for exporters\nImpact level: routine\nReason: trade data";
        let fields = first_success(raw, SENTIMENT_TIERS).unwrap();
        assert_eq!(fields.tone.as_deref(), Some("upbeat"));
        assert_eq!(fields.impact.as_deref(), Some("positive for exporters"));
        assert_eq!(fields.impact_level.as_deref(), Some("routine"));
        assert_eq!(fields.confidence, None);
    }

    #[test]
    fn sentiment_rejects_unrelated_output() {
        assert_eq!(first_success("I cannot help with that.", SENTIMENT_TIERS), None);
        assert_eq!(first_success(r#"{"answer": 42}"#, SENTIMENT_TIERS), None);
    }

    #[test]
    fn impact_levels_collapse_conservatively() {
        assert_eq!(normalize_impact_level(Some("LOW")), ImpactLevel::Routine);
        assert_eq!(normalize_impact_level(Some("catastrophic")), ImpactLevel::Important);
        assert_eq!(normalize_impact_level(None), ImpactLevel::Important);
    }

    #[test]
    fn category_tiers_cover_json_lines_and_mentions() {
        assert_eq!(
            first_success(r#"{"category": "Technology"}"#, CATEGORY_TIERS),
            Some(Category::Technology)
        );
        assert_eq!(
            first_success("Category - 'crypto'", CATEGORY_TIERS),
            Some(Category::Crypto)
        );
        assert_eq!(
            first_success("I would file this under sports coverage.", CATEGORY_TIERS),
            Some(Category::Sports)
        );
        assert_eq!(first_success("software warranty", CATEGORY_TIERS), None);
        assert_eq!(first_success(r#"{"category": "weather"}"#, CATEGORY_TIERS), None);
    }
}
