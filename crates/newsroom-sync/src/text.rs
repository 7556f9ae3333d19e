use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

static NEWLINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n+").expect("valid newline regex"));
static SPACES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("valid whitespace regex"));
static READ_MORE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(read more.*?)(\.|\n|$)").expect("valid read-more regex"));

const PROVIDER_TIMESTAMP: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Flatten line breaks and drop "Read more ..." trailers before summarizing.
pub fn clean_for_summarization(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }
    let text = NEWLINES_RE.replace_all(text, " ");
    let text = SPACES_RE.replace_all(&text, " ");
    READ_MORE_RE.replace_all(&text, "").trim().to_string()
}

/// Provider timestamp, then RFC 3339, else the current time.
pub fn parse_published_at(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Utc::now();
    };
    NaiveDateTime::parse_from_str(raw, PROVIDER_TIMESTAMP)
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    #[test]
    fn cleaning_flattens_and_strips_read_more_trailers() {
        let raw = "  Markets rallied.\n\nInvestors   cheered the data. Read more about markets\n";
        assert_eq!(
            clean_for_summarization(raw),
            "Markets rallied. Investors cheered the data."
        );
        assert_eq!(clean_for_summarization("Story text READ MORE"), "Story text");
        assert_eq!(clean_for_summarization("   "), "");
    }

    #[test]
    fn timestamps_accept_provider_and_rfc3339_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_published_at(Some("2024-05-01T10:00:00Z")), expected);
        assert_eq!(parse_published_at(Some("2024-05-01T12:00:00+02:00")), expected);
    }

    #[test]
    fn malformed_timestamps_fall_back_to_now() {
        let before = Utc::now() - Duration::seconds(1);
        for raw in [Some("not-a-date"), Some(""), None] {
            assert!(parse_published_at(raw) >= before);
        }
    }
}
