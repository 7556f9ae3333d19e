//! Core domain model for the newsroom pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "newsroom-core";

/// Headline as handed over by the upstream provider. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawItem {
    pub title: Option<String>,
    pub source_name: Option<String>,
    pub url: Option<String>,
    /// Provider-formatted timestamp; parsing may fail downstream.
    pub published_at: Option<String>,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
}

impl RawItem {
    /// Provider-supplied text used when full-text extraction comes back empty.
    pub fn fallback_text(&self) -> &str {
        self.description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or("No summary")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Critical,
    Important,
    Routine,
}

impl ImpactLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Important => "important",
            Self::Routine => "routine",
        }
    }

    /// Maps canonical labels and the high/medium/low synonyms. Anything else is `None`.
    pub fn from_label(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" | "high" => Some(Self::Critical),
            "important" | "medium" => Some(Self::Important),
            "routine" | "low" => Some(Self::Routine),
            _ => None,
        }
    }

    /// Sort key, most urgent first.
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::Important => 1,
            Self::Routine => 2,
        }
    }
}

impl Default for ImpactLevel {
    fn default() -> Self {
        Self::Important
    }
}

impl fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed topic taxonomy. `General` is the catch-all; `Global` is for
/// cross-border items that are not primarily politics or war.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Politics,
    Geopolitics,
    War,
    Economy,
    Finance,
    Stocks,
    Business,
    Technology,
    Science,
    Health,
    Energy,
    Environment,
    Crypto,
    Sports,
    Entertainment,
    Travel,
    Education,
    Crime,
    Global,
    General,
}

impl Category {
    pub const ALL: [Category; 20] = [
        Category::Politics,
        Category::Geopolitics,
        Category::War,
        Category::Economy,
        Category::Finance,
        Category::Stocks,
        Category::Business,
        Category::Technology,
        Category::Science,
        Category::Health,
        Category::Energy,
        Category::Environment,
        Category::Crypto,
        Category::Sports,
        Category::Entertainment,
        Category::Travel,
        Category::Education,
        Category::Crime,
        Category::Global,
        Category::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Politics => "politics",
            Self::Geopolitics => "geopolitics",
            Self::War => "war",
            Self::Economy => "economy",
            Self::Finance => "finance",
            Self::Stocks => "stocks",
            Self::Business => "business",
            Self::Technology => "technology",
            Self::Science => "science",
            Self::Health => "health",
            Self::Energy => "energy",
            Self::Environment => "environment",
            Self::Crypto => "crypto",
            Self::Sports => "sports",
            Self::Entertainment => "entertainment",
            Self::Travel => "travel",
            Self::Education => "education",
            Self::Crime => "crime",
            Self::Global => "global",
            Self::General => "general",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        let needle = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == needle)
    }

    pub fn labels() -> Vec<&'static str> {
        Self::ALL.iter().map(|c| c.as_str()).collect()
    }
}

impl Default for Category {
    fn default() -> Self {
        Self::General
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dual sentiment/impact classification attached to every stored article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentVerdict {
    /// Single word, e.g. "somber".
    pub tone: String,
    /// "<sentiment> for <subject>".
    pub impact: String,
    /// Stringified float in 0.0..=1.0.
    pub confidence: String,
    pub impact_level: ImpactLevel,
    pub reason: String,
}

impl SentimentVerdict {
    pub fn neutral(reason: impl Into<String>) -> Self {
        Self {
            tone: "neutral".to_string(),
            impact: "neutral for general market".to_string(),
            confidence: "0.00".to_string(),
            impact_level: ImpactLevel::Important,
            reason: reason.into(),
        }
    }
}

/// Persisted unit. `url` is globally unique across stored articles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedArticle {
    pub title: String,
    pub summary: String,
    pub sentiment_tone: String,
    pub sentiment_impact: String,
    pub sentiment_confidence: String,
    pub impact_level: ImpactLevel,
    pub impact_reason: String,
    pub image_url: Option<String>,
    pub source: String,
    pub url: Option<String>,
    pub category: Category,
    /// Uppercase two-letter code.
    pub country: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchState {
    Idle,
    Starting,
    Fetching,
    Processing,
    Done,
    Error,
    Canceled,
}

impl FetchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Canceled)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Fetching | Self::Processing)
    }

    /// Whether a live run may move from `self` to `next`.
    pub fn can_advance_to(self, next: FetchState) -> bool {
        use FetchState::*;
        match (self, next) {
            (_, Starting) => true,
            (Starting, Fetching) => true,
            (Fetching, Processing) => true,
            (Starting | Fetching | Processing, Done | Error | Canceled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Fetching => "fetching",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
            Self::Canceled => "canceled",
        };
        f.write_str(label)
    }
}

/// Snapshot of the live fetch run as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchStatus {
    pub run_id: Option<Uuid>,
    pub state: FetchState,
    pub message: String,
    pub total: usize,
    pub processed: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for FetchStatus {
    fn default() -> Self {
        Self {
            run_id: None,
            state: FetchState::Idle,
            message: "Idle".to_string(),
            total: 0,
            processed: 0,
            started_at: None,
            finished_at: None,
        }
    }
}
