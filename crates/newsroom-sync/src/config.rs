use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const SETTINGS_FILE: &str = "newsroom.yaml";

/// Pipeline tunables, read from `newsroom.yaml`. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub countries: Vec<String>,
    pub page_size: u32,
    pub pages_per_country: u32,
    pub workers: usize,
    pub blocked_domains: Vec<String>,
    pub models: ModelSettings,
    pub min_interval_secs: u64,
    pub cron: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            countries: vec!["us".into(), "sg".into(), "gb".into()],
            page_size: 100,
            pages_per_country: 1,
            workers: 6,
            blocked_domains: vec!["ft.com".into()],
            models: ModelSettings::default(),
            min_interval_secs: 2 * 60 * 60,
            cron: "0 0 */2 * * *".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub summarizer: String,
    pub sentiment: String,
    pub category: String,
    pub briefing: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            summarizer: newsroom_enrich::summarize::DEFAULT_SUMMARY_MODEL.into(),
            sentiment: newsroom_enrich::sentiment::DEFAULT_SENTIMENT_MODEL.into(),
            category: newsroom_enrich::category::DEFAULT_CATEGORY_MODEL.into(),
            briefing: newsroom_enrich::briefing::DEFAULT_BRIEFING_MODEL.into(),
        }
    }
}

impl PipelineSettings {
    /// Missing file means defaults; an unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub last_fetch_path: PathBuf,
    pub web_port: u16,
    pub scheduler_enabled: bool,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub newsapi_key: Option<String>,
    pub newsapi_url: String,
    pub groq_base_url: String,
    pub summarizer_key: Option<String>,
    pub sentiment_key: Option<String>,
    pub category_key: Option<String>,
    pub workspace_root: PathBuf,
    pub pipeline: PipelineSettings,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let workspace_root = var("NEWSROOM_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let pipeline = PipelineSettings::load(&workspace_root.join(SETTINGS_FILE))?;

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite://newsroom.db".to_string()),
            last_fetch_path: var("NEWSROOM_LAST_FETCH_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| workspace_root.join("last_fetch_time.txt")),
            web_port: var("NEWSROOM_WEB_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
            scheduler_enabled: var("NEWSROOM_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(true),
            user_agent: var("NEWSROOM_USER_AGENT").unwrap_or_else(|| {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".to_string()
            }),
            http_timeout_secs: var("NEWSROOM_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),
            newsapi_key: var("NEWSAPI_KEY"),
            newsapi_url: var("NEWSAPI_URL")
                .unwrap_or_else(|| newsroom_sources::DEFAULT_NEWSAPI_URL.to_string()),
            groq_base_url: var("GROQ_BASE_URL")
                .unwrap_or_else(|| newsroom_enrich::provider::DEFAULT_GROQ_BASE_URL.to_string()),
            summarizer_key: var("GROQ_SUMMARIZER_API_KEY"),
            sentiment_key: var("GROQ_SENTIMENT_API_KEY").or_else(|| var("GROQ_API_KEY")),
            category_key: var("GROQ_CATEGORY_API_KEY"),
            workspace_root,
            pipeline,
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_env_or_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().display().to_string();
        let config = SyncConfig::from_lookup(lookup(&[("NEWSROOM_ROOT", root.as_str())])).unwrap();

        assert_eq!(config.database_url, "sqlite://newsroom.db");
        assert_eq!(config.newsapi_key, None);
        assert_eq!(config.pipeline, PipelineSettings::default());
        assert_eq!(config.pipeline.countries, vec!["us", "sg", "gb"]);
        assert_eq!(config.pipeline.min_interval(), Duration::from_secs(7200));
        assert_eq!(config.last_fetch_path, dir.path().join("last_fetch_time.txt"));
    }

    #[test]
    fn sentiment_key_falls_back_to_shared_key_and_blanks_are_unset() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().display().to_string();
        let config = SyncConfig::from_lookup(lookup(&[
            ("NEWSROOM_ROOT", root.as_str()),
            ("GROQ_API_KEY", "shared"),
            ("NEWSAPI_KEY", "   "),
        ]))
        .unwrap();

        assert_eq!(config.sentiment_key.as_deref(), Some("shared"));
        assert_eq!(config.summarizer_key, None);
        assert_eq!(config.category_key, None);
        assert_eq!(config.newsapi_key, None);
    }

    #[test]
    fn partial_yaml_overrides_only_named_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            "countries: [au]\nworkers: 2\nmodels:\n  summarizer: local-test\n",
        )
        .unwrap();

        let settings = PipelineSettings::load(&dir.path().join(SETTINGS_FILE)).unwrap();
        assert_eq!(settings.countries, vec!["au"]);
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.page_size, 100);
        assert_eq!(settings.models.summarizer, "local-test");
        assert_eq!(settings.models.sentiment, "llama-3.1-8b-instant");
    }

    #[test]
    fn malformed_yaml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "workers: [not, a, number]\n").unwrap();
        let err = PipelineSettings::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parsing"));
    }
}
