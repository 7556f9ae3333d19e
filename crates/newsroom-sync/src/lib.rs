//! Fetch orchestration: the pipeline state machine, its observers, the
//! trigger service and the periodic scheduler.

mod config;
mod pipeline;
mod scheduler;
mod service;
mod status;
mod text;

use std::sync::Arc;

use anyhow::{Context, Result};
use newsroom_enrich::{
    BriefingWriter, CategoryClassifier, CompletionProvider, EnrichmentStages, ExtractiveSummarizer,
    GroqClient, KeywordZeroShotClassifier, ResponseCache, SentimentClassifier, Summarizer,
};
use newsroom_sources::{HtmlTextExtractor, NewsApiSource};
use newsroom_storage::{
    ArticleStore, BackoffPolicy, HttpClientConfig, HttpFetcher, LastRunStore, SqliteArticleStore,
};
use tracing::info;

pub use config::{ModelSettings, PipelineSettings, SyncConfig, SETTINGS_FILE};
pub use pipeline::{
    FetchOutcome, FetchPipeline, RunSettings, RunTicket, MSG_CANCELED, MSG_MISSING_KEY, MSG_STARTING,
};
pub use scheduler::start_scheduler;
pub use service::{FetchService, TriggerOutcome};
pub use status::{CancelSignal, StatusRegister, StatusUpdate};
pub use text::{clean_for_summarization, parse_published_at};

pub const CRATE_NAME: &str = "newsroom-sync";

/// Everything a process needs to fetch, serve and brief, wired from config.
pub struct Newsroom {
    pub config: SyncConfig,
    pub store: Arc<SqliteArticleStore>,
    pub service: Arc<FetchService>,
    pub briefing: Arc<BriefingWriter>,
}

impl Newsroom {
    pub async fn from_config(config: SyncConfig) -> Result<Self> {
        let http = Arc::new(HttpFetcher::new(http_config(&config, BackoffPolicy::default()))?);
        let store = Arc::new(
            SqliteArticleStore::open(&config.database_url)
                .await
                .with_context(|| format!("opening article store at {}", config.database_url))?,
        );

        let settings = &config.pipeline;
        let summarizer_provider = remote_provider(config.summarizer_key.as_deref(), &config)?;
        let sentiment_provider = remote_provider(config.sentiment_key.as_deref(), &config)?;
        let category_provider = remote_provider(config.category_key.as_deref(), &config)?;
        info!(
            summarizer = summarizer_provider.is_some(),
            sentiment = sentiment_provider.is_some(),
            category = category_provider.is_some(),
            "remote enrichment providers configured"
        );

        let stages = EnrichmentStages::new(
            Summarizer::new(summarizer_provider, Arc::new(ExtractiveSummarizer::default()))
                .with_model(settings.models.summarizer.clone()),
            SentimentClassifier::new(sentiment_provider.clone(), Arc::new(ResponseCache::default()))
                .with_model(settings.models.sentiment.clone()),
            CategoryClassifier::new(category_provider, Arc::new(KeywordZeroShotClassifier::default()))
                .with_model(settings.models.category.clone()),
        );
        let briefing = Arc::new(
            BriefingWriter::new(sentiment_provider).with_model(settings.models.briefing.clone()),
        );

        let pipeline = FetchPipeline::new(
            Arc::new(headline_source(&config)?),
            Arc::new(HtmlTextExtractor::new(
                Arc::clone(&http),
                settings.blocked_domains.clone(),
            )),
            Arc::clone(&store) as Arc<dyn ArticleStore>,
            stages,
            RunSettings {
                countries: settings.countries.clone(),
                page_size: settings.page_size,
                pages_per_country: settings.pages_per_country,
                workers: settings.workers,
            },
        );
        let service = Arc::new(
            FetchService::load(
                pipeline,
                LastRunStore::new(config.last_fetch_path.clone()),
                settings.min_interval(),
            )
            .await,
        );

        Ok(Self {
            config,
            store,
            service,
            briefing,
        })
    }
}

fn http_config(config: &SyncConfig, backoff: BackoffPolicy) -> HttpClientConfig {
    HttpClientConfig {
        timeout: config.http_timeout(),
        user_agent: Some(config.user_agent.clone()),
        accept_language: Some("en-US,en;q=0.9".to_string()),
        backoff,
        ..Default::default()
    }
}

/// Headline source with its own single-attempt client: a failed page is
/// logged and skipped by the pipeline, never retried.
pub fn headline_source(config: &SyncConfig) -> Result<NewsApiSource> {
    let http = HttpFetcher::new(http_config(config, BackoffPolicy::none()))
        .context("building headline client")?;
    Ok(NewsApiSource::new(
        Arc::new(http),
        config.newsapi_url.clone(),
        config.newsapi_key.clone(),
    ))
}

fn remote_provider(key: Option<&str>, config: &SyncConfig) -> Result<Option<Arc<dyn CompletionProvider>>> {
    let Some(key) = key else {
        return Ok(None);
    };
    let client = GroqClient::new(key, config.groq_base_url.clone(), config.http_timeout())
        .context("building completion client")?;
    Ok(Some(Arc::new(client)))
}

/// One foreground run using environment configuration.
pub async fn run_fetch_once_from_env() -> Result<FetchOutcome> {
    let newsroom = Newsroom::from_config(SyncConfig::from_env()?).await?;
    newsroom.service.run_now().await
}
