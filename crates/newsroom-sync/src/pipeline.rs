use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use newsroom_core::{EnrichedArticle, FetchState, RawItem};
use newsroom_enrich::EnrichmentStages;
use newsroom_sources::{HeadlineSource, TextExtractor};
use newsroom_storage::{ArticleBatch, ArticleStore};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::status::{CancelSignal, StatusRegister, StatusUpdate};
use crate::text::{clean_for_summarization, parse_published_at};

pub const MSG_STARTING: &str = "Starting fetch...";
pub const MSG_MISSING_KEY: &str = "NEWSAPI_KEY is not set. Skipping fetch.";
pub const MSG_CANCELED: &str = "Fetch canceled.";

/// Upstream paging and fan-out limits for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub countries: Vec<String>,
    pub page_size: u32,
    pub pages_per_country: u32,
    pub workers: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            countries: vec!["us".into(), "sg".into(), "gb".into()],
            page_size: 100,
            pages_per_country: 1,
            workers: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchOutcome {
    pub run_id: Uuid,
    pub state: FetchState,
    pub fetched: usize,
    pub skipped_duplicates: usize,
    pub stored: usize,
    pub failed: usize,
    pub countries: Vec<String>,
}

impl FetchOutcome {
    fn new(run_id: Uuid, countries: &[String]) -> Self {
        Self {
            run_id,
            state: FetchState::Starting,
            fetched: 0,
            skipped_duplicates: 0,
            stored: 0,
            failed: 0,
            countries: countries.to_vec(),
        }
    }
}

/// A run whose status has been published but which has not started yet.
#[derive(Debug)]
pub struct RunTicket {
    pub run_id: Uuid,
    token: CancellationToken,
}

/// Fetch, dedupe, enrich and store one batch of headlines.
#[derive(Clone)]
pub struct FetchPipeline {
    source: Arc<dyn HeadlineSource>,
    extractor: Arc<dyn TextExtractor>,
    store: Arc<dyn ArticleStore>,
    stages: EnrichmentStages,
    status: Arc<StatusRegister>,
    cancel: Arc<CancelSignal>,
    settings: RunSettings,
}

impl FetchPipeline {
    pub fn new(
        source: Arc<dyn HeadlineSource>,
        extractor: Arc<dyn TextExtractor>,
        store: Arc<dyn ArticleStore>,
        stages: EnrichmentStages,
        settings: RunSettings,
    ) -> Self {
        Self {
            source,
            extractor,
            store,
            stages,
            status: Arc::new(StatusRegister::new()),
            cancel: Arc::new(CancelSignal::new()),
            settings,
        }
    }

    pub fn status(&self) -> &Arc<StatusRegister> {
        &self.status
    }

    pub fn cancel_signal(&self) -> &Arc<CancelSignal> {
        &self.cancel
    }

    /// Runs to a terminal state. Configuration problems and cancellation end
    /// in `Ok` with the matching state; unexpected failures are recorded as
    /// `error` and returned.
    pub async fn run(&self) -> Result<FetchOutcome> {
        let ticket = self.prepare();
        self.run_prepared(ticket).await
    }

    /// Clear any stale stop request and publish a fresh `starting` status.
    pub fn prepare(&self) -> RunTicket {
        let run_id = Uuid::new_v4();
        let token = self.cancel.reset();
        self.status.reset(run_id, MSG_STARTING);
        RunTicket { run_id, token }
    }

    pub async fn run_prepared(&self, ticket: RunTicket) -> Result<FetchOutcome> {
        let RunTicket { run_id, token } = ticket;
        info!(%run_id, "{MSG_STARTING}");

        let span = info_span!("fetch_run", %run_id);
        match self.execute(run_id, &token).instrument(span).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let message = format!("Fetch failed: {err:#}");
                warn!(%run_id, "{message}");
                self.status.merge(StatusUpdate::state(FetchState::Error, message));
                Err(err)
            }
        }
    }

    async fn execute(&self, run_id: Uuid, token: &CancellationToken) -> Result<FetchOutcome> {
        let mut outcome = FetchOutcome::new(run_id, &self.settings.countries);

        if !self.source.has_credential() {
            warn!("{MSG_MISSING_KEY}");
            self.status
                .merge(StatusUpdate::state(FetchState::Error, MSG_MISSING_KEY));
            outcome.state = FetchState::Error;
            return Ok(outcome);
        }

        self.status.merge(StatusUpdate::state(
            FetchState::Fetching,
            "Fetching articles from NewsAPI...",
        ));
        let Some(fetched) = self.fetch_all(token).await else {
            return Ok(self.canceled(outcome));
        };
        outcome.fetched = fetched.len();

        let mut batch = self
            .store
            .begin_batch()
            .await
            .context("opening article batch")?;
        let (pending, skipped) = dedupe(batch.as_mut(), fetched).await?;
        outcome.skipped_duplicates = skipped;
        if skipped > 0 {
            info!(skipped, "skipped duplicate articles");
        }

        if token.is_cancelled() {
            return Ok(self.canceled(outcome));
        }

        let total = pending.len();
        self.status.merge(StatusUpdate {
            state: Some(FetchState::Processing),
            message: Some(progress_message(0, total)),
            total: Some(total),
            processed: Some(0),
        });

        let finished = self.process(batch.as_mut(), pending, token, &mut outcome).await?;
        if !finished {
            batch.commit().await.context("committing articles stored before cancel")?;
            return Ok(self.canceled(outcome));
        }

        batch.commit().await.context("committing article batch")?;
        let message = format!(
            "Stored {} articles from {} countries.",
            outcome.stored,
            self.settings.countries.len()
        );
        info!(
            stored = outcome.stored,
            failed = outcome.failed,
            skipped = outcome.skipped_duplicates,
            "{message}"
        );
        self.status.merge(StatusUpdate::state(FetchState::Done, message));
        outcome.state = FetchState::Done;
        Ok(outcome)
    }

    /// Every page of every country, or `None` once a stop is requested.
    async fn fetch_all(&self, token: &CancellationToken) -> Option<Vec<(RawItem, String)>> {
        let mut fetched = Vec::new();
        for country in &self.settings.countries {
            let mut per_country = 0usize;
            for page in 1..=self.settings.pages_per_country {
                if token.is_cancelled() {
                    return None;
                }
                debug!(country = %country, page, "fetching top headlines");
                let items = match self
                    .source
                    .fetch_headlines(country, page, self.settings.page_size)
                    .await
                {
                    Ok(items) => items,
                    Err(err) => {
                        warn!(country = %country, page, error = %err, "headline page failed; skipping");
                        continue;
                    }
                };
                if items.is_empty() {
                    info!(country = %country, page, "no articles returned");
                    break;
                }
                per_country += items.len();
                fetched.extend(items.into_iter().map(|item| (item, country.clone())));
            }
            info!(country = %country.to_uppercase(), count = per_country, "fetched headlines");
        }
        Some(fetched)
    }

    /// Fan enrichment out over the worker pool and insert results as they
    /// complete. Returns `false` if a stop was observed before the drain finished.
    async fn process(
        &self,
        batch: &mut dyn ArticleBatch,
        pending: Vec<(RawItem, String)>,
        token: &CancellationToken,
        outcome: &mut FetchOutcome,
    ) -> Result<bool> {
        let total = pending.len();
        let permits = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let mut tasks = JoinSet::new();
        for (item, country) in pending {
            let permits = Arc::clone(&permits);
            let extractor = Arc::clone(&self.extractor);
            let stages = self.stages.clone();
            tasks.spawn(
                async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .context("worker pool closed")?;
                    Ok::<_, anyhow::Error>(enrich_item(item, country, extractor.as_ref(), &stages).await)
                }
                .in_current_span(),
            );
        }

        let mut processed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            if token.is_cancelled() {
                tasks.detach_all();
                return Ok(false);
            }
            match joined {
                Ok(Ok(article)) => {
                    if batch
                        .insert_if_absent(&article)
                        .await
                        .context("inserting article")?
                    {
                        outcome.stored += 1;
                        debug!(title = %article.title, country = %article.country, source = %article.source, "stored article");
                    } else {
                        outcome.skipped_duplicates += 1;
                    }
                }
                Ok(Err(err)) => {
                    outcome.failed += 1;
                    warn!(error = %err, "error processing article");
                }
                Err(err) => {
                    outcome.failed += 1;
                    warn!(error = %err, "article task aborted");
                }
            }
            processed += 1;
            self.status.merge(StatusUpdate {
                message: Some(progress_message(processed, total)),
                processed: Some(processed),
                ..StatusUpdate::default()
            });
        }
        Ok(true)
    }

    fn canceled(&self, mut outcome: FetchOutcome) -> FetchOutcome {
        info!(run_id = %outcome.run_id, "{MSG_CANCELED}");
        self.status
            .merge(StatusUpdate::state(FetchState::Canceled, MSG_CANCELED));
        outcome.state = FetchState::Canceled;
        outcome
    }
}

fn progress_message(processed: usize, total: usize) -> String {
    format!("Processing {processed}/{total} articles")
}

/// Drop items already stored or seen earlier in this batch. Items without a
/// URL are always kept.
async fn dedupe(
    batch: &mut dyn ArticleBatch,
    fetched: Vec<(RawItem, String)>,
) -> Result<(Vec<(RawItem, String)>, usize)> {
    let urls: Vec<String> = fetched
        .iter()
        .filter_map(|(item, _)| item.url.clone())
        .filter(|url| !url.is_empty())
        .collect();
    let existing = if urls.is_empty() {
        HashSet::new()
    } else {
        batch
            .find_existing_urls(&urls)
            .await
            .context("looking up stored urls")?
    };

    let mut seen = HashSet::new();
    let mut skipped = 0usize;
    let mut kept = Vec::with_capacity(fetched.len());
    for (item, country) in fetched {
        if let Some(url) = item.url.as_deref().filter(|u| !u.is_empty()) {
            if existing.contains(url) || !seen.insert(url.to_string()) {
                skipped += 1;
                continue;
            }
        }
        kept.push((item, country));
    }
    Ok((kept, skipped))
}

async fn enrich_item(
    item: RawItem,
    country: String,
    extractor: &dyn TextExtractor,
    stages: &EnrichmentStages,
) -> EnrichedArticle {
    let full_text = match item.url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => extractor.extract(url).await,
        None => String::new(),
    };
    let content = if full_text.trim().is_empty() {
        item.fallback_text().to_string()
    } else {
        full_text
    };

    let summary = stages
        .summarizer
        .summarize(&clean_for_summarization(&content))
        .await;
    let title = item.title.clone().unwrap_or_default();
    let verdict = stages.sentiment.classify(&title, &summary).await;
    let category = stages.category.classify(&format!("{title} {summary}")).await;

    EnrichedArticle {
        title,
        summary,
        sentiment_tone: verdict.tone,
        sentiment_impact: verdict.impact,
        sentiment_confidence: verdict.confidence,
        impact_level: verdict.impact_level,
        impact_reason: verdict.reason,
        image_url: item.image_url.clone(),
        source: item.source_name.clone().unwrap_or_else(|| "Unknown".to_string()),
        url: item.url.clone().filter(|u| !u.is_empty()),
        category,
        country: country.to_uppercase(),
        published_at: parse_published_at(item.published_at.as_deref()),
    }
}
