use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use newsroom_core::{FetchState, RawItem};
use newsroom_enrich::{EnrichmentStages, ResponseCache};
use newsroom_sources::{HeadlineSource, SourceError, TextExtractor};
use newsroom_storage::{
    ArticleBatch, ArticleFilter, ArticleStore, LastRunStore, SqliteArticleStore, StoreError,
    StoredArticle,
};
use newsroom_sync::{
    CancelSignal, FetchPipeline, FetchService, RunSettings, TriggerOutcome, MSG_CANCELED,
    MSG_MISSING_KEY,
};

type Page = Result<Vec<RawItem>, u16>;

#[derive(Default)]
struct StaticSource {
    credential: bool,
    pages: HashMap<(String, u32), Page>,
    calls: AtomicUsize,
    cancel_on_call: Mutex<Option<(usize, Arc<CancelSignal>)>>,
}

impl StaticSource {
    fn with_key() -> Self {
        Self {
            credential: true,
            ..Self::default()
        }
    }

    fn page(mut self, country: &str, page: u32, result: Page) -> Self {
        self.pages.insert((country.to_string(), page), result);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HeadlineSource for StaticSource {
    fn has_credential(&self) -> bool {
        self.credential
    }

    async fn fetch_headlines(
        &self,
        country: &str,
        page: u32,
        _page_size: u32,
    ) -> Result<Vec<RawItem>, SourceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, signal)) = self.cancel_on_call.lock().unwrap().as_ref() {
            if *at == call {
                signal.request();
            }
        }
        match self.pages.get(&(country.to_string(), page)) {
            Some(Ok(items)) => Ok(items.clone()),
            Some(Err(status)) => Err(SourceError::Status(*status)),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Default)]
struct StaticExtractor {
    calls: AtomicUsize,
    cancel_on_call: Mutex<Option<(usize, Arc<CancelSignal>)>>,
    panic_on: Option<String>,
}

#[async_trait]
impl TextExtractor for StaticExtractor {
    async fn extract(&self, url: &str) -> String {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, signal)) = self.cancel_on_call.lock().unwrap().as_ref() {
            if *at == call {
                signal.request();
            }
        }
        if self.panic_on.as_deref() == Some(url) {
            panic!("extractor blew up on {url}");
        }
        String::new()
    }
}

/// Counts batches opened so tests can assert that storage was never touched.
struct CountingStore {
    inner: SqliteArticleStore,
    batches: AtomicUsize,
}

#[async_trait]
impl ArticleStore for CountingStore {
    async fn begin_batch(&self) -> Result<Box<dyn ArticleBatch>, StoreError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.inner.begin_batch().await
    }

    async fn list_articles(&self, filter: &ArticleFilter) -> Result<Vec<StoredArticle>, StoreError> {
        self.inner.list_articles(filter).await
    }
}

fn item(title: &str, url: Option<&str>) -> RawItem {
    RawItem {
        title: Some(title.to_string()),
        source_name: Some("Wire".to_string()),
        url: url.map(str::to_string),
        published_at: Some("2024-05-01T10:00:00Z".to_string()),
        image_url: None,
        description: Some(format!("{title} description with enough words to keep around.")),
        content: None,
    }
}

async fn counting_store() -> Arc<CountingStore> {
    Arc::new(CountingStore {
        inner: SqliteArticleStore::open("sqlite::memory:").await.unwrap(),
        batches: AtomicUsize::new(0),
    })
}

fn settings(countries: &[&str], pages: u32, workers: usize) -> RunSettings {
    RunSettings {
        countries: countries.iter().map(|c| c.to_string()).collect(),
        page_size: 100,
        pages_per_country: pages,
        workers,
    }
}

fn pipeline(
    source: Arc<StaticSource>,
    extractor: Arc<StaticExtractor>,
    store: Arc<CountingStore>,
    settings: RunSettings,
) -> FetchPipeline {
    FetchPipeline::new(
        source,
        extractor,
        store,
        EnrichmentStages::local_only(Arc::new(ResponseCache::default())),
        settings,
    )
}

#[tokio::test]
async fn missing_credential_errors_without_touching_storage() {
    let source = Arc::new(StaticSource::default());
    let store = counting_store().await;
    let pipeline = pipeline(
        Arc::clone(&source),
        Arc::new(StaticExtractor::default()),
        Arc::clone(&store),
        RunSettings::default(),
    );

    let outcome = pipeline.run().await.unwrap();

    assert_eq!(outcome.state, FetchState::Error);
    let status = pipeline.status().snapshot();
    assert_eq!(status.state, FetchState::Error);
    assert!(status.message.contains("NEWSAPI_KEY"));
    assert_eq!(status.message, MSG_MISSING_KEY);
    assert!(status.finished_at.is_some());
    assert_eq!(source.calls(), 0);
    assert_eq!(store.batches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn duplicates_are_skipped_before_total_is_fixed() {
    let store = counting_store().await;
    {
        let mut batch = store.begin_batch().await.unwrap();
        let mut seeded = newsroom_core::EnrichedArticle {
            title: "Seed".into(),
            summary: "Seed".into(),
            sentiment_tone: "neutral".into(),
            sentiment_impact: "neutral for general market".into(),
            sentiment_confidence: "0.00".into(),
            impact_level: Default::default(),
            impact_reason: String::new(),
            image_url: None,
            source: "Wire".into(),
            url: None,
            category: Default::default(),
            country: "US".into(),
            published_at: Utc::now(),
        };
        seeded.url = Some("https://news.test/stored".into());
        assert!(batch.insert_if_absent(&seeded).await.unwrap());
        batch.commit().await.unwrap();
    }

    let source = Arc::new(StaticSource::with_key().page(
        "us",
        1,
        Ok(vec![
            item("Stored already", Some("https://news.test/stored")),
            item("First copy", Some("https://news.test/a")),
            item("Second copy", Some("https://news.test/a")),
            item("Other", Some("https://news.test/b")),
            item("No link", None),
        ]),
    ));
    let pipeline = pipeline(
        source,
        Arc::new(StaticExtractor::default()),
        Arc::clone(&store),
        settings(&["us"], 1, 6),
    );

    let outcome = pipeline.run().await.unwrap();

    assert_eq!(outcome.state, FetchState::Done);
    assert_eq!(outcome.fetched, 5);
    assert_eq!(outcome.skipped_duplicates, 2);
    assert_eq!(outcome.stored, 3);
    assert_eq!(outcome.failed, 0);

    let status = pipeline.status().snapshot();
    assert_eq!(status.total, 3);
    assert_eq!(status.processed, 3);
    assert_eq!(status.message, "Stored 3 articles from 1 countries.");
    assert_eq!(store.inner.count().await.unwrap(), 4);

    let stored = store
        .list_articles(&ArticleFilter {
            country: Some("us".into()),
            ..ArticleFilter::default()
        })
        .await
        .unwrap();
    let urls: Vec<_> = stored
        .iter()
        .filter_map(|a| a.article.url.as_deref())
        .filter(|u| *u == "https://news.test/a")
        .collect();
    assert_eq!(urls.len(), 1);
}

#[tokio::test]
async fn failed_and_empty_pages_do_not_stop_the_run() {
    let source = Arc::new(
        StaticSource::with_key()
            .page("us", 1, Err(500))
            .page("us", 2, Ok(vec![item("US story", Some("https://news.test/us"))]))
            .page("sg", 1, Ok(Vec::new()))
            .page("sg", 2, Ok(vec![item("never fetched", Some("https://news.test/sg"))])),
    );
    let store = counting_store().await;
    let pipeline = pipeline(
        Arc::clone(&source),
        Arc::new(StaticExtractor::default()),
        Arc::clone(&store),
        settings(&["us", "sg"], 2, 2),
    );

    let outcome = pipeline.run().await.unwrap();

    assert_eq!(outcome.state, FetchState::Done);
    assert_eq!(outcome.stored, 1);
    // us: two pages; sg: the empty first page ends paging.
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn task_failures_are_counted_and_the_batch_survives() {
    let source = Arc::new(StaticSource::with_key().page(
        "gb",
        1,
        Ok(vec![
            item("Fine", Some("https://news.test/fine")),
            item("Broken", Some("https://news.test/broken")),
        ]),
    ));
    let extractor = Arc::new(StaticExtractor {
        panic_on: Some("https://news.test/broken".into()),
        ..StaticExtractor::default()
    });
    let store = counting_store().await;
    let pipeline = pipeline(source, extractor, Arc::clone(&store), settings(&["gb"], 1, 6));

    let outcome = pipeline.run().await.unwrap();

    assert_eq!(outcome.state, FetchState::Done);
    assert_eq!(outcome.stored, 1);
    assert_eq!(outcome.failed, 1);
    let status = pipeline.status().snapshot();
    assert_eq!(status.processed, status.total);
    assert_eq!(store.inner.count().await.unwrap(), 1);
}

#[tokio::test]
async fn cancel_during_fetching_stops_before_storage() {
    let source = Arc::new(
        StaticSource::with_key()
            .page("us", 1, Ok(vec![item("US", Some("https://news.test/us"))]))
            .page("gb", 1, Ok(vec![item("GB", Some("https://news.test/gb"))])),
    );
    let store = counting_store().await;
    let pipeline = pipeline(
        Arc::clone(&source),
        Arc::new(StaticExtractor::default()),
        Arc::clone(&store),
        settings(&["us", "gb"], 1, 6),
    );
    *source.cancel_on_call.lock().unwrap() = Some((1, Arc::clone(pipeline.cancel_signal())));

    let outcome = pipeline.run().await.unwrap();

    assert_eq!(outcome.state, FetchState::Canceled);
    assert_eq!(pipeline.status().snapshot().message, MSG_CANCELED);
    assert_eq!(source.calls(), 1);
    assert_eq!(store.batches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancel_during_processing_stops_committing() {
    let items: Vec<_> = (0..4)
        .map(|i| item(&format!("Story {i}"), Some(&format!("https://news.test/{i}"))))
        .collect();
    let source = Arc::new(StaticSource::with_key().page("us", 1, Ok(items)));
    let extractor = Arc::new(StaticExtractor::default());
    let store = counting_store().await;
    let pipeline = pipeline(
        source,
        Arc::clone(&extractor),
        Arc::clone(&store),
        settings(&["us"], 1, 1),
    );
    *extractor.cancel_on_call.lock().unwrap() = Some((2, Arc::clone(pipeline.cancel_signal())));

    let outcome = pipeline.run().await.unwrap();

    assert_eq!(outcome.state, FetchState::Canceled);
    let status = pipeline.status().snapshot();
    assert_eq!(status.state, FetchState::Canceled);
    assert_eq!(status.total, 4);
    assert!(status.processed < status.total);
    assert!(outcome.stored <= 1);
    assert_eq!(store.inner.count().await.unwrap(), outcome.stored as i64);
}

#[tokio::test]
async fn a_new_run_clears_an_earlier_stop_request() {
    let source = Arc::new(
        StaticSource::with_key().page("us", 1, Ok(vec![item("US", Some("https://news.test/us"))])),
    );
    let pipeline = pipeline(
        source,
        Arc::new(StaticExtractor::default()),
        counting_store().await,
        settings(&["us"], 1, 6),
    );
    pipeline.cancel_signal().request();

    let outcome = pipeline.run().await.unwrap();
    assert_eq!(outcome.state, FetchState::Done);
}

#[tokio::test]
async fn service_persists_last_run_only_after_success() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("last_fetch_time.txt");

    let failing = pipeline(
        Arc::new(StaticSource::default()),
        Arc::new(StaticExtractor::default()),
        counting_store().await,
        RunSettings::default(),
    );
    let service = FetchService::load(failing, LastRunStore::new(&path), Duration::from_secs(7200)).await;
    assert!(service.is_due(Utc::now()));
    let outcome = service.run_now().await.unwrap();
    assert_eq!(outcome.state, FetchState::Error);
    assert_eq!(service.last_fetch_time(), None);
    assert!(!path.exists());

    let working = pipeline(
        Arc::new(StaticSource::with_key()),
        Arc::new(StaticExtractor::default()),
        counting_store().await,
        settings(&["us"], 1, 6),
    );
    let service = FetchService::load(working, LastRunStore::new(&path), Duration::from_secs(7200)).await;
    let outcome = service.run_now().await.unwrap();
    assert_eq!(outcome.state, FetchState::Done);
    let recorded = service.last_fetch_time().unwrap();
    assert!(!service.is_due(Utc::now()));
    assert_eq!(LastRunStore::new(&path).load().await.unwrap(), Some(recorded));
}

#[tokio::test]
async fn scheduled_run_skips_when_last_success_is_recent() {
    let dir = tempfile::tempdir().unwrap();
    let last_run = LastRunStore::new(dir.path().join("last_fetch_time.txt"));
    last_run.save(Utc::now()).await.unwrap();

    let source = Arc::new(StaticSource::with_key());
    let pipeline = pipeline(
        Arc::clone(&source),
        Arc::new(StaticExtractor::default()),
        counting_store().await,
        settings(&["us"], 1, 6),
    );
    let service = FetchService::load(pipeline, last_run, Duration::from_secs(7200)).await;

    assert!(service.run_if_due().await.is_none());
    assert_eq!(source.calls(), 0);
    assert_eq!(service.status().state, FetchState::Idle);
}

/// Blocks every page request until the test hands out permits.
struct GatedSource {
    gate: tokio::sync::Semaphore,
    calls: AtomicUsize,
}

#[async_trait]
impl HeadlineSource for GatedSource {
    fn has_credential(&self) -> bool {
        true
    }

    async fn fetch_headlines(&self, _: &str, _: u32, _: u32) -> Result<Vec<RawItem>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await.unwrap();
        Ok(Vec::new())
    }
}

async fn wait_for(service: &FetchService, state: FetchState) {
    for _ in 0..100 {
        if service.status().state == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("status never reached {state}");
}

#[tokio::test]
async fn trigger_during_a_live_run_keeps_its_status() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(GatedSource {
        gate: tokio::sync::Semaphore::new(0),
        calls: AtomicUsize::new(0),
    });
    let pipeline = FetchPipeline::new(
        Arc::clone(&source) as Arc<dyn HeadlineSource>,
        Arc::new(StaticExtractor::default()),
        counting_store().await,
        EnrichmentStages::local_only(Arc::new(ResponseCache::default())),
        settings(&["us"], 1, 2),
    );
    let service = Arc::new(
        FetchService::load(
            pipeline,
            LastRunStore::new(dir.path().join("last_fetch_time.txt")),
            Duration::from_secs(7200),
        )
        .await,
    );

    assert_eq!(service.trigger(), TriggerOutcome::Started);
    for _ in 0..100 {
        if source.calls.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let live = service.status();
    assert!(live.run_id.is_some());

    assert_eq!(service.trigger(), TriggerOutcome::AlreadyRunning);
    let after = service.status();
    assert_eq!(after.run_id, live.run_id);
    assert_eq!(after.state, live.state);
    assert_eq!(after.message, live.message);

    source.gate.add_permits(10);
    wait_for(&service, FetchState::Done).await;

    assert_eq!(service.trigger(), TriggerOutcome::Started);
    assert_ne!(service.status().run_id, live.run_id);
    wait_for(&service, FetchState::Done).await;
}
