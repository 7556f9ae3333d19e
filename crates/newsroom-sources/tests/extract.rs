use std::sync::Arc;

use newsroom_sources::{HtmlTextExtractor, TextExtractor};
use newsroom_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fixture(name: &str) -> String {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    std::fs::read_to_string(path).expect("fixture")
}

fn extractor(blocked: &[&str]) -> HtmlTextExtractor {
    let http = HttpFetcher::new(HttpClientConfig {
        user_agent: Some("Mozilla/5.0 (Windows NT 10.0; Win64; x64)".into()),
        accept_language: Some("en-US,en;q=0.9".into()),
        backoff: BackoffPolicy::none(),
        ..Default::default()
    })
    .expect("fetcher");
    HtmlTextExtractor::new(
        Arc::new(http),
        blocked.iter().map(ToString::to_string).collect(),
    )
}

#[tokio::test]
async fn extracts_article_paragraphs_with_browser_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markets/fed"))
        .and(header("user-agent", "Mozilla/5.0 (Windows NT 10.0; Win64; x64)"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(fixture("article.html")),
        )
        .mount(&server)
        .await;

    let text = extractor(&[])
        .extract(&format!("{}/markets/fed", server.uri()))
        .await;

    assert!(text.starts_with("The Federal Reserve left"));
    assert!(text.contains("pared bets on a move in June."));
    assert!(!text.contains("Subscribe now"));
    assert!(!text.contains("Most read"));
    assert!(!text.contains("tracking"));
}

#[tokio::test]
async fn http_failures_degrade_to_empty_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let text = extractor(&[]).extract(&format!("{}/paywalled", server.uri())).await;
    assert_eq!(text, "");
}

#[tokio::test]
async fn blocked_domains_are_never_fetched() {
    let text = extractor(&["ft.com"])
        .extract("https://www.ft.com/content/oil-prices")
        .await;
    assert_eq!(text, "");
}

#[tokio::test]
async fn unreachable_hosts_degrade_to_empty_text() {
    let text = extractor(&[]).extract("http://127.0.0.1:9/nothing").await;
    assert_eq!(text, "");
}
