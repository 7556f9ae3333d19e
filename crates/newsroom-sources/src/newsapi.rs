use std::sync::Arc;

use async_trait::async_trait;
use newsroom_core::RawItem;
use newsroom_storage::HttpFetcher;
use serde::Deserialize;
use tracing::debug;

use crate::{HeadlineSource, SourceError};

pub const DEFAULT_NEWSAPI_URL: &str = "https://newsapi.org/v2/top-headlines";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopHeadlinesResponse {
    status: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<ApiArticle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiArticle {
    #[serde(default)]
    source: Option<ApiSource>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    url_to_image: Option<String>,
    published_at: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiSource {
    name: Option<String>,
}

impl From<ApiArticle> for RawItem {
    fn from(article: ApiArticle) -> Self {
        RawItem {
            title: article.title,
            source_name: article.source.and_then(|s| s.name),
            url: article.url.filter(|u| !u.trim().is_empty()),
            published_at: article.published_at,
            image_url: article.url_to_image,
            description: article.description,
            content: article.content,
        }
    }
}

/// Decodes a top-headlines payload, surfacing `status: "error"` bodies as errors.
pub fn parse_top_headlines(body: &[u8]) -> Result<Vec<RawItem>, SourceError> {
    let parsed: TopHeadlinesResponse = serde_json::from_slice(body)?;
    if parsed.status != "ok" {
        return Err(SourceError::Api {
            code: parsed.code.unwrap_or_else(|| parsed.status.clone()),
            message: parsed.message.unwrap_or_default(),
        });
    }
    Ok(parsed.articles.into_iter().map(RawItem::from).collect())
}

pub struct NewsApiSource {
    http: Arc<HttpFetcher>,
    base_url: String,
    api_key: Option<String>,
}

impl NewsApiSource {
    pub fn new(http: Arc<HttpFetcher>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    fn page_url(&self, key: &str, country: &str, page: u32, page_size: u32) -> Result<url::Url, SourceError> {
        let page = page.to_string();
        let page_size = page_size.to_string();
        Ok(url::Url::parse_with_params(
            &self.base_url,
            [
                ("country", country),
                ("pageSize", page_size.as_str()),
                ("page", page.as_str()),
                ("apiKey", key),
            ],
        )?)
    }
}

#[async_trait]
impl HeadlineSource for NewsApiSource {
    fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    async fn fetch_headlines(
        &self,
        country: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<RawItem>, SourceError> {
        let key = self.api_key.as_deref().ok_or(SourceError::MissingCredential)?;
        let url = self.page_url(key, country, page, page_size)?;
        let response = self.http.get(url.as_str()).await?;
        let items = parse_top_headlines(&response.body)?;
        debug!(country, page, count = items.len(), "fetched headline page");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_provider_fields_onto_raw_items() {
        let body = br#"{
            "status": "ok",
            "totalResults": 2,
            "articles": [
                {"source": {"id": null, "name": "Wire"}, "title": "A", "description": "d",
                 "url": "https://x/a", "urlToImage": "https://x/a.png",
                 "publishedAt": "2024-05-01T10:00:00Z", "content": "c"},
                {"source": null, "title": "B", "url": "", "publishedAt": null}
            ]
        }"#;
        let items = parse_top_headlines(body).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].source_name.as_deref(), Some("Wire"));
        assert_eq!(items[0].image_url.as_deref(), Some("https://x/a.png"));
        assert_eq!(items[1].url, None);
        assert_eq!(items[1].source_name, None);
    }

    #[test]
    fn error_payloads_become_api_errors() {
        let body = br#"{"status":"error","code":"apiKeyInvalid","message":"bad key"}"#;
        match parse_top_headlines(body) {
            Err(SourceError::Api { code, message }) => {
                assert_eq!(code, "apiKeyInvalid");
                assert_eq!(message, "bad key");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn blank_keys_count_as_missing() {
        let http = Arc::new(HttpFetcher::new(Default::default()).unwrap());
        let source = NewsApiSource::new(http, DEFAULT_NEWSAPI_URL, Some("  ".into()));
        assert!(!source.has_credential());
    }
}
