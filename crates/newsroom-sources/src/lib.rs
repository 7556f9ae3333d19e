//! Upstream collaborators: the headline provider and the article text extractor.

mod extract;
mod newsapi;

use async_trait::async_trait;
use newsroom_core::RawItem;
use newsroom_storage::FetchError;
use thiserror::Error;

pub use extract::{extract_readable_text, normalize_url, HtmlTextExtractor};
pub use newsapi::{parse_top_headlines, NewsApiSource, DEFAULT_NEWSAPI_URL};

pub const CRATE_NAME: &str = "newsroom-sources";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("upstream credential is not configured")]
    MissingCredential,
    #[error("invalid upstream url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("upstream returned http status {0}")]
    Status(u16),
    #[error("upstream reported an error: {code}: {message}")]
    Api { code: String, message: String },
    #[error(transparent)]
    Transport(FetchError),
    #[error("decoding upstream payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<FetchError> for SourceError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::HttpStatus { status, .. } => Self::Status(status),
            other => Self::Transport(other),
        }
    }
}

#[async_trait]
pub trait HeadlineSource: Send + Sync {
    /// Whether an upstream credential is present. Runs refuse to start without one.
    fn has_credential(&self) -> bool;

    /// One page of top headlines for `country`. Pages are 1-based.
    async fn fetch_headlines(
        &self,
        country: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<RawItem>, SourceError>;
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Readable plain text for `url`, or an empty string on any failure.
    async fn extract(&self, url: &str) -> String;
}
