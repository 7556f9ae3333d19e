use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use newsroom_storage::HttpFetcher;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::TextExtractor;

/// Paragraphs shorter than this carry no weight in density scoring.
const MIN_PARAGRAPH_CHARS: usize = 25;
/// Below this, a strategy's output is treated as "nothing found".
const MIN_ARTICLE_CHARS: usize = 140;

const BOILERPLATE_ANCESTORS: &[&str] = &["nav", "header", "footer", "aside", "form", "figure"];

const ARTICLE_BODY_SELECTORS: &[&str] = &[
    "[itemprop='articleBody']",
    "article",
    ".article-body",
    ".article__body",
    ".story-body",
    "#article-body",
    ".post-content",
    ".entry-content",
    "main",
];

/// Undo JSON-style escapes that leak into provider URLs.
pub fn normalize_url(url: &str) -> String {
    url.trim()
        .replace("\\u003d", "=")
        .replace("\\u0026", "&")
        .replace("\\/", "/")
        .replace("\\=", "=")
}

pub struct HtmlTextExtractor {
    http: Arc<HttpFetcher>,
    blocked_domains: Vec<String>,
}

impl HtmlTextExtractor {
    pub fn new(http: Arc<HttpFetcher>, blocked_domains: Vec<String>) -> Self {
        let blocked_domains = blocked_domains
            .into_iter()
            .map(|d| d.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self {
            http,
            blocked_domains,
        }
    }

    pub fn is_blocked(&self, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.blocked_domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    }
}

#[async_trait]
impl TextExtractor for HtmlTextExtractor {
    async fn extract(&self, url: &str) -> String {
        let url = normalize_url(url);
        if url.is_empty() {
            return String::new();
        }
        if self.is_blocked(&url) {
            debug!(%url, "extraction skipped for blocked domain");
            return String::new();
        }

        let page = match self.http.get(&url).await {
            Ok(page) => page,
            Err(err) => {
                warn!(%url, error = %err, "article fetch failed; using provider fallback text");
                return String::new();
            }
        };

        let text = extract_readable_text(&page.text_lossy());
        if text.is_empty() {
            debug!(%url, "no readable text found; using provider fallback text");
        }
        text
    }
}

/// Density scoring first, then article-body selectors. Empty when neither finds text.
pub fn extract_readable_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let text = density_text(&document);
    if !text.is_empty() {
        return text;
    }
    selector_text(&document)
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

fn in_boilerplate(el: ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| BOILERPLATE_ANCESTORS.contains(&a.value().name()))
}

fn link_density(el: ElementRef<'_>, links: &Selector) -> f64 {
    let total = element_text(el).len();
    if total == 0 {
        return 1.0;
    }
    let linked: usize = el.select(links).map(|a| element_text(a).len()).sum();
    linked as f64 / total as f64
}

/// Credit each paragraph's parent fully and its grandparent by half, then keep
/// the best-scoring container's paragraphs.
fn density_text(document: &Html) -> String {
    let (Some(paragraphs), Some(links)) = (selector("p"), selector("a")) else {
        return String::new();
    };

    let mut scores = HashMap::new();
    for p in document.select(&paragraphs) {
        if in_boilerplate(p) {
            continue;
        }
        let text = element_text(p);
        if text.len() < MIN_PARAGRAPH_CHARS {
            continue;
        }
        let score = 1.0 + text.matches(',').count() as f64 + (text.len() / 100).min(3) as f64;

        let mut ancestors = p.ancestors().filter_map(ElementRef::wrap);
        if let Some(parent) = ancestors.next() {
            *scores.entry(parent.id()).or_insert(0.0) += score;
            if let Some(grandparent) = ancestors.next() {
                *scores.entry(grandparent.id()).or_insert(0.0) += score / 2.0;
            }
        }
    }

    let best = scores
        .into_iter()
        .filter_map(|(id, score)| {
            let el = document.tree.get(id).and_then(ElementRef::wrap)?;
            Some((el, score * (1.0 - link_density(el, &links))))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1));

    let Some((container, _)) = best else {
        return String::new();
    };

    let text = container
        .select(&paragraphs)
        .filter(|p| !in_boilerplate(*p))
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if text.len() >= MIN_ARTICLE_CHARS {
        text
    } else {
        String::new()
    }
}

fn selector_text(document: &Html) -> String {
    for css in ARTICLE_BODY_SELECTORS {
        let Some(sel) = selector(css) else {
            continue;
        };
        for candidate in document.select(&sel) {
            let text = element_text(candidate);
            if text.len() >= MIN_ARTICLE_CHARS {
                return text;
            }
        }
    }
    String::new()
}
