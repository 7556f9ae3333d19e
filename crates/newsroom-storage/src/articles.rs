use std::collections::HashSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newsroom_core::{Category, EnrichedArticle, ImpactLevel};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Acquire, QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use thiserror::Error;
use tracing::debug;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// SQLite caps bound parameters per statement; URL lookups are chunked below it.
const URL_LOOKUP_CHUNK: usize = 500;
const DEFAULT_LIST_LIMIT: i64 = 200;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Equality filters for the read API. `None` means "any".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleFilter {
    pub tone: Option<String>,
    pub impact: Option<String>,
    pub category: Option<Category>,
    pub source: Option<String>,
    pub country: Option<String>,
    pub impact_level: Option<ImpactLevel>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredArticle {
    pub id: i64,
    #[serde(flatten)]
    pub article: EnrichedArticle,
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Opens the outer unit of work for one fetch run.
    async fn begin_batch(&self) -> Result<Box<dyn ArticleBatch>, StoreError>;

    /// Newest `published_at` first.
    async fn list_articles(&self, filter: &ArticleFilter)
        -> Result<Vec<StoredArticle>, StoreError>;
}

/// Uncommitted writes of a single run. Dropping without `commit` discards them.
#[async_trait]
pub trait ArticleBatch: Send {
    async fn find_existing_urls(&mut self, urls: &[String]) -> Result<HashSet<String>, StoreError>;

    /// Inserts under a savepoint. Returns `false` when the URL is already stored.
    async fn insert_if_absent(&mut self, article: &EnrichedArticle) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteArticleStore {
    pool: SqlitePool,
}

impl SqliteArticleStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let in_memory = database_url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool_options = if in_memory {
            // Every connection to `:memory:` is its own database.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            options = options.journal_mode(SqliteJournalMode::Wal);
            SqlitePoolOptions::new().max_connections(4)
        };
        let pool = pool_options.connect_with(options).await?;
        Ok(Self { pool })
    }

    /// Connects and applies the embedded migrations.
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let store = Self::connect(database_url).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl ArticleStore for SqliteArticleStore {
    async fn begin_batch(&self) -> Result<Box<dyn ArticleBatch>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteBatch { tx }))
    }

    async fn list_articles(
        &self,
        filter: &ArticleFilter,
    ) -> Result<Vec<StoredArticle>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT id, title, summary, sentiment_tone, sentiment_impact, sentiment_confidence,
                   impact_level, impact_reason, image_url, source, url, category, country,
                   published_at
              FROM articles
             WHERE 1 = 1
            "#,
        );
        if let Some(tone) = &filter.tone {
            qb.push(" AND sentiment_tone = ").push_bind(tone.clone());
        }
        if let Some(impact) = &filter.impact {
            qb.push(" AND sentiment_impact = ").push_bind(impact.clone());
        }
        if let Some(category) = filter.category {
            qb.push(" AND category = ").push_bind(category.as_str());
        }
        if let Some(source) = &filter.source {
            qb.push(" AND source = ").push_bind(source.clone());
        }
        if let Some(country) = &filter.country {
            qb.push(" AND country = ")
                .push_bind(country.trim().to_ascii_uppercase());
        }
        if let Some(level) = filter.impact_level {
            qb.push(" AND impact_level = ").push_bind(level.as_str());
        }
        qb.push(" ORDER BY published_at DESC, id DESC LIMIT ")
            .push_bind(filter.limit.map(i64::from).unwrap_or(DEFAULT_LIST_LIMIT));

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(article_from_row).collect()
    }
}

struct SqliteBatch {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl ArticleBatch for SqliteBatch {
    async fn find_existing_urls(&mut self, urls: &[String]) -> Result<HashSet<String>, StoreError> {
        let mut existing = HashSet::new();
        for chunk in urls.chunks(URL_LOOKUP_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new("SELECT url FROM articles WHERE url IN (");
            let mut separated = qb.separated(", ");
            for url in chunk {
                separated.push_bind(url.as_str());
            }
            separated.push_unseparated(")");

            let rows = qb.build().fetch_all(&mut *self.tx).await?;
            for row in rows {
                let url: Option<String> = row.try_get("url")?;
                existing.extend(url);
            }
        }
        Ok(existing)
    }

    async fn insert_if_absent(&mut self, article: &EnrichedArticle) -> Result<bool, StoreError> {
        let mut savepoint = self.tx.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO articles (
                title, summary, sentiment_tone, sentiment_impact, sentiment_confidence,
                impact_level, impact_reason, image_url, source, url, category, country,
                published_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&article.title)
        .bind(&article.summary)
        .bind(&article.sentiment_tone)
        .bind(&article.sentiment_impact)
        .bind(&article.sentiment_confidence)
        .bind(article.impact_level.as_str())
        .bind(&article.impact_reason)
        .bind(&article.image_url)
        .bind(&article.source)
        .bind(&article.url)
        .bind(article.category.as_str())
        .bind(&article.country)
        .bind(article.published_at)
        .execute(&mut *savepoint)
        .await;

        match result {
            Ok(_) => {
                savepoint.commit().await?;
                Ok(true)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                savepoint.rollback().await?;
                debug!(url = ?article.url, "duplicate url rejected by store");
                Ok(false)
            }
            Err(err) => {
                savepoint.rollback().await?;
                Err(err.into())
            }
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

fn article_from_row(row: &SqliteRow) -> Result<StoredArticle, StoreError> {
    let impact_level: String = row.try_get("impact_level")?;
    let category: String = row.try_get("category")?;
    let published_at: DateTime<Utc> = row.try_get("published_at")?;
    Ok(StoredArticle {
        id: row.try_get("id")?,
        article: EnrichedArticle {
            title: row.try_get("title")?,
            summary: row.try_get("summary")?,
            sentiment_tone: row.try_get("sentiment_tone")?,
            sentiment_impact: row.try_get("sentiment_impact")?,
            sentiment_confidence: row.try_get("sentiment_confidence")?,
            impact_level: ImpactLevel::from_label(&impact_level).unwrap_or_default(),
            impact_reason: row.try_get("impact_reason")?,
            image_url: row.try_get("image_url")?,
            source: row.try_get("source")?,
            url: row.try_get("url")?,
            category: Category::from_label(&category).unwrap_or_default(),
            country: row.try_get("country")?,
            published_at,
        },
    })
}
