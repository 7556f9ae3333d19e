//! JSON control and read API over the fetch service and the article store.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use newsroom_core::{EnrichedArticle, FetchStatus};
use newsroom_enrich::BriefingWriter;
use newsroom_storage::{ArticleFilter, ArticleStore, StoredArticle};
use newsroom_sync::{FetchService, Newsroom, TriggerOutcome};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "newsroom-web";

/// Articles considered when writing the briefing.
const BRIEFING_POOL: u32 = 200;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FetchService>,
    pub store: Arc<dyn ArticleStore>,
    pub briefing: Arc<BriefingWriter>,
}

impl AppState {
    pub fn new(service: Arc<FetchService>, store: Arc<dyn ArticleStore>, briefing: Arc<BriefingWriter>) -> Self {
        Self {
            service,
            store,
            briefing,
        }
    }

    pub fn from_newsroom(newsroom: &Newsroom) -> Self {
        Self::new(
            Arc::clone(&newsroom.service),
            Arc::clone(&newsroom.store) as Arc<dyn ArticleStore>,
            Arc::clone(&newsroom.briefing),
        )
    }
}

#[derive(Debug, Serialize)]
struct LastFetchBody {
    last_fetch_time_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct BriefingBody {
    summary: Option<String>,
    last_fetch_time_utc: Option<DateTime<Utc>>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/refresh-news", post(refresh_handler))
        .route("/fetch-status", get(status_handler))
        .route("/fetch-stop", post(stop_handler))
        .route("/last-fetch-time", get(last_fetch_handler))
        .route("/summaries", get(summaries_handler))
        .route("/briefing", get(briefing_handler))
        .with_state(state)
}

/// Serve until ctrl-c, then ask any live run to stop.
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let service = Arc::clone(&state.service);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web api listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "could not listen for shutdown signal");
                return;
            }
            info!("shutdown requested");
            service.shutdown();
        })
        .await?;
    Ok(())
}

/// At most one run is live; a trigger mid-run reports it and leaves its status alone.
async fn refresh_handler(State(state): State<AppState>) -> Response {
    let message = match state.service.trigger() {
        TriggerOutcome::Started => "News refresh started",
        TriggerOutcome::AlreadyRunning => "News refresh already running",
    };
    (StatusCode::ACCEPTED, Json(json!({ "message": message }))).into_response()
}

async fn status_handler(State(state): State<AppState>) -> Json<FetchStatus> {
    Json(state.service.status())
}

async fn stop_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.service.request_cancel();
    Json(json!({ "message": "Fetch stop requested" }))
}

async fn last_fetch_handler(State(state): State<AppState>) -> Json<LastFetchBody> {
    Json(LastFetchBody {
        last_fetch_time_utc: state.service.last_fetch_time(),
    })
}

async fn summaries_handler(
    State(state): State<AppState>,
    Query(filter): Query<ArticleFilter>,
) -> Result<Json<Vec<StoredArticle>>, Response> {
    state
        .store
        .list_articles(&filter)
        .await
        .map(Json)
        .map_err(|err| server_error(err.into()))
}

async fn briefing_handler(State(state): State<AppState>) -> Result<Json<BriefingBody>, Response> {
    let last_fetch = state.service.last_fetch_time();
    let recent = state
        .store
        .list_articles(&ArticleFilter {
            limit: Some(BRIEFING_POOL),
            ..ArticleFilter::default()
        })
        .await
        .map_err(|err| server_error(err.into()))?;
    let articles: Vec<EnrichedArticle> = recent.into_iter().map(|stored| stored.article).collect();
    let summary = state.briefing.brief(&articles, last_fetch).await;
    Ok(Json(BriefingBody {
        summary,
        last_fetch_time_utc: last_fetch,
    }))
}

fn server_error(err: anyhow::Error) -> Response {
    warn!(error = %format!("{err:#}"), "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": format!("{err:#}") })),
    )
        .into_response()
}
