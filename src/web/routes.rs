use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use axum::Router;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use url::Url;

use super::AppState;
use crate::pipeline::{Entry, ScrapeError, ScrapeOutcome};
use crate::summarizer::SummarySource;
use crate::topic::{resolve_topic_url, TopicError, TopicRef};
use crate::trending::{fetch_trending, TrendingTopic};

/// Smallest `limit` the topic route accepts.
const MIN_TOPIC_LIMIT: usize = 10;
/// Entries shown per site page.
const ENTRIES_PER_PAGE: usize = 10;

const NO_ENTRIES: &str =
    "No entries found. The topic may be empty or the site may have blocked the request.";

/// Create the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(health))
        .route("/api/topic/:topic", get(topic_entries))
        .route("/api/scrape-and-summarize", get(scrape_and_summarize))
        .route("/api/scrape.txt", get(scrape_text))
        .route("/api/gundem", get(trending))
}

#[derive(Debug, Error)]
enum ApiError {
    #[error("URL parameter is required")]
    MissingUrl,
    #[error("Invalid Ekşi Sözlük URL format. Expected: https://eksisozluk.com/baslik--12345")]
    InvalidUrl(#[from] TopicError),
    #[error("limit must be a number, got '{0}'")]
    InvalidLimit(String),
    #[error("Failed to scrape topic: {0}")]
    Scrape(#[from] ScrapeError),
    #[error("Failed to fetch trending topics: {0}")]
    Trending(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::MissingUrl | Self::InvalidUrl(_) | Self::InvalidLimit(_) => StatusCode::BAD_REQUEST,
            Self::Scrape(_) | Self::Trending(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn log(&self) {
        if self.status().is_server_error() {
            error!(error = %self, "Request failed");
        }
    }

    fn into_text_response(self) -> Response {
        self.log();
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("Error: {self}\n"),
        )
            .into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();
        (
            self.status(),
            Json(json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn no_entries() -> Response {
    (
        StatusCode::OK,
        Json(json!({ "success": false, "error": NO_ENTRIES, "timestamp": timestamp() })),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
struct TopicInfo {
    slug: String,
    id: u64,
    url: String,
}

impl TopicInfo {
    fn new(topic: TopicRef, base: &Url) -> Self {
        Self {
            slug: topic.slug,
            id: topic.id,
            url: base.to_string(),
        }
    }
}

// ========== JSON API ==========

async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "topic": "/api/topic/{slug}--{id}?limit=50",
            "summarize": "/api/scrape-and-summarize?url=https://eksisozluk.com/baslik--12345",
            "digest": "/api/scrape.txt?url=https://eksisozluk.com/baslik--12345",
            "trending": "/api/gundem",
        },
    }))
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
pub struct TopicParams {
    limit: Option<String>,
}

impl TopicParams {
    /// Parsed `limit`; blank counts as absent.
    fn limit(&self) -> Result<Option<usize>, ApiError> {
        match self.limit.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| ApiError::InvalidLimit(raw.to_string())),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TopicResponse {
    success: bool,
    topic: TopicInfo,
    entries: Vec<Entry>,
    count: usize,
    pages: u32,
    timestamp: String,
}

async fn topic_entries(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Query(params): Query<TopicParams>,
) -> Result<Response, ApiError> {
    let topic = TopicRef::parse(&topic)?;
    let base = topic.base_url(&state.config.site_base_url)?;

    let max_limit = (state.config.request_budget as usize * ENTRIES_PER_PAGE).max(MIN_TOPIC_LIMIT);
    let limit = params
        .limit()?
        .unwrap_or(state.config.default_topic_limit)
        .clamp(MIN_TOPIC_LIMIT, max_limit);

    let outcome = state.scraper.scrape(&base, Some(limit)).await?;
    if outcome.entries.is_empty() {
        return Ok(no_entries());
    }

    Ok(Json(TopicResponse {
        success: true,
        topic: TopicInfo::new(topic, &base),
        count: outcome.entries.len(),
        pages: outcome.pages_scraped,
        entries: outcome.entries,
        timestamp: timestamp(),
    })
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct UrlParams {
    url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResponse {
    success: bool,
    topic: TopicInfo,
    pages: u32,
    pages_scraped: u32,
    truncated: bool,
    entry_count: usize,
    summary: String,
    summary_source: SummarySource,
    entries: Vec<Entry>,
    timestamp: String,
}

async fn scrape_requested(
    state: &AppState,
    params: UrlParams,
) -> Result<(TopicRef, Url, ScrapeOutcome), ApiError> {
    let url = params
        .url
        .filter(|url| !url.trim().is_empty())
        .ok_or(ApiError::MissingUrl)?;
    let (topic, base) = resolve_topic_url(&url, &state.config.site_base_url)?;
    let outcome = state.scraper.scrape(&base, None).await?;
    Ok((topic, base, outcome))
}

async fn scrape_and_summarize(
    State(state): State<AppState>,
    Query(params): Query<UrlParams>,
) -> Result<Response, ApiError> {
    let (topic, base, outcome) = scrape_requested(&state, params).await?;
    if outcome.entries.is_empty() {
        return Ok(no_entries());
    }

    let summary = state.summarizer.summarize(&outcome.entries).await;
    let sample = outcome
        .entries
        .iter()
        .take(state.config.sample_entries)
        .cloned()
        .collect();

    Ok(Json(SummaryResponse {
        success: true,
        topic: TopicInfo::new(topic, &base),
        pages: outcome.last_page,
        pages_scraped: outcome.pages_scraped,
        truncated: outcome.truncated,
        entry_count: outcome.entries.len(),
        summary: summary.text,
        summary_source: summary.source,
        entries: sample,
        timestamp: timestamp(),
    })
    .into_response())
}

async fn trending(State(state): State<AppState>) -> Result<Response, ApiError> {
    let topics: Vec<TrendingTopic> =
        fetch_trending(state.source.as_ref(), &state.config.site_base_url)
            .await
            .map_err(|e| ApiError::Trending(format!("{e:#}")))?;

    Ok(Json(json!({
        "success": true,
        "count": topics.len(),
        "topics": topics,
        "timestamp": timestamp(),
    }))
    .into_response())
}

// ========== Plain text ==========

/// Bullet list of entries; continuation lines are indented under their bullet.
#[must_use]
pub fn format_digest(entries: &[Entry]) -> String {
    if entries.is_empty() {
        return format!("{NO_ENTRIES}\n");
    }
    let mut digest = entries
        .iter()
        .map(|entry| format!("• {}", entry.content.replace('\n', "\n  ")))
        .collect::<Vec<_>>()
        .join("\n\n");
    digest.push('\n');
    digest
}

async fn scrape_text(State(state): State<AppState>, Query(params): Query<UrlParams>) -> Response {
    match scrape_requested(&state, params).await {
        Ok((_, _, outcome)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            format_digest(&outcome.entries),
        )
            .into_response(),
        Err(e) => e.into_text_response(),
    }
}
