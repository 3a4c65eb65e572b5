//! Axum JSON API over the persisted job mirror.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cbj_adapters::{AdapterError, SourceAdapter};
use async_trait::async_trait;
use cbj_core::{validate_job, validate_stub, ListingStub, SyncSummary, Uid};
use cbj_storage::{CachePolicy, ResponseCache, StoreError};
use cbj_sync::{SyncError, SyncListener, SyncPipeline};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "cbj-web";

const JOBS_LIST_KEY: &str = "jobs:list";
const SYNC_STATUS_KEY: &str = "sync:status";

fn job_key(uid: Uid) -> String {
    format!("jobs:{uid}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebConfig {
    pub port: u16,
    pub redis_url: Option<String>,
    pub cache_ttl: Duration,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            redis_url: None,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

impl WebConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: lookup("CBJ_WEB_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.port),
            redis_url: lookup("REDIS_URL").filter(|v| !v.trim().is_empty()),
            cache_ttl: lookup("CBJ_CACHE_TTL_SECS")
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
        }
    }
}

pub struct AppState {
    pub pipeline: Arc<SyncPipeline>,
    pub cache: Arc<ResponseCache>,
    pub cache_ttl: Duration,
}

impl AppState {
    pub fn new(pipeline: Arc<SyncPipeline>, cache: Arc<ResponseCache>, cache_ttl: Duration) -> Self {
        Self {
            pipeline,
            cache,
            cache_ttl,
        }
    }

    fn source(&self) -> &'static str {
        self.pipeline.source_id()
    }
}

/// Drops every cached response a finished sync may have made stale.
pub async fn invalidate_after_sync(cache: &ResponseCache, summary: &SyncSummary) {
    cache.invalidate(JOBS_LIST_KEY).await;
    cache.invalidate(SYNC_STATUS_KEY).await;
    for uid in &summary.removed_uids {
        cache.invalidate(&job_key(*uid)).await;
    }
}

/// Scheduler hook running [`invalidate_after_sync`] after cron-triggered runs.
pub struct CacheInvalidator {
    cache: Arc<ResponseCache>,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl SyncListener for CacheInvalidator {
    async fn sync_finished(&self, summary: &SyncSummary) {
        invalidate_after_sync(&self.cache, summary).await;
    }
}

/// Failure shapes exposed to API callers. Internal detail is logged, never returned.
#[derive(Debug)]
pub enum ApiError {
    NotFound,
    BadRequest(&'static str),
    Upstream(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found"),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Upstream(detail) => {
                warn!(error = %detail, "upstream request failed");
                (StatusCode::BAD_GATEWAY, "upstream unavailable")
            }
            ApiError::Internal(detail) => {
                error!(error = %detail, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Listing { .. } => ApiError::Upstream(err.to_string()),
            SyncError::Store(err) => err.into(),
        }
    }
}

impl From<AdapterError> for ApiError {
    fn from(err: AdapterError) -> Self {
        ApiError::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

fn json_body(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/jobs/{uid}", get(get_job_handler))
        .route("/api/sync", post(trigger_sync_handler))
        .route("/api/sync/status", get(sync_status_handler))
        .route("/api/listings/preview", get(listing_preview_handler))
        .with_state(Arc::new(state))
}

pub async fn init_cache(config: &WebConfig) -> Arc<ResponseCache> {
    let cache = ResponseCache::init(config.redis_url.as_deref(), CachePolicy::default()).await;
    info!(state = ?cache.state().await, "response cache initialized");
    Arc::new(cache)
}

/// Bind, serve until ctrl-c, then tear the cache down.
pub async fn serve(
    config: &WebConfig,
    pipeline: Arc<SyncPipeline>,
    cache: Arc<ResponseCache>,
) -> anyhow::Result<()> {
    let state = AppState::new(pipeline, cache.clone(), config.cache_ttl);

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    cache.teardown().await;
    Ok(())
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn list_jobs_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    if let Some(body) = state.cache.get(JOBS_LIST_KEY).await {
        return Ok(json_body(body));
    }

    let jobs = state.pipeline.store().list_jobs(state.source()).await?;
    let total = jobs.len();
    let valid = jobs
        .into_iter()
        .filter(|job| match validate_job(job) {
            Ok(()) => true,
            Err(err) => {
                warn!(uid = job.uid, error = %err, "dropping invalid job from response");
                false
            }
        })
        .collect::<Vec<_>>();
    if valid.len() != total {
        warn!(dropped = total - valid.len(), "some persisted jobs failed validation");
    }

    let body = serde_json::to_string(&valid)?;
    state.cache.set(JOBS_LIST_KEY, &body, state.cache_ttl).await;
    Ok(json_body(body))
}

async fn get_job_handler(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<Uid>,
) -> Result<Response, ApiError> {
    let key = job_key(uid);
    if let Some(body) = state.cache.get(&key).await {
        return Ok(json_body(body));
    }

    let Some(job) = state.pipeline.store().get_job(state.source(), uid).await? else {
        return Err(ApiError::NotFound);
    };
    if let Err(err) = validate_job(&job) {
        warn!(uid, error = %err, "persisted job failed validation");
        return Err(ApiError::NotFound);
    }

    let body = serde_json::to_string(&job)?;
    state.cache.set(&key, &body, state.cache_ttl).await;
    Ok(json_body(body))
}

async fn trigger_sync_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let summary = state.pipeline.run_once().await?;
    invalidate_after_sync(&state.cache, &summary).await;
    Ok(Json(summary).into_response())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncStatus {
    source: &'static str,
    last_synced_at: Option<DateTime<Utc>>,
}

async fn sync_status_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    if let Some(body) = state.cache.get(SYNC_STATUS_KEY).await {
        return Ok(json_body(body));
    }

    let last = state.pipeline.store().sync_state(state.source()).await?;
    let status = SyncStatus {
        source: state.source(),
        last_synced_at: last.map(|s| s.last_synced_at),
    };
    let body = serde_json::to_string(&status)?;
    state.cache.set(SYNC_STATUS_KEY, &body, state.cache_ttl).await;
    Ok(json_body(body))
}

#[derive(Debug, Deserialize)]
struct PreviewQuery {
    page: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListingPreview {
    page: u32,
    total_pages: u32,
    stubs: Vec<ListingStub>,
}

async fn listing_preview_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PreviewQuery>,
) -> Result<Response, ApiError> {
    let page = query.page.unwrap_or(1);
    if page == 0 {
        return Err(ApiError::BadRequest("page must be at least 1"));
    }

    let parsed = state
        .pipeline
        .adapter()
        .fetch_listing_page(state.pipeline.fetcher().as_ref(), page)
        .await?;
    let stubs = parsed
        .stubs
        .into_iter()
        .filter(|stub| match validate_stub(stub) {
            Ok(()) => true,
            Err(err) => {
                warn!(uid = stub.uid, error = %err, "dropping invalid listing row");
                false
            }
        })
        .collect();

    Ok(Json(ListingPreview {
        page,
        total_pages: parsed.total_pages,
        stubs,
    })
    .into_response())
}
