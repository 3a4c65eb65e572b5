//! Fetch client, persistence and cache collaborators for the job board mirror.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE};
use thiserror::Error;
use tracing::{info_span, Instrument};

pub mod cache;
pub mod postgres;
pub mod store;

pub use cache::{CachePolicy, CacheState, ResponseCache};
pub use postgres::PgJobStore;
pub use store::{JobStore, MemoryJobStore, StoreError};

pub const CRATE_NAME: &str = "cbj-storage";

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
pub const SCRAPER_USER_AGENT: &str =
    "cbj-scraper/0.1 (culture.be job board mirror)";
pub const SCRAPER_ACCEPT_LANGUAGE: &str = "fr-BE,fr;q=0.9,en;q=0.5";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub accept_language: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: FETCH_TIMEOUT,
            user_agent: SCRAPER_USER_AGENT.to_string(),
            accept_language: SCRAPER_ACCEPT_LANGUAGE.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} aborted after {timeout_ms}ms")]
    Aborted { url: String, timeout_ms: u128 },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl FetchError {
    /// Short cause string: the HTTP status, `aborted`, or `request`.
    pub fn cause(&self) -> String {
        match self {
            FetchError::Aborted { .. } => "aborted".to_string(),
            FetchError::HttpStatus { status, .. } => status.to_string(),
            FetchError::Request(_) => "request".to_string(),
        }
    }
}

/// Transport seam used by adapters: one GET, body as text.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;
}

/// Time-bounded fetcher. No retries happen at this layer.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language).context("accept-language header")?,
        );

        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .context("building reqwest client")?;

        Ok(Self {
            client,
            timeout: config.timeout,
        })
    }

    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let span = info_span!("http_fetch", url);
        // Dropping the request future on timeout cancels only this request.
        match tokio::time::timeout(self.timeout, self.get_text(url).instrument(span)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Aborted {
                url: url.to_string(),
                timeout_ms: self.timeout.as_millis(),
            }),
        }
    }
}
