//! Source adapter contract plus the culture.be adapter and its parsers.

use async_trait::async_trait;
use cbj_core::{ListingStub, ParsedDetail};
use cbj_storage::{FetchError, PageFetcher};
use serde::Serialize;
use thiserror::Error;

pub mod culture_be;
pub mod detail;
pub mod listing;
pub mod resolve;
pub mod sanitize;

pub use culture_be::CultureBeAdapter;
pub use sanitize::sanitize;

pub const CRATE_NAME: &str = "cbj-adapters";

/// One parsed listing page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    pub stubs: Vec<ListingStub>,
    pub total_pages: u32,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid source url: {0}")]
    Url(#[from] url::ParseError),
    #[error("{0}")]
    Message(String),
}

/// Everything the orchestrator needs from one upstream job board.
///
/// Parsing is synchronous and infallible: format drift degrades to missing
/// rows or unresolved fields. Only transport failures surface as errors.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;

    fn listing_url(&self, page: u32) -> String;

    fn parse_listing(&self, html: &str, page: u32) -> ListingPage;

    fn parse_detail(&self, html: &str) -> ParsedDetail;

    /// Fetch and parse one listing page. The total is clamped to at least `page`.
    async fn fetch_listing_page(
        &self,
        http: &dyn PageFetcher,
        page: u32,
    ) -> Result<ListingPage, AdapterError> {
        let html = http.fetch_text(&self.listing_url(page)).await?;
        let mut parsed = self.parse_listing(&html, page);
        parsed.total_pages = parsed.total_pages.max(page);
        Ok(parsed)
    }

    async fn fetch_detail(
        &self,
        http: &dyn PageFetcher,
        stub: &ListingStub,
    ) -> Result<ParsedDetail, AdapterError> {
        let html = http.fetch_text(&stub.source_url).await?;
        Ok(self.parse_detail(&html))
    }
}
