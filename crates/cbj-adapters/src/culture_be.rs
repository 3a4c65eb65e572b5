use async_trait::async_trait;
use cbj_core::ParsedDetail;
use tracing::debug;
use url::Url;

use crate::detail::parse_detail_document;
use crate::listing::{parse_listing_page, ListingContext};
use crate::resolve::resolve_detail;
use crate::{AdapterError, ListingPage, SourceAdapter};

pub const SOURCE_ID: &str = "culture-be";
pub const DEFAULT_ORIGIN: &str = "https://www.culture.be";
pub const DEFAULT_LISTING_PATH: &str = "/emploi/offres/";

/// Adapter for the culture.be job board.
#[derive(Debug, Clone)]
pub struct CultureBeAdapter {
    origin: Url,
    listing_path: String,
    listing_base: Url,
}

impl CultureBeAdapter {
    pub fn new(origin: &str, listing_path: &str) -> Result<Self, AdapterError> {
        let origin = Url::parse(origin)?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(AdapterError::Message(format!(
                "origin {origin} must be http or https"
            )));
        }
        let listing_base = origin.join(listing_path)?;
        Ok(Self {
            origin,
            listing_path: listing_path.to_string(),
            listing_base,
        })
    }

    pub fn with_defaults() -> Result<Self, AdapterError> {
        Self::new(DEFAULT_ORIGIN, DEFAULT_LISTING_PATH)
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }
}

#[async_trait]
impl SourceAdapter for CultureBeAdapter {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn listing_url(&self, page: u32) -> String {
        let mut url = self.listing_base.clone();
        url.query_pairs_mut().append_pair("page", &page.to_string());
        url.to_string()
    }

    fn parse_listing(&self, html: &str, page: u32) -> ListingPage {
        let listing_url = self.listing_url(page);
        let ctx = ListingContext {
            origin: &self.origin,
            listing_path: &self.listing_path,
            listing_url: &listing_url,
        };
        let parsed = parse_listing_page(html, &ctx);
        debug!(page, rows = parsed.stubs.len(), total_pages = parsed.total_pages, "parsed listing page");
        parsed
    }

    fn parse_detail(&self, html: &str) -> ParsedDetail {
        let document = parse_detail_document(html);
        if document.is_empty() {
            debug!("detail page has no recognizable content");
        }
        resolve_detail(&document)
    }
}
