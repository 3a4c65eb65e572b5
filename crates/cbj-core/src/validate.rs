//! Boundary validation for records handed to external callers.

use thiserror::Error;

use crate::text::parse_dmy_date;
use crate::{Job, ListingStub};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

fn check_uid(uid: i64) -> Result<(), ValidationError> {
    if uid <= 0 {
        return Err(ValidationError::new("uid", format!("{uid} is not positive")));
    }
    Ok(())
}

fn check_http_url(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.starts_with("https://") || value.starts_with("http://") {
        Ok(())
    } else {
        Err(ValidationError::new(field, format!("{value:?} is not an http(s) url")))
    }
}

fn check_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::new(field, "must not be empty"))
    } else {
        Ok(())
    }
}

fn check_raw_date(raw: &str) -> Result<(), ValidationError> {
    if parse_dmy_date(raw).is_none() {
        return Err(ValidationError::new(
            "publicationDateRaw",
            format!("{raw:?} is not DD-MM-YYYY"),
        ));
    }
    Ok(())
}

fn check_unique<T: PartialEq>(field: &'static str, values: &[T]) -> Result<(), ValidationError> {
    for (i, v) in values.iter().enumerate() {
        if values[..i].contains(v) {
            return Err(ValidationError::new(field, "contains duplicates"));
        }
    }
    Ok(())
}

pub fn validate_stub(stub: &ListingStub) -> Result<(), ValidationError> {
    check_uid(stub.uid)?;
    check_http_url("sourceUrl", &stub.source_url)?;
    check_http_url("listingUrl", &stub.listing_url)?;
    check_non_empty("title", &stub.title)?;
    check_raw_date(&stub.publication_date_raw)?;
    check_unique("contractTypes", &stub.contract_types)
}

pub fn validate_job(job: &Job) -> Result<(), ValidationError> {
    check_non_empty("source", &job.source)?;
    check_uid(job.uid)?;
    check_http_url("sourceUrl", &job.source_url)?;
    check_http_url("listingUrl", &job.listing_url)?;
    check_non_empty("title", &job.title)?;
    check_raw_date(&job.publication_date_raw)?;
    check_unique("contractTypes", &job.contract_types)?;
    if job.deadline.is_some() && job.deadline_raw.is_none() {
        return Err(ValidationError::new("deadlineRaw", "missing for a parsed deadline"));
    }
    if job.last_updated < job.scraped_at {
        return Err(ValidationError::new("lastUpdated", "precedes scrapedAt"));
    }
    Ok(())
}
