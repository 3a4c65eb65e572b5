//! Core domain model for the culture.be job board mirror.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod text;
pub mod validate;

pub use validate::{validate_job, validate_stub, ValidationError};

pub const CRATE_NAME: &str = "cbj-core";

/// Upstream identifier of a posting, taken from the `uid` query parameter.
pub type Uid = i64;

/// `section -> label -> value` grouping kept verbatim from a detail page.
pub type RawDetails = BTreeMap<String, BTreeMap<String, String>>;

/// Coarse category of an opportunity as labelled on the listing page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostingType {
    Emploi,
    Stage,
    Benevolat,
    Autre,
}

impl PostingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostingType::Emploi => "EMPLOI",
            PostingType::Stage => "STAGE",
            PostingType::Benevolat => "BENEVOLAT",
            PostingType::Autre => "AUTRE",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "EMPLOI" => Some(PostingType::Emploi),
            "STAGE" => Some(PostingType::Stage),
            "BENEVOLAT" => Some(PostingType::Benevolat),
            "AUTRE" => Some(PostingType::Autre),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractType {
    Cdd,
    Cdi,
    Autre,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::Cdd => "CDD",
            ContractType::Cdi => "CDI",
            ContractType::Autre => "AUTRE",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "CDD" => Some(ContractType::Cdd),
            "CDI" => Some(ContractType::Cdi),
            "AUTRE" => Some(ContractType::Autre),
            _ => None,
        }
    }
}

/// One row of a listing page. Lives only for the duration of a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingStub {
    pub uid: Uid,
    pub source_url: String,
    pub listing_url: String,
    pub title: String,
    pub organization: String,
    pub publication_date: DateTime<Utc>,
    pub publication_date_raw: String,
    pub posting_type: PostingType,
    pub contract_label: Option<String>,
    pub contract_types: Vec<ContractType>,
}

/// A `(section, label, value)` triple read from a detail page.
///
/// `value` is always sanitized HTML or an escaped `<p>` paragraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailField {
    pub section: String,
    pub label: String,
    pub value: String,
}

/// Logical fields resolved from a detail page.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedDetail {
    pub location: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub deadline_raw: Option<String>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub contract_details: Option<String>,
    pub regime: Option<String>,
    pub application_instructions: Option<String>,
    pub documents_required: Option<String>,
    pub comments: Option<String>,
    pub employer_description: Option<String>,
    pub employer_sectors: Option<String>,
    pub contact_details: Option<String>,
    pub more_info: Option<String>,
    pub raw_details: Option<serde_json::Value>,
}

/// Persisted job posting. `(source, uid)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub source: String,
    pub uid: Uid,
    pub source_url: String,
    pub listing_url: String,
    pub title: String,
    pub organization: String,
    pub publication_date: DateTime<Utc>,
    pub publication_date_raw: String,
    pub posting_type: PostingType,
    pub contract_label: Option<String>,
    #[serde(default)]
    pub contract_types: Vec<ContractType>,
    pub location: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub deadline_raw: Option<String>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub contract_details: Option<String>,
    pub regime: Option<String>,
    pub application_instructions: Option<String>,
    pub documents_required: Option<String>,
    pub comments: Option<String>,
    pub employer_description: Option<String>,
    pub employer_sectors: Option<String>,
    pub contact_details: Option<String>,
    pub more_info: Option<String>,
    pub raw_details: Option<serde_json::Value>,
    pub scraped_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Job {
    /// Assemble a fresh record from a listing row and its resolved detail.
    pub fn from_parts(
        source: &str,
        stub: ListingStub,
        detail: ParsedDetail,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            source: source.to_string(),
            uid: stub.uid,
            source_url: stub.source_url,
            listing_url: stub.listing_url,
            title: stub.title,
            organization: stub.organization,
            publication_date: stub.publication_date,
            publication_date_raw: stub.publication_date_raw,
            posting_type: stub.posting_type,
            contract_label: stub.contract_label,
            contract_types: stub.contract_types,
            location: detail.location,
            deadline: detail.deadline,
            deadline_raw: detail.deadline_raw,
            description: detail.description,
            requirements: detail.requirements,
            contract_details: detail.contract_details,
            regime: detail.regime,
            application_instructions: detail.application_instructions,
            documents_required: detail.documents_required,
            comments: detail.comments,
            employer_description: detail.employer_description,
            employer_sectors: detail.employer_sectors,
            contact_details: detail.contact_details,
            more_info: detail.more_info,
            raw_details: detail.raw_details,
            scraped_at: now,
            last_updated: now,
        }
    }
}

/// Ordering used by every listing surface: newest publication first, then uid desc.
pub fn sort_jobs_for_display(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| {
        b.publication_date
            .cmp(&a.publication_date)
            .then_with(|| b.uid.cmp(&a.uid))
    });
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub source: String,
    pub last_synced_at: DateTime<Utc>,
}

/// Counts reported back to whoever triggered a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub run_id: Uuid,
    pub source: String,
    pub scanned: usize,
    pub existing: usize,
    pub new_found: usize,
    pub inserted: usize,
    pub removed: usize,
    pub removed_uids: Vec<Uid>,
    pub failed: usize,
    pub failed_uids: Vec<Uid>,
    pub synced_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stub(uid: Uid, day: u32) -> ListingStub {
        ListingStub {
            uid,
            source_url: format!("https://www.culture.be/offre?uid={uid}"),
            listing_url: "https://www.culture.be/offres?page=1".into(),
            title: format!("Poste {uid}"),
            organization: "Théâtre National".into(),
            publication_date: Utc.with_ymd_and_hms(2026, 3, day, 0, 0, 0).unwrap(),
            publication_date_raw: format!("{day:02}-03-2026"),
            posting_type: PostingType::Emploi,
            contract_label: Some("CDD".into()),
            contract_types: vec![ContractType::Cdd],
        }
    }

    #[test]
    fn job_from_parts_sets_both_timestamps() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 8, 30, 0).unwrap();
        let detail = ParsedDetail {
            location: Some("Bruxelles".into()),
            ..ParsedDetail::default()
        };
        let job = Job::from_parts("culture-be", stub(7, 2), detail, now);
        assert_eq!(job.source, "culture-be");
        assert_eq!(job.uid, 7);
        assert_eq!(job.location.as_deref(), Some("Bruxelles"));
        assert_eq!(job.scraped_at, now);
        assert_eq!(job.last_updated, now);
        assert_eq!(job.contract_types, vec![ContractType::Cdd]);
    }

    #[test]
    fn display_sort_is_date_desc_then_uid_desc() {
        let now = Utc::now();
        let mut jobs = vec![
            Job::from_parts("s", stub(1, 2), ParsedDetail::default(), now),
            Job::from_parts("s", stub(3, 1), ParsedDetail::default(), now),
            Job::from_parts("s", stub(2, 2), ParsedDetail::default(), now),
        ];
        sort_jobs_for_display(&mut jobs);
        let uids: Vec<_> = jobs.iter().map(|j| j.uid).collect();
        assert_eq!(uids, vec![2, 1, 3]);
    }

    #[test]
    fn enums_round_trip_through_db_strings() {
        for t in [
            PostingType::Emploi,
            PostingType::Stage,
            PostingType::Benevolat,
            PostingType::Autre,
        ] {
            assert_eq!(PostingType::from_db(t.as_str()), Some(t));
        }
        assert_eq!(ContractType::from_db("CDI"), Some(ContractType::Cdi));
        assert_eq!(ContractType::from_db("cdi"), None);
    }

    #[test]
    fn job_serializes_camel_case_with_empty_contract_types() {
        let mut s = stub(5, 4);
        s.contract_types.clear();
        let job = Job::from_parts("culture-be", s, ParsedDetail::default(), Utc::now());
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["postingType"], "EMPLOI");
        assert_eq!(value["contractTypes"], serde_json::json!([]));
        assert!(value["rawDetails"].is_null());
    }
}
