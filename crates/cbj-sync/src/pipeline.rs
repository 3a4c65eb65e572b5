//! Differential sync of one source against the job store.
//!
//! A run moves through: first listing page, remaining pages in parallel,
//! dedup, diff against persisted uids, bounded detail fetches, insert,
//! delete, sync-state upsert. Any listing failure aborts before the store
//! is touched. Detail failures are recorded per uid and never abort.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cbj_adapters::{AdapterError, CultureBeAdapter, SourceAdapter};
use cbj_core::{Job, ListingStub, SyncSummary, Uid};
use cbj_storage::{HttpClientConfig, HttpFetcher, JobStore, PageFetcher, StoreError};
use chrono::Utc;
use futures::future::try_join_all;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::logger::{NoopStepLogger, StepLogger, TracingStepLogger};
use crate::pool::{run_bounded, DETAIL_CONCURRENCY};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("listing page {page} failed: {source}")]
    Listing {
        page: u32,
        #[source]
        source: AdapterError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Keep one stub per uid. A later duplicate replaces the earlier one in place.
pub fn dedup_last_wins(stubs: Vec<ListingStub>) -> Vec<ListingStub> {
    let mut slot_of: HashMap<Uid, usize> = HashMap::with_capacity(stubs.len());
    let mut out: Vec<ListingStub> = Vec::with_capacity(stubs.len());
    for stub in stubs {
        match slot_of.get(&stub.uid) {
            Some(&slot) => out[slot] = stub,
            None => {
                slot_of.insert(stub.uid, out.len());
                out.push(stub);
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncPlan {
    pub scanned: usize,
    pub existing_uids: Vec<Uid>,
    pub new_listings: Vec<ListingStub>,
    /// Always empty when the scan was empty.
    pub removed_uids: Vec<Uid>,
}

pub fn plan_sync(scanned: Vec<ListingStub>, persisted: &HashSet<Uid>) -> SyncPlan {
    let scanned_uids: HashSet<Uid> = scanned.iter().map(|s| s.uid).collect();

    let mut existing_uids: Vec<Uid> = scanned_uids.intersection(persisted).copied().collect();
    existing_uids.sort_unstable();

    let mut removed_uids: Vec<Uid> = if scanned_uids.is_empty() {
        Vec::new()
    } else {
        persisted.difference(&scanned_uids).copied().collect()
    };
    removed_uids.sort_unstable();

    let count = scanned.len();
    let new_listings = scanned
        .into_iter()
        .filter(|stub| !persisted.contains(&stub.uid))
        .collect();

    SyncPlan {
        scanned: count,
        existing_uids,
        new_listings,
        removed_uids,
    }
}

pub struct SyncPipeline {
    adapter: Arc<dyn SourceAdapter>,
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn JobStore>,
    logger: Arc<dyn StepLogger>,
    detail_concurrency: usize,
}

impl SyncPipeline {
    pub fn new(
        adapter: Arc<dyn SourceAdapter>,
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            adapter,
            fetcher,
            store,
            logger: Arc::new(NoopStepLogger),
            detail_concurrency: DETAIL_CONCURRENCY,
        }
    }

    /// culture.be adapter over the real HTTP client, logging through `tracing`.
    pub fn from_config(config: &SyncConfig, store: Arc<dyn JobStore>) -> anyhow::Result<Self> {
        let adapter = CultureBeAdapter::new(&config.source_origin, &config.listing_path)?;
        let fetcher = HttpFetcher::new(HttpClientConfig::default())?;
        Ok(Self::new(Arc::new(adapter), Arc::new(fetcher), store)
            .with_logger(Arc::new(TracingStepLogger)))
    }

    pub fn with_logger(mut self, logger: Arc<dyn StepLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn source_id(&self) -> &'static str {
        self.adapter.source_id()
    }

    pub fn adapter(&self) -> &Arc<dyn SourceAdapter> {
        &self.adapter
    }

    pub fn fetcher(&self) -> &Arc<dyn PageFetcher> {
        &self.fetcher
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Every listing row across all pages, deduplicated by uid.
    pub async fn scan_listing(&self) -> Result<Vec<ListingStub>, SyncError> {
        let adapter = self.adapter.as_ref();
        let fetcher = self.fetcher.as_ref();
        let fetch_page = move |page: u32| async move {
            adapter
                .fetch_listing_page(fetcher, page)
                .await
                .map_err(|source| SyncError::Listing { page, source })
        };

        let first = fetch_page(1).await?;
        let total_pages = first.total_pages.max(1);
        let rest = try_join_all((2..=total_pages).map(fetch_page)).await?;

        let rows = std::iter::once(first)
            .chain(rest)
            .flat_map(|page| page.stubs)
            .collect::<Vec<_>>();
        let raw_rows = rows.len();
        let stubs = dedup_last_wins(rows);
        self.logger.info(
            "listing scanned",
            &json!({ "pages": total_pages, "rows": raw_rows, "unique": stubs.len() }),
        );
        Ok(stubs)
    }

    pub async fn run_once(&self) -> Result<SyncSummary, SyncError> {
        let run_id = Uuid::new_v4();
        let source = self.adapter.source_id();
        self.logger
            .info("sync started", &json!({ "runId": run_id, "source": source }));

        let scanned = match self.scan_listing().await {
            Ok(scanned) => scanned,
            Err(err) => {
                self.logger.error(
                    "listing scan failed; nothing persisted",
                    &json!({ "runId": run_id, "error": err.to_string() }),
                );
                return Err(err);
            }
        };

        let persisted = self.store.list_uids(source).await?;
        let plan = plan_sync(scanned, &persisted);
        if plan.scanned == 0 {
            self.logger.warn(
                "listing scan returned no rows; skipping removals",
                &json!({ "runId": run_id, "persisted": persisted.len() }),
            );
        }
        self.logger.info(
            "diff computed",
            &json!({
                "runId": run_id,
                "existing": plan.existing_uids.len(),
                "new": plan.new_listings.len(),
                "removed": plan.removed_uids.len(),
            }),
        );

        let adapter = self.adapter.as_ref();
        let fetcher = self.fetcher.as_ref();
        let outcomes = run_bounded(&plan.new_listings, self.detail_concurrency, move |_, stub| async move {
            adapter.fetch_detail(fetcher, stub).await
        })
        .await;

        let now = Utc::now();
        let new_found = plan.new_listings.len();
        let mut jobs = Vec::with_capacity(new_found);
        let mut failed_uids = Vec::new();
        for (stub, outcome) in plan.new_listings.into_iter().zip(outcomes) {
            match outcome {
                Ok(detail) => jobs.push(Job::from_parts(source, stub, detail, now)),
                Err(err) => {
                    let cause = match &err {
                        AdapterError::Fetch(fetch) => fetch.cause(),
                        _ => "parse".to_string(),
                    };
                    self.logger.warn(
                        "detail fetch failed",
                        &json!({
                            "runId": run_id,
                            "uid": stub.uid,
                            "url": stub.source_url,
                            "cause": cause,
                            "error": err.to_string(),
                        }),
                    );
                    failed_uids.push(stub.uid);
                }
            }
        }

        let inserted = self.store.insert_jobs(&jobs).await?;
        let removed = self.store.delete_jobs(source, &plan.removed_uids).await?;
        let synced_at = Utc::now();
        self.store.upsert_sync_state(source, synced_at).await?;

        let summary = SyncSummary {
            run_id,
            source: source.to_string(),
            scanned: plan.scanned,
            existing: plan.existing_uids.len(),
            new_found,
            inserted,
            removed,
            removed_uids: plan.removed_uids,
            failed: failed_uids.len(),
            failed_uids,
            synced_at,
        };
        self.logger.info(
            "sync finished",
            &json!({
                "runId": run_id,
                "scanned": summary.scanned,
                "inserted": summary.inserted,
                "removed": summary.removed,
                "failed": summary.failed,
            }),
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cbj_core::{ParsedDetail, PostingType};
    use cbj_storage::{FetchError, MemoryJobStore};
    use chrono::TimeZone;
    use serde_json::Value;
    use std::sync::Mutex;

    const DETAIL_HTML: &str = r#"<html><body><div id="offre-detail">
        <h2 class="section-header">Fonction</h2>
        <div class="field"><div class="field-label">Lieu :</div><div class="field-value">Mons</div></div>
        </div></body></html>"#;

    fn listing_html(rows: &[(Uid, &str)], page: u32, total: u32) -> String {
        let body = rows
            .iter()
            .enumerate()
            .map(|(i, (uid, title))| {
                let class = if i % 2 == 0 { "ligne_paire" } else { "ligne_impaire" };
                format!(
                    r#"<tr class="{class}"><td class="date">01-03-2026</td><td class="titre"><a href="/emploi/offre/?uid={uid}">{title}</a></td><td class="employeur">Musée</td><td class="type">Emploi</td><td class="contrat">CDI</td></tr>"#
                )
            })
            .collect::<String>();
        format!(
            r#"<html><body><table><tbody>{body}</tbody><tfoot><tr><td class="pagination">Page {page} / {total}</td></tr></tfoot></table></body></html>"#
        )
    }

    fn detail_url(uid: Uid) -> String {
        format!("https://www.culture.be/emploi/offre/?uid={uid}")
    }

    #[derive(Default)]
    struct ScriptedFetcher {
        responses: HashMap<String, Result<String, u16>>,
    }

    impl ScriptedFetcher {
        fn page(mut self, adapter: &CultureBeAdapter, page: u32, html: String) -> Self {
            self.responses.insert(adapter.listing_url(page), Ok(html));
            self
        }

        fn details(mut self, uids: impl IntoIterator<Item = Uid>) -> Self {
            for uid in uids {
                self.responses.insert(detail_url(uid), Ok(DETAIL_HTML.to_string()));
            }
            self
        }

        fn failing(mut self, url: String, status: u16) -> Self {
            self.responses.insert(url, Err(status));
            self
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
            match self.responses.get(url) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(status)) => Err(FetchError::HttpStatus {
                    status: *status,
                    url: url.to_string(),
                }),
                None => Err(FetchError::HttpStatus {
                    status: 404,
                    url: url.to_string(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct RecordingLogger {
        warnings: Mutex<Vec<String>>,
    }

    impl StepLogger for RecordingLogger {
        fn info(&self, _message: &str, _context: &Value) {}
        fn warn(&self, message: &str, _context: &Value) {
            self.warnings.lock().unwrap().push(message.to_string());
        }
        fn error(&self, _message: &str, _context: &Value) {}
    }

    fn adapter() -> CultureBeAdapter {
        CultureBeAdapter::with_defaults().unwrap()
    }

    fn pipeline(fetcher: ScriptedFetcher, store: Arc<MemoryJobStore>) -> SyncPipeline {
        SyncPipeline::new(Arc::new(adapter()), Arc::new(fetcher), store)
    }

    fn seeded_job(uid: Uid) -> Job {
        let stub = ListingStub {
            uid,
            source_url: detail_url(uid),
            listing_url: "https://www.culture.be/emploi/offres/?page=1".into(),
            title: format!("Ancienne offre {uid}"),
            organization: "Musée".into(),
            publication_date: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            publication_date_raw: "01-01-2026".into(),
            posting_type: PostingType::Emploi,
            contract_label: None,
            contract_types: vec![],
        };
        Job::from_parts("culture-be", stub, ParsedDetail::default(), Utc::now())
    }

    #[test]
    fn dedup_keeps_last_occurrence() {
        let a = adapter();
        let first = a.parse_listing(&listing_html(&[(1, "A"), (2, "X")], 1, 2), 1).stubs;
        let second = a.parse_listing(&listing_html(&[(1, "B")], 2, 2), 2).stubs;
        let merged = dedup_last_wins(first.into_iter().chain(second).collect());
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].uid, 1);
        assert_eq!(merged[0].title, "B");
        assert_eq!(merged[1].uid, 2);
    }

    #[test]
    fn empty_scan_never_plans_removals() {
        let persisted = HashSet::from([1, 2, 3]);
        let plan = plan_sync(Vec::new(), &persisted);
        assert!(plan.removed_uids.is_empty());
        assert!(plan.new_listings.is_empty());
    }

    #[tokio::test]
    async fn second_run_over_unchanged_listing_is_a_no_op() {
        let a = adapter();
        let fetcher = ScriptedFetcher::default()
            .page(&a, 1, listing_html(&[(1, "Un"), (2, "Deux")], 1, 2))
            .page(&a, 2, listing_html(&[(3, "Trois")], 2, 2))
            .details([1, 2, 3]);
        let store = Arc::new(MemoryJobStore::new());
        let pipeline = pipeline(fetcher, store.clone());

        let first = pipeline.run_once().await.unwrap();
        assert_eq!((first.scanned, first.new_found, first.inserted), (3, 3, 3));
        assert_eq!(first.source, "culture-be");
        let before = store.list_jobs("culture-be").await.unwrap();
        assert_eq!(before[0].location.as_deref(), Some("Mons"));

        let second = pipeline.run_once().await.unwrap();
        assert_eq!(second.existing, 3);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.removed, 0);
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(store.list_jobs("culture-be").await.unwrap(), before);
    }

    #[tokio::test]
    async fn duplicate_rows_across_pages_persist_the_last_title() {
        let a = adapter();
        let fetcher = ScriptedFetcher::default()
            .page(&a, 1, listing_html(&[(1, "A")], 1, 2))
            .page(&a, 2, listing_html(&[(1, "B")], 2, 2))
            .details([1]);
        let store = Arc::new(MemoryJobStore::new());
        let summary = pipeline(fetcher, store.clone()).run_once().await.unwrap();

        assert_eq!(summary.scanned, 1);
        let job = store.get_job("culture-be", 1).await.unwrap().unwrap();
        assert_eq!(job.title, "B");
    }

    #[tokio::test]
    async fn empty_scan_keeps_persisted_jobs_and_warns() {
        let a = adapter();
        let store = Arc::new(MemoryJobStore::new());
        store.insert_jobs(&[seeded_job(7), seeded_job(8)]).await.unwrap();
        let fetcher = ScriptedFetcher::default().page(&a, 1, listing_html(&[], 1, 1));
        let logger = Arc::new(RecordingLogger::default());

        let summary = pipeline(fetcher, store.clone())
            .with_logger(logger.clone())
            .run_once()
            .await
            .unwrap();

        assert_eq!(summary.removed, 0);
        assert!(summary.removed_uids.is_empty());
        assert_eq!(store.len().await, 2);
        assert!(logger
            .warnings
            .lock()
            .unwrap()
            .iter()
            .any(|w| w.contains("no rows")));
        assert!(store.sync_state("culture-be").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn vanished_uids_are_deleted() {
        let a = adapter();
        let store = Arc::new(MemoryJobStore::new());
        store
            .insert_jobs(&[seeded_job(1), seeded_job(2), seeded_job(9)])
            .await
            .unwrap();
        let fetcher = ScriptedFetcher::default().page(&a, 1, listing_html(&[(1, "Un"), (2, "Deux")], 1, 1));

        let summary = pipeline(fetcher, store.clone()).run_once().await.unwrap();
        assert_eq!(summary.removed_uids, vec![9]);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.new_found, 0);
        assert_eq!(store.list_uids("culture-be").await.unwrap(), HashSet::from([1, 2]));
    }

    #[tokio::test]
    async fn failing_details_are_isolated_per_uid() {
        let a = adapter();
        let rows: Vec<(Uid, String)> = (1..=10).map(|uid| (uid, format!("Offre {uid}"))).collect();
        let rows: Vec<(Uid, &str)> = rows.iter().map(|(uid, t)| (*uid, t.as_str())).collect();
        let fetcher = ScriptedFetcher::default()
            .page(&a, 1, listing_html(&rows, 1, 1))
            .details((1..=10).filter(|uid| *uid != 3 && *uid != 7))
            .failing(detail_url(3), 500)
            .failing(detail_url(7), 502);
        let store = Arc::new(MemoryJobStore::new());
        let logger = Arc::new(RecordingLogger::default());

        let summary = pipeline(fetcher, store.clone())
            .with_logger(logger.clone())
            .run_once()
            .await
            .unwrap();

        assert_eq!(summary.inserted, 8);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.failed_uids, vec![3, 7]);
        assert_eq!(logger.warnings.lock().unwrap().len(), 2);
        let state = store.sync_state("culture-be").await.unwrap().unwrap();
        assert_eq!(state.last_synced_at, summary.synced_at);
    }

    #[tokio::test]
    async fn listing_failure_aborts_without_persisting() {
        let a = adapter();
        let fetcher = ScriptedFetcher::default()
            .page(&a, 1, listing_html(&[(1, "Un")], 1, 2))
            .failing(a.listing_url(2), 503)
            .details([1]);
        let store = Arc::new(MemoryJobStore::new());

        let err = pipeline(fetcher, store.clone()).run_once().await.unwrap_err();
        assert!(matches!(err, SyncError::Listing { page: 2, .. }));
        assert!(store.is_empty().await);
        assert!(store.sync_state("culture-be").await.unwrap().is_none());
    }
}
