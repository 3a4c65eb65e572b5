//! Persistence contract for jobs and per-source sync state.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use cbj_core::{sort_jobs_for_display, Job, SyncState, Uid};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("unexpected value {value:?} in column {column}")]
    Corrupt { column: &'static str, value: String },
}

/// Store operations used by the sync orchestrator and the serving layer.
///
/// Each call is independent; nothing here spans a transaction across calls.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn list_uids(&self, source: &str) -> Result<HashSet<Uid>, StoreError>;

    /// Inserts in one batch, silently skipping rows whose `(source, uid)` exists.
    /// Returns the number of rows actually inserted.
    async fn insert_jobs(&self, jobs: &[Job]) -> Result<usize, StoreError>;

    async fn delete_jobs(&self, source: &str, uids: &[Uid]) -> Result<usize, StoreError>;

    async fn upsert_sync_state(&self, source: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// All jobs of a source, publication date desc then uid desc.
    async fn list_jobs(&self, source: &str) -> Result<Vec<Job>, StoreError>;

    async fn get_job(&self, source: &str, uid: Uid) -> Result<Option<Job>, StoreError>;

    async fn sync_state(&self, source: &str) -> Result<Option<SyncState>, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    jobs: BTreeMap<(String, Uid), Job>,
    sync: HashMap<String, DateTime<Utc>>,
}

/// In-process store with the same uniqueness rules as the Postgres schema.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn list_uids(&self, source: &str) -> Result<HashSet<Uid>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .keys()
            .filter(|(s, _)| s == source)
            .map(|(_, uid)| *uid)
            .collect())
    }

    async fn insert_jobs(&self, jobs: &[Job]) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let mut inserted = 0;
        for job in jobs {
            let key = (job.source.clone(), job.uid);
            if state.jobs.contains_key(&key) {
                continue;
            }
            state.jobs.insert(key, job.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn delete_jobs(&self, source: &str, uids: &[Uid]) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let removed = uids
            .iter()
            .filter(|uid| state.jobs.remove(&(source.to_string(), **uid)).is_some())
            .count();
        Ok(removed)
    }

    async fn upsert_sync_state(&self, source: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.state.lock().await.sync.insert(source.to_string(), at);
        Ok(())
    }

    async fn list_jobs(&self, source: &str) -> Result<Vec<Job>, StoreError> {
        let state = self.state.lock().await;
        let mut jobs = state
            .jobs
            .values()
            .filter(|job| job.source == source)
            .cloned()
            .collect::<Vec<_>>();
        sort_jobs_for_display(&mut jobs);
        Ok(jobs)
    }

    async fn get_job(&self, source: &str, uid: Uid) -> Result<Option<Job>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&(source.to_string(), uid)).cloned())
    }

    async fn sync_state(&self, source: &str) -> Result<Option<SyncState>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.sync.get(source).map(|at| SyncState {
            source: source.to_string(),
            last_synced_at: *at,
        }))
    }
}
