//! Cron-driven sync runs.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use cbj_core::SyncSummary;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::pipeline::SyncPipeline;

/// Notified after every successful scheduled run.
#[async_trait]
pub trait SyncListener: Send + Sync {
    async fn sync_finished(&self, summary: &SyncSummary);
}

pub struct NoopSyncListener;

#[async_trait]
impl SyncListener for NoopSyncListener {
    async fn sync_finished(&self, _summary: &SyncSummary) {}
}

/// Run once unless a previous scheduled run still holds the guard.
pub async fn run_guarded(
    pipeline: &SyncPipeline,
    guard: &Mutex<()>,
    listener: &dyn SyncListener,
) -> Option<SyncSummary> {
    let Ok(_held) = guard.try_lock() else {
        warn!("previous scheduled sync still running; skipping tick");
        return None;
    };
    match pipeline.run_once().await {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                inserted = summary.inserted,
                removed = summary.removed,
                failed = summary.failed,
                "scheduled sync finished"
            );
            listener.sync_finished(&summary).await;
            Some(summary)
        }
        Err(err) => {
            error!(error = %err, "scheduled sync failed");
            None
        }
    }
}

/// `None` when the scheduler is disabled. The caller starts the returned scheduler.
pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    pipeline: Arc<SyncPipeline>,
    listener: Arc<dyn SyncListener>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let guard = Arc::new(Mutex::new(()));
    let cron = config.sync_cron.as_str();
    let job = Job::new_async(cron, move |_uuid, _l| {
        let pipeline = pipeline.clone();
        let guard = guard.clone();
        let listener = listener.clone();
        Box::pin(async move {
            run_guarded(&pipeline, &guard, listener.as_ref()).await;
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
