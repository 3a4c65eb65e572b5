//! Sync orchestration for the job board mirror.

use std::sync::Arc;

use anyhow::{Context, Result};
use cbj_core::SyncSummary;
use cbj_storage::PgJobStore;

pub mod config;
pub mod logger;
pub mod pipeline;
pub mod pool;
pub mod scheduler;

pub use config::SyncConfig;
pub use logger::{NoopStepLogger, StepLogger, TracingStepLogger};
pub use pipeline::{dedup_last_wins, plan_sync, SyncError, SyncPipeline, SyncPlan};
pub use pool::{run_bounded, DETAIL_CONCURRENCY};
pub use scheduler::{maybe_build_scheduler, run_guarded, NoopSyncListener, SyncListener};

pub const CRATE_NAME: &str = "cbj-sync";

/// One sync run against the configured Postgres store.
pub async fn run_sync_once_from_env() -> Result<SyncSummary> {
    let config = SyncConfig::from_env();
    let store = PgJobStore::connect(&config.database_url)
        .await
        .context("connecting to DATABASE_URL")?;
    store.migrate().await.context("applying migrations")?;
    let pipeline = SyncPipeline::from_config(&config, Arc::new(store))?;
    Ok(pipeline.run_once().await?)
}
