use std::sync::Arc;

use anyhow::{Context, Result};
use cbj_adapters::SourceAdapter;
use cbj_core::{validate_stub, Uid};
use cbj_storage::{JobStore, MemoryJobStore, PgJobStore};
use cbj_sync::{maybe_build_scheduler, SyncConfig, SyncPipeline};
use cbj_web::{CacheInvalidator, WebConfig};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cbj-cli")]
#[command(about = "culture.be job board mirror")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync and print the summary.
    Sync {
        /// Sync into a throwaway in-memory store instead of Postgres.
        #[arg(long)]
        memory: bool,
    },
    Migrate,
    /// Serve the JSON API, plus the scheduler when enabled.
    Serve,
    /// Print every persisted job in display order.
    Jobs,
    Show {
        uid: Uid,
    },
    /// Fetch and print one listing page without touching the store.
    Preview {
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
}

async fn connect_store(config: &SyncConfig) -> Result<PgJobStore> {
    let store = PgJobStore::connect(&config.database_url)
        .await
        .context("connecting to DATABASE_URL")?;
    store.migrate().await.context("applying migrations")?;
    Ok(store)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync { memory: false }) {
        Commands::Sync { memory } => {
            let store: Arc<dyn JobStore> = if memory {
                Arc::new(MemoryJobStore::new())
            } else {
                Arc::new(connect_store(&config).await?)
            };
            let pipeline = SyncPipeline::from_config(&config, store)?;
            let summary = pipeline.run_once().await?;
            print_json(&summary)?;
        }
        Commands::Migrate => {
            connect_store(&config).await?;
            info!("migrations applied");
        }
        Commands::Serve => {
            let store = connect_store(&config).await?;
            let pipeline = Arc::new(SyncPipeline::from_config(&config, Arc::new(store))?);
            let web_config = WebConfig::from_env();
            let cache = cbj_web::init_cache(&web_config).await;
            let listener = Arc::new(CacheInvalidator::new(cache.clone()));
            let mut scheduler = maybe_build_scheduler(&config, pipeline.clone(), listener).await?;
            if let Some(scheduler) = scheduler.as_mut() {
                scheduler.start().await?;
                info!(cron = %config.sync_cron, "scheduler started");
            }

            let served = cbj_web::serve(&web_config, pipeline, cache).await;
            if let Some(scheduler) = scheduler.as_mut() {
                scheduler.shutdown().await?;
            }
            served?;
        }
        Commands::Jobs => {
            let store = connect_store(&config).await?;
            let source = cbj_adapters::culture_be::SOURCE_ID;
            print_json(&store.list_jobs(source).await?)?;
        }
        Commands::Show { uid } => {
            let store = connect_store(&config).await?;
            match store.get_job(cbj_adapters::culture_be::SOURCE_ID, uid).await? {
                Some(job) => print_json(&job)?,
                None => anyhow::bail!("no job with uid {uid}"),
            }
        }
        Commands::Preview { page } => {
            let pipeline = SyncPipeline::from_config(&config, Arc::new(MemoryJobStore::new()))?;
            let mut listing = pipeline
                .adapter()
                .fetch_listing_page(pipeline.fetcher().as_ref(), page)
                .await?;
            listing.stubs.retain(|stub| validate_stub(stub).is_ok());
            print_json(&listing)?;
        }
    }

    Ok(())
}
