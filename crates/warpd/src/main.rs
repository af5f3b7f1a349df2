//! `warpd` — the WarpGrid scheduler daemon.
//!
//! Connects to Postgres and Redis, reconciles any `pending` deployments
//! left over from a previous run back onto the queue, then runs
//! `WORKER_CONCURRENCY` worker loops until `SIGINT`/`SIGTERM`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use warp_core::SchedulerConfig;
use warpgrid_lock::ClusterLock;
use warpgrid_queue::JobQueue;
use warpgrid_scheduler::{SchedulerService, WorkerLoop};
use warpgrid_state::StateStore;

const DEQUEUE_POLL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "warpd", about = "WarpGrid scheduler daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler worker loop(s) until shutdown.
    Run {
        /// Optional TOML config file; environment variables always
        /// override whatever it sets.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { config } => run(config).await,
    }
}

async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => SchedulerConfig::from_file(&path)?,
        None => SchedulerConfig::default(),
    };
    config.apply_env();

    let store = StateStore::connect(&config.store_url).await?;
    let lock = ClusterLock::connect(&config.lock_redis_url).await?;
    let queue = JobQueue::connect(&config.queue_redis_url).await?;

    let scheduler = SchedulerService::new(
        store.clone(),
        lock,
        queue.clone(),
        config.mutex_ttl(),
        config.mutex_wait_budget(),
        config.retry_delay(),
    );

    let worker = Arc::new(WorkerLoop::new(
        scheduler,
        queue,
        store,
        DEQUEUE_POLL_TIMEOUT,
        config.retry_delay(),
    ));

    let reconciled = worker.reconcile_on_startup().await?;
    info!(reconciled, "startup reconciliation complete");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let mut handles = Vec::new();
    for worker_id in 0..config.worker_concurrency.max(1) {
        let worker = worker.clone();
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            info!(worker_id, "worker task started");
            worker.run(rx).await;
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}
