//! Worker daemon: runs a pool of workers against the shared job store.
//!
//! Configuration comes from the environment (`DB_*`, `WORKER_*`); log
//! verbosity from `RUST_LOG`.

use std::sync::Arc;

use actors::{PoolConfig, ProcessRunner, start_pool};
use db::DbConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let db_config = DbConfig::from_env();
    if db_config.endpoint.starts_with("mem://") {
        tracing::warn!("DB_ENDPOINT is in-memory; jobs submitted by other processes are not visible");
    }
    db::init(db_config).await?;

    let pool_config = PoolConfig::from_env()?;
    tracing::info!(
        "Starting {} workers (lease {:?}, poll {:?})",
        pool_config.concurrency,
        pool_config.lease,
        pool_config.poll_interval
    );
    let mut pool = start_pool(pool_config, Arc::new(ProcessRunner)).await?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Interrupt received, shutting down");
        }
        result = pool.wait() => {
            result?;
            anyhow::bail!("worker pool stopped unexpectedly");
        }
    }

    pool.shutdown().await?;
    Ok(())
}
