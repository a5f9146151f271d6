//! webmemo server entry point.
//!
//! Boots the tiered cache, the selector tracker and the expiry sweeper, then
//! serves MCP tools on stdio transport.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use webmemo_core::cache::DurableTier;
use webmemo_core::{AppConfig, CacheDb, ExpirySweeper, KeyNormalizer, SelectorTracker, TieredCache};

mod handler;
mod tools;

/// Open the durable tier, or run L1-only if it cannot be opened.
async fn open_durable(config: &AppConfig) -> Option<Arc<dyn DurableTier>> {
    if !config.l2_enabled {
        tracing::info!("L2 disabled by configuration, running L1-only");
        return None;
    }
    match CacheDb::open(&config.db_path).await {
        Ok(db) => {
            tracing::info!(path = %config.db_path.display(), "opened L2 cache database");
            let db: Arc<dyn DurableTier> = Arc::new(db);
            Some(db)
        }
        Err(e) => {
            tracing::warn!(path = %config.db_path.display(), error = %e, "failed to open L2, running L1-only");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(
        l1_capacity_bytes = config.l1_capacity_bytes,
        l2_enabled = config.l2_enabled,
        "Starting webmemo server on stdio transport"
    );

    let durable = open_durable(&config).await;
    let cache = Arc::new(TieredCache::new(&config, durable.clone()));
    let tracker = Arc::new(SelectorTracker::new(&config, durable));
    if let Err(e) = tracker.load().await {
        tracing::warn!(error = %e, "failed to load selector records, starting empty");
    }
    let normalizer = Arc::new(KeyNormalizer::from_config(&config));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let sweeper = Arc::new(ExpirySweeper::new(&config, cache.clone(), tracker.clone()));
    let sweeper_handle = tokio::spawn(sweeper.run_loop(shutdown_rx));

    let handler = handler::WebmemoServer::new(cache.clone(), tracker, normalizer);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    let _ = shutdown_tx.send(());
    sweeper_handle.await?;
    if let Err(e) = cache.persist_metrics_snapshot().await {
        tracing::warn!(error = %e, "failed to persist final metrics snapshot");
    }
    tracing::info!("webmemo server stopped");

    Ok(())
}
