use anyhow::{Context, Result};
use std::sync::Arc;

use capsule_core::CapsuleConfig;
use capsule_db::{setup_database, PgCleanupJobStore, PgIdempotencyStore};
use capsule_storage::create_blob_store;
use capsule_worker::{telemetry, CleanupJobQueue};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    telemetry::init_telemetry(json_logs)?;

    let config = CapsuleConfig::from_env().context("Failed to load configuration")?;
    tracing::info!(environment = %config.environment, "Starting capsule cleanup worker");

    let pool = setup_database(&config.database).await?;
    let blob_store = create_blob_store(&config.blob)
        .await
        .context("Failed to create blob store")?;

    let queue = Arc::new(
        CleanupJobQueue::new(
            Arc::new(PgCleanupJobStore::new(pool.clone())),
            blob_store,
            config.cleanup,
        )
        .with_idempotency_store(Arc::new(PgIdempotencyStore::new(pool.clone()))),
    );

    match queue.stats().await {
        Ok(stats) => tracing::info!(
            pending = stats.pending,
            completed = stats.completed,
            failed = stats.failed,
            "Cleanup queue state"
        ),
        Err(e) => tracing::warn!(error = %e, "Failed to read cleanup queue stats"),
    }

    let worker = queue.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    worker.shutdown().await;
    pool.close().await;
    tracing::info!("Capsule cleanup worker stopped");
    Ok(())
}
