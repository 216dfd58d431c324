//! Service initialization and application state setup

use anyhow::{Context, Result};
use capsule_core::{CapsuleConfig, ModerationConfig};
use capsule_db::{
    setup_database, CleanupJobStore, IdempotencyStore, InMemoryCatalog, InMemoryCleanupJobStore,
    InMemoryIdempotencyStore, MediaCatalog, PgCleanupJobStore, PgIdempotencyStore, PgMediaCatalog,
};
use capsule_services::{
    ContentModerationGateway, HttpContentScorer, IdempotencyGuard, ImageCompressor,
    JpegCompressor,
};
use capsule_storage::{create_blob_store, BlobStore};
use capsule_worker::CleanupJobQueue;
use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{BatchPublisher, MediaLifecycleService, QuotaService};
use crate::state::AppState;

/// Persistence and blob backends the services are built on.
#[derive(Clone)]
pub struct Backends {
    pub catalog: Arc<dyn MediaCatalog>,
    pub cleanup_jobs: Arc<dyn CleanupJobStore>,
    pub idempotency_records: Arc<dyn IdempotencyStore>,
    pub blob_store: Arc<dyn BlobStore>,
}

impl Backends {
    pub fn postgres(pool: PgPool, blob_store: Arc<dyn BlobStore>) -> Self {
        Self {
            catalog: Arc::new(PgMediaCatalog::new(pool.clone())),
            cleanup_jobs: Arc::new(PgCleanupJobStore::new(pool.clone())),
            idempotency_records: Arc::new(PgIdempotencyStore::new(pool)),
            blob_store,
        }
    }

    /// Process-local backends for development without a database.
    pub fn in_memory(blob_store: Arc<dyn BlobStore>) -> Self {
        Self {
            catalog: Arc::new(InMemoryCatalog::new()),
            cleanup_jobs: Arc::new(InMemoryCleanupJobStore::new()),
            idempotency_records: Arc::new(InMemoryIdempotencyStore::new()),
            blob_store,
        }
    }
}

fn build_moderation(config: &ModerationConfig) -> Result<ContentModerationGateway> {
    let Some(scorer) = HttpContentScorer::from_config(config)? else {
        tracing::warn!("MODERATION_API_URL not set, content moderation disabled");
        return Ok(ContentModerationGateway::disabled());
    };

    let compressor: Option<Arc<dyn ImageCompressor>> = if config.compression_enabled {
        Some(Arc::new(JpegCompressor::default()))
    } else {
        None
    };

    tracing::info!(
        compression = config.compression_enabled,
        "Content moderation enabled"
    );
    Ok(ContentModerationGateway::new(Arc::new(scorer), compressor))
}

/// Wire every service over the given backends.
pub fn initialize_services(config: &CapsuleConfig, backends: Backends) -> Result<Arc<AppState>> {
    let moderation =
        Arc::new(build_moderation(&config.moderation).context("Failed to set up moderation")?);

    let cleanup = Arc::new(CleanupJobQueue::new(
        backends.cleanup_jobs.clone(),
        backends.blob_store.clone(),
        config.cleanup,
    ));

    let quota = QuotaService::new(backends.catalog.clone(), config.quota);

    let media = Arc::new(MediaLifecycleService::new(
        backends.catalog.clone(),
        backends.blob_store.clone(),
        moderation,
        quota,
        cleanup.clone(),
        config.upload_limits,
    ));

    let publisher = Arc::new(BatchPublisher::new(
        backends.catalog.clone(),
        cleanup.clone(),
    ));

    let idempotency = Arc::new(IdempotencyGuard::new(
        backends.idempotency_records.clone(),
        config.idempotency,
    ));

    tracing::info!(
        environment = %config.environment,
        blob_backend = backends.blob_store.backend_name(),
        "Services initialized"
    );

    Ok(Arc::new(AppState {
        config: config.clone(),
        catalog: backends.catalog,
        media,
        publisher,
        cleanup,
        idempotency,
    }))
}

/// Connect to Postgres, run migrations, build the configured blob store and wire services.
pub async fn initialize_postgres_services(config: &CapsuleConfig) -> Result<Arc<AppState>> {
    let pool = setup_database(&config.database).await?;
    let blob_store = create_blob_store(&config.blob)
        .await
        .context("Failed to create blob store")?;

    initialize_services(config, Backends::postgres(pool, blob_store))
}
