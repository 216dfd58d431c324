#![allow(dead_code)]

pub mod fakes;
pub mod fixtures;

use capsule_api::{BatchPublisher, MediaLifecycleService, QuotaService};
use capsule_core::models::StorageTier;
use capsule_core::{CleanupConfig, QuotaPolicy, UploadLimits};
use capsule_db::{CleanupJobStore, InMemoryCatalog, InMemoryCleanupJobStore};
use capsule_services::{ContentModerationGateway, ImageCompressor};
use capsule_worker::CleanupJobQueue;
use std::sync::Arc;

use fakes::{FakeBlobStore, FakeScorer, FlakyCatalog, TruncatingCompressor};

pub const ALBUM_ID: i64 = 42;
pub const UPGRADED_ALBUM_ID: i64 = 43;

/// Services wired over in-memory backends and fakes.
pub struct TestApp {
    pub catalog: Arc<FlakyCatalog>,
    pub cleanup_jobs: InMemoryCleanupJobStore,
    pub blobs: Arc<FakeBlobStore>,
    pub scorer: Arc<FakeScorer>,
    pub compressor: Arc<TruncatingCompressor>,
    pub cleanup: Arc<CleanupJobQueue>,
    pub media: MediaLifecycleService,
    pub publisher: BatchPublisher,
}

impl TestApp {
    pub fn new() -> Self {
        let cleanup_jobs = InMemoryCleanupJobStore::new();
        Self::with_cleanup_store(cleanup_jobs.clone(), Arc::new(cleanup_jobs))
    }

    /// Use `store` for cleanup scheduling; `cleanup_jobs` is only kept for inspection.
    pub fn with_cleanup_store(
        cleanup_jobs: InMemoryCleanupJobStore,
        store: Arc<dyn CleanupJobStore>,
    ) -> Self {
        let inner = InMemoryCatalog::new();
        inner.insert_album(ALBUM_ID, "Summer", StorageTier::Base);
        inner.insert_album(UPGRADED_ALBUM_ID, "Wedding", StorageTier::Upgraded);
        let catalog = Arc::new(FlakyCatalog::new(inner));

        let blobs = Arc::new(FakeBlobStore::default());
        let scorer = Arc::new(FakeScorer::default());
        let compressor = Arc::new(TruncatingCompressor::default());
        let moderation = Arc::new(ContentModerationGateway::new(
            scorer.clone(),
            Some(compressor.clone() as Arc<dyn ImageCompressor>),
        ));

        let cleanup = Arc::new(CleanupJobQueue::new(
            store,
            blobs.clone(),
            CleanupConfig::default(),
        ));

        let media = MediaLifecycleService::new(
            catalog.clone(),
            blobs.clone(),
            moderation,
            QuotaService::new(catalog.clone(), QuotaPolicy::default()),
            cleanup.clone(),
            UploadLimits::default(),
        );
        let publisher = BatchPublisher::new(catalog.clone(), cleanup.clone());

        Self {
            catalog,
            cleanup_jobs,
            blobs,
            scorer,
            compressor,
            cleanup,
            media,
            publisher,
        }
    }

    pub fn albums(&self) -> &InMemoryCatalog {
        &self.catalog.inner
    }
}
