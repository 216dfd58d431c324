//! Collaborators with switchable failures.

use async_trait::async_trait;
use bytes::Bytes;
use capsule_core::models::{
    Album, CleanupFailure, CleanupJob, CleanupStats, MediaAsset, MediaFile, MediaKind,
};
use capsule_core::QuotaUsage;
use capsule_db::{
    BatchOutcome, CatalogBatch, CatalogError, CleanupJobStore, InMemoryCatalog, MediaCatalog,
};
use capsule_services::{CategoryScores, ContentScorer, ImageCompressor, ScorerError};
use capsule_storage::{BlobStore, StorageError, StorageResult, UploadedBlob};
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Blob store that keeps ids in memory and can be told to refuse uploads.
#[derive(Default)]
pub struct FakeBlobStore {
    next_id: AtomicUsize,
    stored: Mutex<HashSet<String>>,
    uploaded_sizes: Mutex<Vec<usize>>,
    measured_video_seconds: Mutex<Option<i32>>,
    pub fail_uploads: AtomicBool,
    pub uploads: AtomicUsize,
}

impl FakeBlobStore {
    /// Report every stored video as `seconds` long, whatever the client claimed.
    pub fn measure_videos_at(&self, seconds: i32) {
        *self.measured_video_seconds.lock().unwrap() = Some(seconds);
    }

    /// Byte length of every payload that reached the store.
    pub fn uploaded_sizes(&self) -> Vec<usize> {
        self.uploaded_sizes.lock().unwrap().clone()
    }

    pub fn contains(&self, external_id: &str) -> bool {
        self.stored.lock().unwrap().contains(external_id)
    }

    pub fn len(&self) -> usize {
        self.stored.lock().unwrap().len()
    }

    fn store(&self, kind: MediaKind, file: &MediaFile) -> StorageResult<UploadedBlob> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.uploaded_sizes.lock().unwrap().push(file.len());
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::UploadFailed("cdn returned 503".to_string()));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let external_id = format!("{}-{}", kind, n);
        self.stored.lock().unwrap().insert(external_id.clone());
        Ok(UploadedBlob {
            url: format!("https://cdn.test/{}/{}", external_id, file.filename),
            thumbnail_url: None,
            duration_seconds: match kind {
                MediaKind::Video => *self.measured_video_seconds.lock().unwrap(),
                MediaKind::Image => None,
            },
            external_id,
        })
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn upload_image(&self, file: &MediaFile) -> StorageResult<UploadedBlob> {
        self.store(MediaKind::Image, file)
    }

    async fn upload_video(&self, file: &MediaFile) -> StorageResult<UploadedBlob> {
        self.store(MediaKind::Video, file)
    }

    async fn delete_asset(&self, external_id: &str, _kind: MediaKind) -> StorageResult<bool> {
        Ok(self.stored.lock().unwrap().remove(external_id))
    }

    fn backend_name(&self) -> &'static str {
        "fake"
    }
}

/// Scorer that plays queued answers first, then repeats a default one.
pub struct FakeScorer {
    queued: Mutex<VecDeque<Result<CategoryScores, ScorerError>>>,
    answer: Mutex<Result<CategoryScores, ScorerError>>,
    seen_sizes: Mutex<Vec<usize>>,
    pub calls: AtomicUsize,
}

impl Default for FakeScorer {
    fn default() -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            answer: Mutex::new(Ok(CategoryScores::default())),
            seen_sizes: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FakeScorer {
    pub fn answer_with(&self, answer: Result<CategoryScores, ScorerError>) {
        *self.answer.lock().unwrap() = answer;
    }

    /// Answer the next calls with `answers`, in order.
    pub fn queue(&self, answers: Vec<Result<CategoryScores, ScorerError>>) {
        self.queued.lock().unwrap().extend(answers);
    }

    /// Byte length of every payload submitted for scoring.
    pub fn seen_sizes(&self) -> Vec<usize> {
        self.seen_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentScorer for FakeScorer {
    async fn score(&self, data: Bytes, _kind: MediaKind) -> Result<CategoryScores, ScorerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_sizes.lock().unwrap().push(data.len());
        if let Some(answer) = self.queued.lock().unwrap().pop_front() {
            return answer;
        }
        self.answer.lock().unwrap().clone()
    }
}

/// Compressor that keeps the first `keep` bytes.
pub struct TruncatingCompressor {
    pub keep: usize,
    pub calls: AtomicUsize,
}

impl Default for TruncatingCompressor {
    fn default() -> Self {
        Self {
            keep: 16,
            calls: AtomicUsize::new(0),
        }
    }
}

impl ImageCompressor for TruncatingCompressor {
    fn compress(&self, data: &[u8]) -> anyhow::Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::copy_from_slice(&data[..data.len().min(self.keep)]))
    }
}

/// In-memory catalog whose writes can be switched off.
pub struct FlakyCatalog {
    pub inner: InMemoryCatalog,
    pub fail_writes: AtomicBool,
}

impl FlakyCatalog {
    pub fn new(inner: InMemoryCatalog) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl MediaCatalog for FlakyCatalog {
    async fn get_album(&self, album_id: i64) -> anyhow::Result<Option<Album>> {
        self.inner.get_album(album_id).await
    }

    async fn get_media(&self, media_id: i64) -> anyhow::Result<Option<MediaAsset>> {
        self.inner.get_media(media_id).await
    }

    async fn get_media_many(&self, media_ids: &[i64]) -> anyhow::Result<Vec<MediaAsset>> {
        self.inner.get_media_many(media_ids).await
    }

    async fn list_album_media(&self, album_id: i64) -> anyhow::Result<Vec<MediaAsset>> {
        self.inner.list_album_media(album_id).await
    }

    async fn quota_usage(&self, album_id: i64) -> anyhow::Result<QuotaUsage> {
        self.inner.quota_usage(album_id).await
    }

    async fn delete(&self, media_id: i64) -> anyhow::Result<Option<MediaAsset>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("connection to catalog lost");
        }
        self.inner.delete(media_id).await
    }

    async fn execute_batch(&self, batch: CatalogBatch) -> Result<BatchOutcome, CatalogError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CatalogError::Other(anyhow::anyhow!(
                "connection to catalog lost"
            )));
        }
        self.inner.execute_batch(batch).await
    }
}

/// Cleanup job store that cannot be written to.
#[derive(Default)]
pub struct BrokenCleanupStore;

#[async_trait]
impl CleanupJobStore for BrokenCleanupStore {
    async fn create_or_get(&self, _id: &str, _kind: MediaKind) -> anyhow::Result<CleanupJob> {
        anyhow::bail!("cleanup table unavailable")
    }

    async fn get(&self, _id: Uuid) -> anyhow::Result<Option<CleanupJob>> {
        Ok(None)
    }

    async fn find_by_external_id(&self, _id: &str) -> anyhow::Result<Option<CleanupJob>> {
        Ok(None)
    }

    async fn fetch_due(&self, _now: DateTime<Utc>, _limit: i64) -> anyhow::Result<Vec<CleanupJob>> {
        Ok(Vec::new())
    }

    async fn mark_completed(&self, _id: Uuid, _at: DateTime<Utc>) -> anyhow::Result<()> {
        anyhow::bail!("cleanup table unavailable")
    }

    async fn record_failure(&self, _id: Uuid, _failure: &CleanupFailure) -> anyhow::Result<()> {
        anyhow::bail!("cleanup table unavailable")
    }

    async fn stats(&self) -> anyhow::Result<CleanupStats> {
        Ok(CleanupStats::default())
    }
}
