//! Blob store abstraction trait

use async_trait::async_trait;
use capsule_core::models::{MediaFile, MediaKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// What the blob store reports for a stored asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedBlob {
    pub external_id: String,
    pub url: String,
    pub thumbnail_url: Option<String>,
    /// Duration measured by the store, when it inspects videos.
    pub duration_seconds: Option<i32>,
}

/// Blob store abstraction trait
///
/// Uploads either succeed with an [`UploadedBlob`] or fail with a [`StorageError`].
/// Deletion reports `Ok(true)` only when the store confirmed removal; an asset that
/// is already gone yields `Ok(false)` and callers treat it like any other failure.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload_image(&self, file: &MediaFile) -> StorageResult<UploadedBlob>;

    async fn upload_video(&self, file: &MediaFile) -> StorageResult<UploadedBlob>;

    async fn delete_asset(&self, external_id: &str, kind: MediaKind) -> StorageResult<bool>;

    /// Name of the backend, for logs.
    fn backend_name(&self) -> &'static str;

    /// Dispatch to the upload method for `kind`.
    async fn upload(&self, kind: MediaKind, file: &MediaFile) -> StorageResult<UploadedBlob> {
        match kind {
            MediaKind::Image => self.upload_image(file).await,
            MediaKind::Video => self.upload_video(file).await,
        }
    }
}
