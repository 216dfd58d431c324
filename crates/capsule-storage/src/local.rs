use crate::traits::{BlobStore, StorageError, StorageResult, UploadedBlob};
use async_trait::async_trait;
use capsule_core::models::{MediaFile, MediaKind};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Local filesystem blob store
///
/// External ids are storage keys of the form `{kind}s/{uuid}{.ext}`.
#[derive(Clone)]
pub struct LocalBlobStore {
    base_path: PathBuf,
    base_url: String,
}

impl LocalBlobStore {
    /// Create a new LocalBlobStore instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for blobs (e.g., "/var/lib/capsule/blobs")
    /// * `base_url` - Base URL for serving blobs (e.g., "http://localhost:3000/blobs")
    pub async fn new(base_path: impl Into<PathBuf>, base_url: String) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalBlobStore {
            base_path,
            base_url,
        })
    }

    /// Convert a key to a filesystem path, rejecting anything that could leave the base directory.
    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty()
            || key.contains("..")
            || key.starts_with('/')
            || key.contains('\\')
            || key.contains('\0')
        {
            return Err(StorageError::InvalidKey(format!(
                "Storage key contains invalid characters: {}",
                key
            )));
        }

        let path = self.base_path.join(key);

        let base_canonical = self.base_path.canonicalize().map_err(|e| {
            StorageError::ConfigError(format!("Failed to canonicalize base path: {}", e))
        })?;

        if let Ok(canonical) = path.canonicalize() {
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(StorageError::InvalidKey(
                    "Storage key resolves outside storage directory".to_string(),
                ));
            }
        }

        Ok(path)
    }

    fn generate_key(kind: MediaKind, filename: &str) -> String {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default();

        format!("{}s/{}{}", kind.as_str(), Uuid::new_v4(), extension)
    }

    fn generate_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }

    async fn store(&self, kind: MediaKind, file: &MediaFile) -> StorageResult<UploadedBlob> {
        let key = Self::generate_key(kind, &file.filename);
        let path = self.key_to_path(&key)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let start = std::time::Instant::now();

        let mut handle = fs::File::create(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        handle.write_all(&file.data).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to write file {}: {}", path.display(), e))
        })?;

        handle.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = file.data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local blob upload successful"
        );

        Ok(UploadedBlob {
            url: self.generate_url(&key),
            thumbnail_url: None,
            duration_seconds: None,
            external_id: key,
        })
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload_image(&self, file: &MediaFile) -> StorageResult<UploadedBlob> {
        self.store(MediaKind::Image, file).await
    }

    async fn upload_video(&self, file: &MediaFile) -> StorageResult<UploadedBlob> {
        self.store(MediaKind::Video, file).await
    }

    async fn delete_asset(&self, external_id: &str, kind: MediaKind) -> StorageResult<bool> {
        let path = self.key_to_path(external_id)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(key = %external_id, kind = %kind, "Local blob deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(key = %external_id, "Local blob already absent");
                Ok(false)
            }
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    async fn store() -> (LocalBlobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path(), "http://localhost:3000/blobs/".to_string())
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_upload_then_delete() {
        let (store, dir) = store().await;
        let file = MediaFile::new("Holiday.JPG", "image/jpeg", Bytes::from_static(b"jpeg-bytes"));

        let blob = store.upload_image(&file).await.unwrap();
        assert!(blob.external_id.starts_with("images/"));
        assert!(blob.external_id.ends_with(".jpg"));
        assert_eq!(
            blob.url,
            format!("http://localhost:3000/blobs/{}", blob.external_id)
        );

        let on_disk = std::fs::read(dir.path().join(&blob.external_id)).unwrap();
        assert_eq!(on_disk, b"jpeg-bytes");

        assert!(store
            .delete_asset(&blob.external_id, MediaKind::Image)
            .await
            .unwrap());
        // second delete finds nothing
        assert!(!store
            .delete_asset(&blob.external_id, MediaKind::Image)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_video_keys_use_video_prefix() {
        let (store, _dir) = store().await;
        let file = MediaFile::new("clip", "video/mp4", Bytes::from_static(b"mp4"));
        let blob = store.upload(MediaKind::Video, &file).await.unwrap();
        assert!(blob.external_id.starts_with("videos/"));
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let (store, _dir) = store().await;
        for key in ["../etc/passwd", "/etc/passwd", "images/..\\x", ""] {
            let err = store.delete_asset(key, MediaKind::Image).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey(_)), "key {key:?}");
        }
    }
}
