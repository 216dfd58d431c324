#[cfg(feature = "storage-cdn")]
use crate::CdnBlobStore;
#[cfg(feature = "storage-local")]
use crate::LocalBlobStore;
use crate::{BlobBackend, BlobStore, StorageError, StorageResult};
use capsule_core::BlobConfig;
use std::sync::Arc;

/// Create a blob store based on configuration
pub async fn create_blob_store(config: &BlobConfig) -> StorageResult<Arc<dyn BlobStore>> {
    match config.backend {
        #[cfg(feature = "storage-cdn")]
        BlobBackend::Cdn => {
            let base_url = config.cdn_api_base_url.clone().ok_or_else(|| {
                StorageError::ConfigError("CDN_API_BASE_URL not configured".to_string())
            })?;
            let token = config.cdn_api_token.clone().ok_or_else(|| {
                StorageError::ConfigError("CDN_API_TOKEN not configured".to_string())
            })?;

            let store = CdnBlobStore::new(base_url, token)?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "storage-cdn"))]
        BlobBackend::Cdn => Err(StorageError::ConfigError(
            "CDN blob backend not available (storage-cdn feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-local")]
        BlobBackend::Local => {
            let store =
                LocalBlobStore::new(config.local_path.clone(), config.local_base_url.clone())
                    .await?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "storage-local"))]
        BlobBackend::Local => Err(StorageError::ConfigError(
            "Local blob backend not available (storage-local feature not enabled)".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(backend: BlobBackend, path: String) -> BlobConfig {
        BlobConfig {
            backend,
            cdn_api_base_url: None,
            cdn_api_token: None,
            local_path: path,
            local_base_url: "http://localhost:3000/blobs".to_string(),
        }
    }

    #[tokio::test]
    async fn test_local_backend_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let store = create_blob_store(&config(
            BlobBackend::Local,
            dir.path().to_string_lossy().to_string(),
        ))
        .await
        .unwrap();
        assert_eq!(store.backend_name(), "local");
    }

    #[tokio::test]
    async fn test_cdn_backend_requires_credentials() {
        let result = create_blob_store(&config(BlobBackend::Cdn, String::new())).await;
        assert!(matches!(result, Err(StorageError::ConfigError(_))));
    }
}
