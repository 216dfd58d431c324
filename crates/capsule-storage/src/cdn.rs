use crate::traits::{BlobStore, StorageError, StorageResult, UploadedBlob};
use async_trait::async_trait;
use capsule_core::models::{MediaFile, MediaKind};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
struct CdnEnvelope {
    success: bool,
    result: Option<CdnAsset>,
    #[serde(default)]
    errors: Vec<CdnError>,
}

#[derive(Debug, Deserialize)]
struct CdnAsset {
    id: String,
    url: String,
    thumbnail_url: Option<String>,
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CdnError {
    code: Option<i64>,
    message: String,
}

fn describe_errors(errors: &[CdnError]) -> String {
    if errors.is_empty() {
        return "no error details".to_string();
    }
    errors
        .iter()
        .map(|e| match e.code {
            Some(code) => format!("{} ({})", e.message, code),
            None => e.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Blob store backed by a CDN image and video API.
///
/// Uploads go to `POST {base}/images` or `POST {base}/videos` as multipart with a
/// `file` part; deletions to `DELETE {base}/{images|videos}/{id}`. Every response
/// uses the `{success, result, errors}` envelope.
#[derive(Clone)]
pub struct CdnBlobStore {
    client: Client,
    base_url: String,
    token: String,
}

impl CdnBlobStore {
    pub fn new(base_url: String, token: String) -> StorageResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| StorageError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn collection(kind: MediaKind) -> &'static str {
        match kind {
            MediaKind::Image => "images",
            MediaKind::Video => "videos",
        }
    }

    async fn upload_to(&self, kind: MediaKind, file: &MediaFile) -> StorageResult<UploadedBlob> {
        let url = format!("{}/{}", self.base_url, Self::collection(kind));
        let start = std::time::Instant::now();

        let part = reqwest::multipart::Part::bytes(file.data.to_vec())
            .file_name(file.filename.clone())
            .mime_str(&file.content_type)
            .map_err(|e| StorageError::UploadFailed(format!("Invalid content type: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed(format!("CDN request failed: {}", e)))?;

        let status = response.status();
        let envelope: CdnEnvelope = response.json().await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "CDN returned unreadable response (status {}): {}",
                status, e
            ))
        })?;

        let asset = match envelope {
            CdnEnvelope {
                success: true,
                result: Some(asset),
                ..
            } => asset,
            CdnEnvelope { errors, .. } => {
                return Err(StorageError::UploadFailed(format!(
                    "CDN rejected upload (status {}): {}",
                    status,
                    describe_errors(&errors)
                )));
            }
        };

        tracing::info!(
            external_id = %asset.id,
            kind = %kind,
            size_bytes = file.data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "CDN upload successful"
        );

        Ok(UploadedBlob {
            external_id: asset.id,
            url: asset.url,
            thumbnail_url: asset.thumbnail_url,
            duration_seconds: asset.duration.map(|d| d.round() as i32),
        })
    }
}

#[async_trait]
impl BlobStore for CdnBlobStore {
    async fn upload_image(&self, file: &MediaFile) -> StorageResult<UploadedBlob> {
        self.upload_to(MediaKind::Image, file).await
    }

    async fn upload_video(&self, file: &MediaFile) -> StorageResult<UploadedBlob> {
        self.upload_to(MediaKind::Video, file).await
    }

    async fn delete_asset(&self, external_id: &str, kind: MediaKind) -> StorageResult<bool> {
        if external_id.is_empty() || external_id.contains('/') {
            return Err(StorageError::InvalidKey(external_id.to_string()));
        }

        let url = format!(
            "{}/{}/{}",
            self.base_url,
            Self::collection(kind),
            external_id
        );

        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| StorageError::DeleteFailed(format!("CDN request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(external_id = %external_id, "CDN asset already absent");
            return Ok(false);
        }

        let envelope: CdnEnvelope = response.json().await.map_err(|e| {
            StorageError::DeleteFailed(format!(
                "CDN returned unreadable response (status {}): {}",
                status, e
            ))
        })?;

        if !status.is_success() || !envelope.success {
            tracing::warn!(
                external_id = %external_id,
                status = status.as_u16(),
                errors = %describe_errors(&envelope.errors),
                "CDN refused deletion"
            );
            return Ok(false);
        }

        tracing::info!(external_id = %external_id, kind = %kind, "CDN asset deleted");
        Ok(true)
    }

    fn backend_name(&self) -> &'static str {
        "cdn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn image() -> MediaFile {
        MediaFile::new("cat.png", "image/png", Bytes::from_static(b"png"))
    }

    #[tokio::test]
    async fn test_upload_parses_envelope() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/images")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"success":true,"result":{"id":"img_1","url":"https://cdn.test/img_1","thumbnail_url":"https://cdn.test/img_1/thumb"},"errors":[]}"#,
            )
            .create_async()
            .await;

        let store = CdnBlobStore::new(server.url(), "secret".to_string()).unwrap();
        let blob = store.upload_image(&image()).await.unwrap();

        assert_eq!(blob.external_id, "img_1");
        assert_eq!(blob.thumbnail_url.as_deref(), Some("https://cdn.test/img_1/thumb"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_video_upload_reports_duration() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/videos")
            .with_status(200)
            .with_body(r#"{"success":true,"result":{"id":"vid_1","url":"https://cdn.test/vid_1","duration":41.6}}"#)
            .create_async()
            .await;

        let store = CdnBlobStore::new(server.url(), "secret".to_string()).unwrap();
        let file = MediaFile::new("clip.mp4", "video/mp4", Bytes::from_static(b"mp4"));
        let blob = store.upload_video(&file).await.unwrap();
        assert_eq!(blob.duration_seconds, Some(42));
    }

    #[tokio::test]
    async fn test_unsuccessful_envelope_is_upload_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/images")
            .with_status(400)
            .with_body(r#"{"success":false,"result":null,"errors":[{"code":5400,"message":"bad image"}]}"#)
            .create_async()
            .await;

        let store = CdnBlobStore::new(server.url(), "secret".to_string()).unwrap();
        let err = store.upload_image(&image()).await.unwrap_err();
        match err {
            StorageError::UploadFailed(msg) => assert!(msg.contains("bad image")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_outcomes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/videos/vid_1")
            .with_status(200)
            .with_body(r#"{"success":true,"result":null,"errors":[]}"#)
            .create_async()
            .await;
        server
            .mock("DELETE", "/images/gone")
            .with_status(404)
            .with_body(r#"{"success":false,"errors":[{"message":"not found"}]}"#)
            .create_async()
            .await;

        let store = CdnBlobStore::new(server.url(), "secret".to_string()).unwrap();
        assert!(store.delete_asset("vid_1", MediaKind::Video).await.unwrap());
        assert!(!store.delete_asset("gone", MediaKind::Image).await.unwrap());
        assert!(store.delete_asset("a/b", MediaKind::Image).await.is_err());
    }
}
