//! Media lifecycle operations: upload, update and deletion of album media.
//!
//! Bytes live in the blob store and metadata in the catalog; the two are kept
//! consistent with compensating cleanup jobs rather than a shared transaction.
//! Keeps handler logic thin and allows unit testing without HTTP.

use capsule_core::models::{MediaAsset, MediaFile, MediaKind, MediaPatch, NewMediaAsset};
use capsule_core::{AppError, ErrorMetadata, UploadLimits};
use capsule_db::MediaCatalog;
use capsule_services::{ContentModerationGateway, ModerationError, ModerationVerdict};
use capsule_storage::BlobStore;
use capsule_worker::CleanupJobQueue;
use std::sync::Arc;

/// Upload request as received from the client, before validation.
#[derive(Debug, Clone)]
pub struct UploadMediaRequest {
    /// Raw path or form value; must parse as a positive integer.
    pub album_id: String,
    pub file: Option<MediaFile>,
    pub display_order: i32,
    pub is_main_image: bool,
    /// Required for videos, ignored for images.
    pub duration_seconds: Option<i32>,
}

/// Request after shape validation.
struct ValidUpload {
    album_id: i64,
    file: MediaFile,
    kind: MediaKind,
    duration_seconds: Option<i32>,
}

pub struct MediaLifecycleService {
    catalog: Arc<dyn MediaCatalog>,
    blob_store: Arc<dyn BlobStore>,
    moderation: Arc<ContentModerationGateway>,
    quota: super::QuotaService,
    cleanup: Arc<CleanupJobQueue>,
    limits: UploadLimits,
}

impl MediaLifecycleService {
    pub fn new(
        catalog: Arc<dyn MediaCatalog>,
        blob_store: Arc<dyn BlobStore>,
        moderation: Arc<ContentModerationGateway>,
        quota: super::QuotaService,
        cleanup: Arc<CleanupJobQueue>,
        limits: UploadLimits,
    ) -> Self {
        Self {
            catalog,
            blob_store,
            moderation,
            quota,
            cleanup,
            limits,
        }
    }

    fn validate(&self, request: UploadMediaRequest) -> Result<ValidUpload, AppError> {
        let album_id = request
            .album_id
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| {
                AppError::Validation(format!("Invalid album id: {:?}", request.album_id))
            })?;

        let file = request
            .file
            .ok_or_else(|| AppError::Validation("A file is required".to_string()))?;
        if file.is_empty() {
            return Err(AppError::Validation("File is empty".to_string()));
        }

        let kind = MediaKind::from_content_type(&file.content_type).ok_or_else(|| {
            AppError::Validation(format!(
                "Unsupported content type {:?}; expected image/* or video/*",
                file.content_type
            ))
        })?;

        let max_bytes = match kind {
            MediaKind::Image => self.limits.max_image_bytes,
            MediaKind::Video => self.limits.max_video_bytes,
        };
        if file.len() > max_bytes {
            return Err(AppError::Validation(format!(
                "File is {} bytes; the {} limit is {} bytes",
                file.len(),
                kind,
                max_bytes
            )));
        }

        if request.display_order < 0 {
            return Err(AppError::Validation(
                "display_order must not be negative".to_string(),
            ));
        }

        let duration_seconds = match kind {
            MediaKind::Video => match request.duration_seconds {
                Some(seconds) if seconds > 0 => Some(seconds),
                _ => {
                    return Err(AppError::Validation(
                        "Videos require a positive duration_seconds".to_string(),
                    ))
                }
            },
            MediaKind::Image => None,
        };

        Ok(ValidUpload {
            album_id,
            file,
            kind,
            duration_seconds,
        })
    }

    async fn moderate(&self, upload: &ValidUpload) -> Result<(), AppError> {
        let outcome = self
            .moderation
            .moderate(upload.file.data.clone(), upload.kind)
            .await
            .map_err(|e| match e {
                ModerationError::Unavailable(reason) => AppError::ModerationUnavailable(reason),
            })?;

        match outcome.verdict {
            ModerationVerdict::Approved => Ok(()),
            ModerationVerdict::Rejected { category, score } => {
                tracing::info!(category, score, "Upload rejected by moderation");
                Err(AppError::ModerationRejected(format!(
                    "Content rejected by moderation ({})",
                    category
                )))
            }
            ModerationVerdict::PayloadTooLarge { reason } => {
                Err(AppError::ModerationPayloadTooLarge(format!(
                    "File is too large to be checked by moderation: {}",
                    reason
                )))
            }
        }
    }

    /// Validate, check quota, moderate, upload, then record the asset in the catalog.
    ///
    /// If the catalog write fails after the blob was stored, the blob is queued for
    /// deletion and the catalog error is returned.
    #[tracing::instrument(
        skip(self, request),
        fields(album_id = %request.album_id, is_main_image = request.is_main_image)
    )]
    pub async fn upload_single_media(
        &self,
        request: UploadMediaRequest,
    ) -> Result<MediaAsset, AppError> {
        let is_main_image = request.is_main_image;
        let display_order = request.display_order;
        let upload = self.validate(request)?;

        let album = self
            .catalog
            .get_album(upload.album_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Album {} not found", upload.album_id)))?;

        self.quota
            .check(&album, upload.kind, upload.duration_seconds)
            .await?;

        self.moderate(&upload).await?;

        let blob = self
            .blob_store
            .upload(upload.kind, &upload.file)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, backend = self.blob_store.backend_name(), "Blob upload failed");
                AppError::UploadFailed(e.to_string())
            })?;

        let duration_seconds = match upload.kind {
            MediaKind::Video => blob.duration_seconds.or(upload.duration_seconds),
            MediaKind::Image => None,
        };

        // Quota was checked against the claimed length; the store's measurement wins.
        if let (Some(measured), Some(claimed)) = (duration_seconds, upload.duration_seconds) {
            if measured > claimed {
                if let Err(e) = self.quota.check(&album, upload.kind, Some(measured)).await {
                    tracing::info!(
                        claimed,
                        measured,
                        external_id = %blob.external_id,
                        "Measured video length exceeds quota"
                    );
                    self.compensate_orphaned_blob(&blob.external_id, upload.kind, &e)
                        .await;
                    return Err(e);
                }
            }
        }

        let new_media = NewMediaAsset {
            album_id: album.id,
            external_blob_id: blob.external_id.clone(),
            kind: upload.kind,
            url: blob.url,
            thumbnail_url: blob.thumbnail_url,
            is_main_image,
            display_order,
            duration_seconds,
        };

        match self.catalog.create(new_media).await {
            Ok(media) => {
                tracing::info!(
                    media_id = media.id,
                    external_id = %media.external_blob_id,
                    kind = %media.kind,
                    size_bytes = upload.file.len(),
                    "Media uploaded"
                );
                Ok(media)
            }
            Err(e) => {
                self.compensate_orphaned_blob(&blob.external_id, upload.kind, &e)
                    .await;
                Err(AppError::CatalogWriteFailed(e.to_string()))
            }
        }
    }

    /// Queue deletion of a blob that will never be catalogued.
    ///
    /// When scheduling fails the blob is orphaned; that is logged for reconciliation
    /// and the caller still returns its original error.
    async fn compensate_orphaned_blob(
        &self,
        external_id: &str,
        kind: MediaKind,
        cause: &(dyn std::fmt::Display + Sync),
    ) {
        match self.cleanup.schedule(external_id, kind).await {
            Ok(job) => {
                tracing::warn!(
                    error = %cause,
                    external_id = %external_id,
                    job_id = %job.id,
                    "Uploaded blob not catalogued; scheduled for cleanup"
                );
            }
            Err(e) => {
                let failure = AppError::CleanupSchedulingFailed(e.to_string());
                tracing::error!(
                    error = %cause,
                    cleanup_error = %failure,
                    code = failure.error_code(),
                    external_id = %external_id,
                    kind = %kind,
                    reconciliation_required = true,
                    "Uploaded blob not catalogued and cleanup could not be scheduled; blob is orphaned"
                );
            }
        }
    }

    /// Delete the catalog row, then queue the blob for deletion.
    ///
    /// Returns `false` when the media does not exist.
    #[tracing::instrument(skip(self))]
    pub async fn delete_media(&self, media_id: i64) -> Result<bool, AppError> {
        let Some(media) = self.catalog.delete(media_id).await? else {
            return Ok(false);
        };

        match self
            .cleanup
            .schedule(&media.external_blob_id, media.kind)
            .await
        {
            Ok(job) => {
                tracing::info!(
                    album_id = media.album_id,
                    external_id = %media.external_blob_id,
                    job_id = %job.id,
                    "Media deleted"
                );
            }
            Err(e) => {
                let failure = AppError::CleanupSchedulingFailed(e.to_string());
                tracing::error!(
                    error = %failure,
                    code = failure.error_code(),
                    album_id = media.album_id,
                    external_id = %media.external_blob_id,
                    kind = %media.kind,
                    reconciliation_required = true,
                    "Media deleted but blob cleanup could not be scheduled"
                );
            }
        }

        Ok(true)
    }

    /// Change display order and/or the main-image flag of one asset.
    #[tracing::instrument(skip(self))]
    pub async fn update_media(
        &self,
        media_id: i64,
        patch: MediaPatch,
    ) -> Result<MediaAsset, AppError> {
        if patch.display_order.is_some_and(|order| order < 0) {
            return Err(AppError::Validation(
                "display_order must not be negative".to_string(),
            ));
        }

        match self.catalog.update(media_id, patch).await {
            Ok(Some(media)) => Ok(media),
            Ok(None) => Err(AppError::NotFound(format!("Media {} not found", media_id))),
            Err(e) => Err(AppError::CatalogWriteFailed(e.to_string())),
        }
    }
}
