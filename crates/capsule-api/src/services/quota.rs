//! Quota check against live catalog usage

use capsule_core::models::{Album, MediaKind};
use capsule_core::{AppError, QuotaPolicy, QuotaValidator};
use capsule_db::MediaCatalog;
use std::sync::Arc;

/// Reads an album's current usage and asks the [`QuotaValidator`] whether one more
/// asset fits. Read-then-decide: two concurrent uploads may both pass.
#[derive(Clone)]
pub struct QuotaService {
    catalog: Arc<dyn MediaCatalog>,
    validator: QuotaValidator,
}

impl QuotaService {
    pub fn new(catalog: Arc<dyn MediaCatalog>, policy: QuotaPolicy) -> Self {
        Self {
            catalog,
            validator: QuotaValidator::new(policy),
        }
    }

    #[tracing::instrument(skip(self, album), fields(album_id = album.id, tier = %album.tier))]
    pub async fn check(
        &self,
        album: &Album,
        kind: MediaKind,
        duration_seconds: Option<i32>,
    ) -> Result<(), AppError> {
        let usage = self.catalog.quota_usage(album.id).await?;

        self.validator
            .evaluate(album.tier, kind, duration_seconds, &usage)
            .map_err(|violation| {
                tracing::info!(
                    code = violation.rejection.code(),
                    non_main_images = usage.non_main_images,
                    non_main_video_seconds = usage.non_main_video_seconds,
                    "Upload rejected by quota"
                );
                AppError::from(violation)
            })
    }
}
