//! Atomic publish of album metadata changes
//!
//! A publish request carries deletes, reorders, at most one main-image change and an
//! optional new title. All of them are applied in one catalog batch; blobs of deleted
//! assets are queued for cleanup only after the batch committed.

use capsule_core::constants::MAX_ALBUM_TITLE_LENGTH;
use capsule_core::models::{DisplayOrderUpdate, MediaAsset, MetadataChange, PublishSummary};
use capsule_core::{AppError, ErrorMetadata};
use capsule_db::{CatalogBatch, CatalogStatement, MediaCatalog};
use capsule_worker::CleanupJobQueue;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Changes sorted by kind, in the order they are applied.
#[derive(Debug, Default)]
struct GroupedChanges {
    deletes: Vec<i64>,
    reorders: Vec<DisplayOrderUpdate>,
    main_image: Option<i64>,
}

fn group_changes(changes: Vec<MetadataChange>) -> Result<GroupedChanges, AppError> {
    let mut grouped = GroupedChanges::default();
    let mut seen_deletes = BTreeSet::new();

    for change in changes {
        match change {
            MetadataChange::Delete { media_id } => {
                if seen_deletes.insert(media_id) {
                    grouped.deletes.push(media_id);
                }
            }
            MetadataChange::Reorder {
                media_id,
                display_order,
            } => {
                if display_order < 0 {
                    return Err(AppError::Validation(format!(
                        "display_order for media {} must not be negative",
                        media_id
                    )));
                }
                grouped.reorders.push(DisplayOrderUpdate {
                    media_id,
                    display_order,
                });
            }
            MetadataChange::SetMainImage { media_id } => {
                if grouped.main_image.replace(media_id).is_some() {
                    return Err(AppError::Validation(
                        "At most one set_main_image change is allowed".to_string(),
                    ));
                }
            }
        }
    }

    Ok(grouped)
}

fn validate_title(title: Option<String>) -> Result<Option<String>, AppError> {
    let Some(title) = title else {
        return Ok(None);
    };
    let title = title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::Validation("Album title must not be blank".to_string()));
    }
    if title.chars().count() > MAX_ALBUM_TITLE_LENGTH {
        return Err(AppError::Validation(format!(
            "Album title must be at most {} characters",
            MAX_ALBUM_TITLE_LENGTH
        )));
    }
    Ok(Some(title))
}

pub struct BatchPublisher {
    catalog: Arc<dyn MediaCatalog>,
    cleanup: Arc<CleanupJobQueue>,
}

impl BatchPublisher {
    pub fn new(catalog: Arc<dyn MediaCatalog>, cleanup: Arc<CleanupJobQueue>) -> Self {
        Self { catalog, cleanup }
    }

    /// Apply every change and the optional title in one batch.
    ///
    /// Each statement must match the row it names within `album_id`; otherwise nothing
    /// is applied and `METADATA_PUBLISH_FAILED` is returned.
    #[tracing::instrument(skip(self, changes, album_title), fields(changes = changes.len()))]
    pub async fn publish_metadata_changes(
        &self,
        album_id: i64,
        changes: Vec<MetadataChange>,
        album_title: Option<String>,
    ) -> Result<PublishSummary, AppError> {
        if changes.is_empty() && album_title.is_none() {
            return Err(AppError::Validation(
                "Nothing to publish: provide changes or a title".to_string(),
            ));
        }
        let grouped = group_changes(changes)?;
        let title = validate_title(album_title)?;

        if self.catalog.get_album(album_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Album {} not found", album_id)));
        }

        let doomed: Vec<MediaAsset> = if grouped.deletes.is_empty() {
            Vec::new()
        } else {
            self.catalog
                .get_media_many(&grouped.deletes)
                .await
                .map_err(|e| AppError::PublishFailed(format!("Failed to load delete targets: {}", e)))?
                .into_iter()
                .filter(|m| m.album_id == album_id)
                .collect()
        };

        let mut batch = CatalogBatch::new();
        for &media_id in &grouped.deletes {
            batch.push(CatalogStatement::DeleteMedia {
                album_id: Some(album_id),
                media_id,
            });
        }
        for update in &grouped.reorders {
            batch.push(CatalogStatement::SetDisplayOrder {
                album_id: Some(album_id),
                media_id: update.media_id,
                display_order: update.display_order,
            });
        }
        if let Some(media_id) = grouped.main_image {
            batch.push(CatalogStatement::ClearMainImage { album_id });
            batch.push(CatalogStatement::SetMainImage { album_id, media_id });
        }
        if let Some(title) = &title {
            batch.push(CatalogStatement::UpdateAlbumTitle {
                album_id,
                title: title.clone(),
            });
        }

        let statements = batch.len();
        self.catalog.execute_batch(batch).await.map_err(|e| {
            tracing::warn!(error = %e, statements, "Metadata publish rolled back");
            AppError::PublishFailed(e.to_string())
        })?;

        let cleanup_scheduled = self.schedule_cleanup(&doomed).await;

        tracing::info!(
            album_id,
            deleted = grouped.deletes.len(),
            reordered = grouped.reorders.len(),
            main_image_id = ?grouped.main_image,
            title_updated = title.is_some(),
            cleanup_scheduled,
            "Metadata changes published"
        );

        Ok(PublishSummary {
            deleted: grouped.deletes,
            reordered: grouped.reorders.len(),
            main_image_id: grouped.main_image,
            title_updated: title.is_some(),
            cleanup_scheduled,
        })
    }

    /// Queue blob deletion for committed deletes. Failures are logged, not returned.
    async fn schedule_cleanup(&self, deleted: &[MediaAsset]) -> usize {
        let mut scheduled = 0;
        for media in deleted {
            match self
                .cleanup
                .schedule(&media.external_blob_id, media.kind)
                .await
            {
                Ok(_) => scheduled += 1,
                Err(e) => {
                    let failure = AppError::CleanupSchedulingFailed(e.to_string());
                    tracing::error!(
                        error = %failure,
                        code = failure.error_code(),
                        media_id = media.id,
                        external_id = %media.external_blob_id,
                        reconciliation_required = true,
                        "Failed to schedule blob cleanup after publish"
                    );
                }
            }
        }
        scheduled
    }

    /// Set display orders across any albums in one batch. Returns rows updated.
    #[tracing::instrument(skip(self, updates), fields(updates = updates.len()))]
    pub async fn batch_reorder(&self, updates: Vec<DisplayOrderUpdate>) -> Result<u64, AppError> {
        if updates.is_empty() {
            return Err(AppError::Validation("No display order updates given".to_string()));
        }
        if let Some(bad) = updates.iter().find(|u| u.display_order < 0) {
            return Err(AppError::Validation(format!(
                "display_order for media {} must not be negative",
                bad.media_id
            )));
        }

        let batch: CatalogBatch = updates
            .iter()
            .map(|u| CatalogStatement::SetDisplayOrder {
                album_id: None,
                media_id: u.media_id,
                display_order: u.display_order,
            })
            .collect::<Vec<_>>()
            .into();

        let outcome = self.catalog.execute_batch(batch).await.map_err(|e| {
            tracing::warn!(error = %e, "Batch reorder rolled back");
            AppError::PublishFailed(e.to_string())
        })?;

        Ok(outcome.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_changes_dedupes_deletes_and_limits_main_image() {
        let grouped = group_changes(vec![
            MetadataChange::Delete { media_id: 1 },
            MetadataChange::Delete { media_id: 1 },
            MetadataChange::Reorder {
                media_id: 2,
                display_order: 0,
            },
            MetadataChange::SetMainImage { media_id: 3 },
        ])
        .unwrap();
        assert_eq!(grouped.deletes, vec![1]);
        assert_eq!(grouped.reorders.len(), 1);
        assert_eq!(grouped.main_image, Some(3));

        let err = group_changes(vec![
            MetadataChange::SetMainImage { media_id: 3 },
            MetadataChange::SetMainImage { media_id: 4 },
        ])
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = group_changes(vec![MetadataChange::Reorder {
            media_id: 2,
            display_order: -1,
        }])
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_validate_title() {
        assert_eq!(validate_title(None).unwrap(), None);
        assert_eq!(
            validate_title(Some("  Summer  ".to_string())).unwrap(),
            Some("Summer".to_string())
        );
        assert!(validate_title(Some("   ".to_string())).is_err());
        assert!(validate_title(Some("x".repeat(201))).is_err());
        assert!(validate_title(Some("x".repeat(200))).is_ok());
    }
}
