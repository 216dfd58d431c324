//! Media catalog repository
//!
//! Single-statement reads plus one write primitive, [`MediaCatalog::execute_batch`],
//! which applies a list of [`CatalogStatement`]s all-or-nothing. Every multi-row
//! invariant (one main image per album, atomic publish) is expressed as a batch.

use anyhow::{Context, Result};
use async_trait::async_trait;
use capsule_core::models::{Album, MediaAsset, MediaPatch, NewMediaAsset};
use capsule_core::QuotaUsage;
use sqlx::{PgPool, Postgres, Transaction};

use crate::transaction::with_transaction;

const MEDIA_COLUMNS: &str = "id, album_id, external_blob_id, kind, url, thumbnail_url, \
     is_main_image, display_order, duration_seconds, created_at";

/// One mutation inside a catalog batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogStatement {
    InsertMedia(NewMediaAsset),
    /// With `album_id` set, only a row of that album matches.
    DeleteMedia {
        album_id: Option<i64>,
        media_id: i64,
    },
    SetDisplayOrder {
        album_id: Option<i64>,
        media_id: i64,
        display_order: i32,
    },
    /// Locks the album row and clears its current main image. Matching zero media
    /// rows is fine; a missing album is not.
    ClearMainImage {
        album_id: i64,
    },
    SetMainImage {
        album_id: i64,
        media_id: i64,
    },
    UnsetMainImage {
        media_id: i64,
    },
    UpdateAlbumTitle {
        album_id: i64,
        title: String,
    },
}

impl CatalogStatement {
    pub fn name(&self) -> &'static str {
        match self {
            CatalogStatement::InsertMedia(_) => "insert_media",
            CatalogStatement::DeleteMedia { .. } => "delete_media",
            CatalogStatement::SetDisplayOrder { .. } => "set_display_order",
            CatalogStatement::ClearMainImage { .. } => "clear_main_image",
            CatalogStatement::SetMainImage { .. } => "set_main_image",
            CatalogStatement::UnsetMainImage { .. } => "unset_main_image",
            CatalogStatement::UpdateAlbumTitle { .. } => "update_album_title",
        }
    }
}

/// Ordered statements applied in a single transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogBatch {
    statements: Vec<CatalogStatement>,
}

impl CatalogBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, statement: CatalogStatement) -> &mut Self {
        self.statements.push(statement);
        self
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> &[CatalogStatement] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<CatalogStatement> {
        self.statements
    }
}

impl From<Vec<CatalogStatement>> for CatalogBatch {
    fn from(statements: Vec<CatalogStatement>) -> Self {
        Self { statements }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub rows_affected: u64,
    /// Rows created by `InsertMedia` statements, in batch order.
    pub inserted: Vec<MediaAsset>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("statement {index} ({statement}) matched no rows")]
    NoRowsAffected {
        index: usize,
        statement: &'static str,
    },

    #[error("constraint violated: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait MediaCatalog: Send + Sync {
    async fn get_album(&self, album_id: i64) -> Result<Option<Album>>;

    async fn get_media(&self, media_id: i64) -> Result<Option<MediaAsset>>;

    /// Rows for the given ids; missing ids are skipped.
    async fn get_media_many(&self, media_ids: &[i64]) -> Result<Vec<MediaAsset>>;

    async fn list_album_media(&self, album_id: i64) -> Result<Vec<MediaAsset>>;

    /// Count of non-main images and total seconds of non-main videos in an album.
    async fn quota_usage(&self, album_id: i64) -> Result<QuotaUsage>;

    /// Remove one row and return it, or `None` if it did not exist.
    async fn delete(&self, media_id: i64) -> Result<Option<MediaAsset>>;

    /// Apply every statement or none of them.
    async fn execute_batch(&self, batch: CatalogBatch) -> Result<BatchOutcome, CatalogError>;

    /// Insert one row. A main image clears the album's previous main image in the same batch.
    async fn create(&self, media: NewMediaAsset) -> Result<MediaAsset, CatalogError> {
        let mut batch = CatalogBatch::new();
        if media.is_main_image {
            batch.push(CatalogStatement::ClearMainImage {
                album_id: media.album_id,
            });
        }
        batch.push(CatalogStatement::InsertMedia(media));

        let mut outcome = self.execute_batch(batch).await?;
        outcome
            .inserted
            .pop()
            .ok_or_else(|| CatalogError::Other(anyhow::anyhow!("insert returned no row")))
    }

    /// Apply a patch to one row. Returns `None` when the row does not exist.
    async fn update(
        &self,
        media_id: i64,
        patch: MediaPatch,
    ) -> Result<Option<MediaAsset>, CatalogError> {
        let Some(current) = self.get_media(media_id).await? else {
            return Ok(None);
        };

        if patch.is_empty() {
            return Ok(Some(current));
        }

        let mut batch = CatalogBatch::new();
        if let Some(display_order) = patch.display_order {
            batch.push(CatalogStatement::SetDisplayOrder {
                album_id: Some(current.album_id),
                media_id,
                display_order,
            });
        }
        match patch.is_main_image {
            Some(true) => {
                batch.push(CatalogStatement::ClearMainImage {
                    album_id: current.album_id,
                });
                batch.push(CatalogStatement::SetMainImage {
                    album_id: current.album_id,
                    media_id,
                });
            }
            Some(false) => {
                batch.push(CatalogStatement::UnsetMainImage { media_id });
            }
            None => {}
        }

        self.execute_batch(batch).await?;
        Ok(self.get_media(media_id).await?)
    }
}

/// Postgres-backed catalog
#[derive(Clone)]
pub struct PgMediaCatalog {
    pool: PgPool,
}

impl PgMediaCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_constraint(err: sqlx::Error) -> CatalogError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return CatalogError::Conflict(db_err.message().to_string());
        }
    }
    CatalogError::Database(err)
}

fn require_rows(index: usize, statement: &CatalogStatement, rows: u64) -> Result<u64, CatalogError> {
    if rows == 0 {
        return Err(CatalogError::NoRowsAffected {
            index,
            statement: statement.name(),
        });
    }
    Ok(rows)
}

async fn apply_statement(
    tx: &mut Transaction<'_, Postgres>,
    index: usize,
    statement: &CatalogStatement,
    outcome: &mut BatchOutcome,
) -> Result<(), CatalogError> {
    let rows = match statement {
        CatalogStatement::InsertMedia(media) => {
            let sql = format!(
                "INSERT INTO media_assets (album_id, external_blob_id, kind, url, thumbnail_url, \
                 is_main_image, display_order, duration_seconds) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {MEDIA_COLUMNS}"
            );
            let inserted = sqlx::query_as::<Postgres, MediaAsset>(&sql)
                .bind(media.album_id)
                .bind(&media.external_blob_id)
                .bind(media.kind)
                .bind(&media.url)
                .bind(&media.thumbnail_url)
                .bind(media.is_main_image)
                .bind(media.display_order)
                .bind(media.duration_seconds)
                .fetch_one(&mut **tx)
                .await
                .map_err(map_constraint)?;
            outcome.inserted.push(inserted);
            1
        }
        CatalogStatement::DeleteMedia { album_id, media_id } => {
            let result = sqlx::query(
                "DELETE FROM media_assets WHERE id = $1 AND ($2::BIGINT IS NULL OR album_id = $2)",
            )
            .bind(media_id)
            .bind(album_id)
            .execute(&mut **tx)
            .await?;
            require_rows(index, statement, result.rows_affected())?
        }
        CatalogStatement::SetDisplayOrder {
            album_id,
            media_id,
            display_order,
        } => {
            let result = sqlx::query(
                "UPDATE media_assets SET display_order = $3, updated_at = NOW() \
                 WHERE id = $1 AND ($2::BIGINT IS NULL OR album_id = $2)",
            )
            .bind(media_id)
            .bind(album_id)
            .bind(display_order)
            .execute(&mut **tx)
            .await?;
            require_rows(index, statement, result.rows_affected())?
        }
        CatalogStatement::ClearMainImage { album_id } => {
            // Serializes concurrent main-image swaps on the same album.
            let locked = sqlx::query_scalar::<Postgres, i64>(
                "SELECT id FROM albums WHERE id = $1 FOR UPDATE",
            )
            .bind(album_id)
            .fetch_optional(&mut **tx)
            .await?;
            if locked.is_none() {
                return Err(CatalogError::NoRowsAffected {
                    index,
                    statement: statement.name(),
                });
            }

            sqlx::query(
                "UPDATE media_assets SET is_main_image = FALSE, updated_at = NOW() \
                 WHERE album_id = $1 AND is_main_image",
            )
            .bind(album_id)
            .execute(&mut **tx)
            .await?
            .rows_affected()
        }
        CatalogStatement::SetMainImage { album_id, media_id } => {
            let result = sqlx::query(
                "UPDATE media_assets SET is_main_image = TRUE, updated_at = NOW() \
                 WHERE id = $1 AND album_id = $2",
            )
            .bind(media_id)
            .bind(album_id)
            .execute(&mut **tx)
            .await
            .map_err(map_constraint)?;
            require_rows(index, statement, result.rows_affected())?
        }
        CatalogStatement::UnsetMainImage { media_id } => {
            let result = sqlx::query(
                "UPDATE media_assets SET is_main_image = FALSE, updated_at = NOW() WHERE id = $1",
            )
            .bind(media_id)
            .execute(&mut **tx)
            .await?;
            require_rows(index, statement, result.rows_affected())?
        }
        CatalogStatement::UpdateAlbumTitle { album_id, title } => {
            let result =
                sqlx::query("UPDATE albums SET title = $2, updated_at = NOW() WHERE id = $1")
                    .bind(album_id)
                    .bind(title)
                    .execute(&mut **tx)
                    .await?;
            require_rows(index, statement, result.rows_affected())?
        }
    };

    outcome.rows_affected += rows;
    Ok(())
}

#[async_trait]
impl MediaCatalog for PgMediaCatalog {
    #[tracing::instrument(skip(self), fields(db.table = "albums", db.operation = "select"))]
    async fn get_album(&self, album_id: i64) -> Result<Option<Album>> {
        let album = sqlx::query_as::<Postgres, Album>(
            "SELECT id, title, tier, created_at FROM albums WHERE id = $1",
        )
        .bind(album_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load album")?;

        Ok(album)
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_assets", db.operation = "select"))]
    async fn get_media(&self, media_id: i64) -> Result<Option<MediaAsset>> {
        let sql = format!("SELECT {MEDIA_COLUMNS} FROM media_assets WHERE id = $1");
        let media = sqlx::query_as::<Postgres, MediaAsset>(&sql)
            .bind(media_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load media")?;

        Ok(media)
    }

    #[tracing::instrument(skip(self, media_ids), fields(db.table = "media_assets", db.operation = "select", count = media_ids.len()))]
    async fn get_media_many(&self, media_ids: &[i64]) -> Result<Vec<MediaAsset>> {
        if media_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!("SELECT {MEDIA_COLUMNS} FROM media_assets WHERE id = ANY($1) ORDER BY id");
        let media = sqlx::query_as::<Postgres, MediaAsset>(&sql)
            .bind(media_ids.to_vec())
            .fetch_all(&self.pool)
            .await
            .context("Failed to load media batch")?;

        Ok(media)
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_assets", db.operation = "select"))]
    async fn list_album_media(&self, album_id: i64) -> Result<Vec<MediaAsset>> {
        let sql = format!(
            "SELECT {MEDIA_COLUMNS} FROM media_assets WHERE album_id = $1 ORDER BY display_order, id"
        );
        let media = sqlx::query_as::<Postgres, MediaAsset>(&sql)
            .bind(album_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list album media")?;

        Ok(media)
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_assets", db.operation = "aggregate"))]
    async fn quota_usage(&self, album_id: i64) -> Result<QuotaUsage> {
        let (non_main_images, non_main_video_seconds) = sqlx::query_as::<Postgres, (i64, i64)>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE kind = 'image'),
                COALESCE(SUM(duration_seconds) FILTER (WHERE kind = 'video'), 0)::BIGINT
            FROM media_assets
            WHERE album_id = $1 AND NOT is_main_image
            "#,
        )
        .bind(album_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute album quota usage")?;

        Ok(QuotaUsage {
            non_main_images,
            non_main_video_seconds,
        })
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_assets", db.operation = "delete"))]
    async fn delete(&self, media_id: i64) -> Result<Option<MediaAsset>> {
        let sql = format!("DELETE FROM media_assets WHERE id = $1 RETURNING {MEDIA_COLUMNS}");
        let deleted = sqlx::query_as::<Postgres, MediaAsset>(&sql)
            .bind(media_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to delete media")?;

        Ok(deleted)
    }

    #[tracing::instrument(skip(self, batch), fields(db.table = "media_assets", db.operation = "batch", statements = batch.len()))]
    async fn execute_batch(&self, batch: CatalogBatch) -> Result<BatchOutcome, CatalogError> {
        let statements = batch.into_statements();

        with_transaction(&self.pool, |tx| {
            Box::pin(async move {
                let mut outcome = BatchOutcome::default();
                for (index, statement) in statements.iter().enumerate() {
                    apply_statement(tx, index, statement, &mut outcome).await?;
                }
                Ok::<_, CatalogError>(outcome)
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_preserves_order() {
        let mut batch = CatalogBatch::new();
        batch
            .push(CatalogStatement::DeleteMedia {
                album_id: Some(1),
                media_id: 2,
            })
            .push(CatalogStatement::UpdateAlbumTitle {
                album_id: 1,
                title: "Summer".to_string(),
            });

        let names: Vec<_> = batch.statements().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["delete_media", "update_album_title"]);
    }

    #[test]
    fn test_no_rows_error_names_statement() {
        let err = require_rows(
            3,
            &CatalogStatement::UnsetMainImage { media_id: 9 },
            0,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "statement 3 (unset_main_image) matched no rows");
        assert_eq!(
            require_rows(0, &CatalogStatement::UnsetMainImage { media_id: 9 }, 2).unwrap(),
            2
        );
    }
}
