use anyhow::Result;
use async_trait::async_trait;
use capsule_core::models::{Album, MediaAsset, MediaKind, NewMediaAsset, StorageTier};
use capsule_core::QuotaUsage;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::catalog::{BatchOutcome, CatalogBatch, CatalogError, CatalogStatement, MediaCatalog};

#[derive(Debug, Clone, Default)]
struct CatalogState {
    albums: HashMap<i64, Album>,
    media: BTreeMap<i64, MediaAsset>,
    next_media_id: i64,
}

impl CatalogState {
    fn apply(
        &mut self,
        index: usize,
        statement: &CatalogStatement,
        outcome: &mut BatchOutcome,
    ) -> Result<(), CatalogError> {
        let no_rows = || CatalogError::NoRowsAffected {
            index,
            statement: statement.name(),
        };

        let rows = match statement {
            CatalogStatement::InsertMedia(new) => {
                if !self.albums.contains_key(&new.album_id) {
                    return Err(CatalogError::Conflict(format!(
                        "album {} does not exist",
                        new.album_id
                    )));
                }
                if self
                    .media
                    .values()
                    .any(|m| m.external_blob_id == new.external_blob_id)
                {
                    return Err(CatalogError::Conflict(format!(
                        "external blob id {} already catalogued",
                        new.external_blob_id
                    )));
                }
                if new.is_main_image && self.main_image_of(new.album_id).is_some() {
                    return Err(CatalogError::Conflict(format!(
                        "album {} already has a main image",
                        new.album_id
                    )));
                }

                self.next_media_id += 1;
                let asset = MediaAsset {
                    id: self.next_media_id,
                    album_id: new.album_id,
                    external_blob_id: new.external_blob_id.clone(),
                    kind: new.kind,
                    url: new.url.clone(),
                    thumbnail_url: new.thumbnail_url.clone(),
                    is_main_image: new.is_main_image,
                    display_order: new.display_order,
                    duration_seconds: new.duration_seconds,
                    created_at: Utc::now(),
                };
                self.media.insert(asset.id, asset.clone());
                outcome.inserted.push(asset);
                1
            }
            CatalogStatement::DeleteMedia { album_id, media_id } => {
                match self.media.get(media_id) {
                    Some(m) if album_id.map_or(true, |a| a == m.album_id) => {
                        self.media.remove(media_id);
                        1
                    }
                    _ => return Err(no_rows()),
                }
            }
            CatalogStatement::SetDisplayOrder {
                album_id,
                media_id,
                display_order,
            } => match self.media.get_mut(media_id) {
                Some(m) if album_id.map_or(true, |a| a == m.album_id) => {
                    m.display_order = *display_order;
                    1
                }
                _ => return Err(no_rows()),
            },
            CatalogStatement::ClearMainImage { album_id } => {
                if !self.albums.contains_key(album_id) {
                    return Err(no_rows());
                }
                let mut cleared = 0;
                for m in self.media.values_mut() {
                    if m.album_id == *album_id && m.is_main_image {
                        m.is_main_image = false;
                        cleared += 1;
                    }
                }
                cleared
            }
            CatalogStatement::SetMainImage { album_id, media_id } => {
                let current_main = self.main_image_of(*album_id);
                match self.media.get_mut(media_id) {
                    Some(m) if m.album_id == *album_id => {
                        if current_main.is_some_and(|id| id != *media_id) {
                            return Err(CatalogError::Conflict(format!(
                                "album {} already has a main image",
                                album_id
                            )));
                        }
                        m.is_main_image = true;
                        1
                    }
                    _ => return Err(no_rows()),
                }
            }
            CatalogStatement::UnsetMainImage { media_id } => match self.media.get_mut(media_id) {
                Some(m) => {
                    m.is_main_image = false;
                    1
                }
                None => return Err(no_rows()),
            },
            CatalogStatement::UpdateAlbumTitle { album_id, title } => {
                match self.albums.get_mut(album_id) {
                    Some(album) => {
                        album.title = title.clone();
                        1
                    }
                    None => return Err(no_rows()),
                }
            }
        };

        outcome.rows_affected += rows;
        Ok(())
    }

    fn main_image_of(&self, album_id: i64) -> Option<i64> {
        self.media
            .values()
            .find(|m| m.album_id == album_id && m.is_main_image)
            .map(|m| m.id)
    }
}

/// Catalog held in process memory. A batch runs against a copy of the state and
/// replaces it only when every statement succeeded.
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_album(&self, id: i64, title: impl Into<String>, tier: StorageTier) -> Album {
        let album = Album {
            id,
            title: title.into(),
            tier,
            created_at: Utc::now(),
        };
        self.lock().albums.insert(id, album.clone());
        album
    }

    /// Insert rows directly, bypassing batch semantics. Intended for fixtures.
    pub fn seed_media(&self, album_id: i64, kind: MediaKind, count: usize, duration_seconds: Option<i32>) {
        let mut state = self.lock();
        for _ in 0..count {
            state.next_media_id += 1;
            let id = state.next_media_id;
            state.media.insert(
                id,
                MediaAsset {
                    id,
                    album_id,
                    external_blob_id: format!("seed-{}", id),
                    kind,
                    url: format!("https://cdn.invalid/seed-{}", id),
                    thumbnail_url: None,
                    is_main_image: false,
                    display_order: id as i32,
                    duration_seconds,
                    created_at: Utc::now(),
                },
            );
        }
    }

    pub fn media_count(&self) -> usize {
        self.lock().media.len()
    }

    pub fn main_image_count(&self, album_id: i64) -> usize {
        self.lock()
            .media
            .values()
            .filter(|m| m.album_id == album_id && m.is_main_image)
            .count()
    }
}

#[async_trait]
impl MediaCatalog for InMemoryCatalog {
    async fn get_album(&self, album_id: i64) -> Result<Option<Album>> {
        Ok(self.lock().albums.get(&album_id).cloned())
    }

    async fn get_media(&self, media_id: i64) -> Result<Option<MediaAsset>> {
        Ok(self.lock().media.get(&media_id).cloned())
    }

    async fn get_media_many(&self, media_ids: &[i64]) -> Result<Vec<MediaAsset>> {
        let state = self.lock();
        let mut found: Vec<MediaAsset> = media_ids
            .iter()
            .filter_map(|id| state.media.get(id).cloned())
            .collect();
        found.sort_by_key(|m| m.id);
        found.dedup_by_key(|m| m.id);
        Ok(found)
    }

    async fn list_album_media(&self, album_id: i64) -> Result<Vec<MediaAsset>> {
        let mut media: Vec<MediaAsset> = self
            .lock()
            .media
            .values()
            .filter(|m| m.album_id == album_id)
            .cloned()
            .collect();
        media.sort_by_key(|m| (m.display_order, m.id));
        Ok(media)
    }

    async fn quota_usage(&self, album_id: i64) -> Result<QuotaUsage> {
        let state = self.lock();
        let mut usage = QuotaUsage::default();
        for m in state
            .media
            .values()
            .filter(|m| m.album_id == album_id && !m.is_main_image)
        {
            match m.kind {
                MediaKind::Image => usage.non_main_images += 1,
                MediaKind::Video => {
                    usage.non_main_video_seconds += i64::from(m.duration_seconds.unwrap_or(0))
                }
            }
        }
        Ok(usage)
    }

    async fn delete(&self, media_id: i64) -> Result<Option<MediaAsset>> {
        Ok(self.lock().media.remove(&media_id))
    }

    async fn execute_batch(&self, batch: CatalogBatch) -> Result<BatchOutcome, CatalogError> {
        let mut state = self.lock();
        let mut staged = state.clone();
        let mut outcome = BatchOutcome::default();

        for (index, statement) in batch.statements().iter().enumerate() {
            staged.apply(index, statement, &mut outcome)?;
        }

        *state = staged;
        Ok(outcome)
    }
}
