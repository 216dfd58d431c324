use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

/// Media kind enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "media_kind", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify a MIME type. Only `image/*` and `video/*` are accepted.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        if essence.starts_with("image/") && essence.len() > "image/".len() {
            Some(MediaKind::Image)
        } else if essence.starts_with("video/") && essence.len() > "video/".len() {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            _ => Err(anyhow::anyhow!("Invalid media kind: {}", s)),
        }
    }
}

/// Catalog row describing one uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct MediaAsset {
    pub id: i64,
    pub album_id: i64,
    pub external_blob_id: String,
    pub kind: MediaKind,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub is_main_image: bool,
    pub display_order: i32,
    pub duration_seconds: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Values for a catalog insert; ids and timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMediaAsset {
    pub album_id: i64,
    pub external_blob_id: String,
    pub kind: MediaKind,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub is_main_image: bool,
    pub display_order: i32,
    pub duration_seconds: Option<i32>,
}

/// Partial update of a media row. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPatch {
    pub display_order: Option<i32>,
    pub is_main_image: Option<bool>,
}

impl MediaPatch {
    pub fn is_empty(&self) -> bool {
        self.display_order.is_none() && self.is_main_image.is_none()
    }
}

/// Raw file as received from the client.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

impl MediaFile {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
