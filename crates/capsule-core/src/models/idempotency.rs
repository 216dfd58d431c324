use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "idempotency_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum IdempotencyStatus {
    Processing,
    Completed,
}

/// Stored outcome of a keyed request.
///
/// `cached_status` and `cached_body` are only set once the record is `Completed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub status: IdempotencyStatus,
    pub cached_status: Option<u16>,
    pub cached_body: Option<Vec<u8>>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
