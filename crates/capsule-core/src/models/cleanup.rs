use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

use super::MediaKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "cleanup_job_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum CleanupJobStatus {
    Pending,
    Completed,
    Failed,
}

impl Display for CleanupJobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            CleanupJobStatus::Pending => write!(f, "pending"),
            CleanupJobStatus::Completed => write!(f, "completed"),
            CleanupJobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Durable request to delete a blob from the external store.
///
/// One job exists per `external_blob_id`. Jobs in `completed` or `failed` are never
/// polled again; `failed` needs an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct CleanupJob {
    pub id: Uuid,
    pub external_blob_id: String,
    pub kind: MediaKind,
    pub retry_count: i32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub status: CleanupJobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CleanupJob {
    /// A fresh pending job due immediately.
    pub fn new(external_blob_id: impl Into<String>, kind: MediaKind, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_blob_id: external_blob_id.into(),
            kind,
            retry_count: 0,
            next_retry_at: now,
            last_error: None,
            status: CleanupJobStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// State written after a failed deletion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub retry_count: i32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: String,
    pub status: CleanupJobStatus,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupStats {
    pub pending: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Outcome of one queue tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupTickReport {
    pub processed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
}
