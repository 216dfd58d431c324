//! Cleanup job repository
//!
//! Durable queue of blob deletions. The table carries a unique index on
//! `external_blob_id`, so scheduling the same blob twice yields the existing job.

use anyhow::{Context, Result};
use async_trait::async_trait;
use capsule_core::models::{CleanupFailure, CleanupJob, CleanupStats, MediaKind};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, external_blob_id, kind, retry_count, next_retry_at, last_error, \
     status, created_at, updated_at, completed_at";

/// How long a fetched job stays invisible to other workers.
const CLAIM_LEASE_SECS: i64 = 300;

/// Lease due jobs by pushing `next_retry_at` past the lease. Rows locked by another
/// worker are skipped; a worker that dies mid-tick releases its jobs when the lease ends.
fn claim_due_sql() -> String {
    format!(
        "UPDATE cleanup_jobs SET next_retry_at = $3, updated_at = $1 \
         WHERE id IN (\
             SELECT id FROM cleanup_jobs \
             WHERE status = 'pending' AND next_retry_at <= $1 \
             ORDER BY created_at ASC LIMIT $2 \
             FOR UPDATE SKIP LOCKED\
         ) \
         RETURNING {JOB_COLUMNS}"
    )
}

#[async_trait]
pub trait CleanupJobStore: Send + Sync {
    /// Insert a pending job for the blob, or return the job that already exists for it.
    async fn create_or_get(&self, external_blob_id: &str, kind: MediaKind) -> Result<CleanupJob>;

    async fn get(&self, id: Uuid) -> Result<Option<CleanupJob>>;

    async fn find_by_external_id(&self, external_blob_id: &str) -> Result<Option<CleanupJob>>;

    /// Pending jobs with `next_retry_at <= now`, oldest first. Stores shared between
    /// workers lease what they return, so a concurrent worker does not get the same job.
    async fn fetch_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<CleanupJob>>;

    async fn mark_completed(&self, id: Uuid, completed_at: DateTime<Utc>) -> Result<()>;

    async fn record_failure(&self, id: Uuid, failure: &CleanupFailure) -> Result<()>;

    async fn stats(&self) -> Result<CleanupStats>;
}

#[derive(Clone)]
pub struct PgCleanupJobStore {
    pool: PgPool,
}

impl PgCleanupJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CleanupJobStore for PgCleanupJobStore {
    #[tracing::instrument(skip(self), fields(db.table = "cleanup_jobs", db.operation = "insert"))]
    async fn create_or_get(&self, external_blob_id: &str, kind: MediaKind) -> Result<CleanupJob> {
        let sql = format!(
            "INSERT INTO cleanup_jobs (id, external_blob_id, kind) VALUES ($1, $2, $3) \
             ON CONFLICT (external_blob_id) DO NOTHING RETURNING {JOB_COLUMNS}"
        );
        let created = sqlx::query_as::<Postgres, CleanupJob>(&sql)
            .bind(Uuid::new_v4())
            .bind(external_blob_id)
            .bind(kind)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to insert cleanup job")?;

        if let Some(job) = created {
            return Ok(job);
        }

        self.find_by_external_id(external_blob_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Cleanup job for {} vanished after conflict", external_blob_id))
    }

    async fn get(&self, id: Uuid) -> Result<Option<CleanupJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM cleanup_jobs WHERE id = $1");
        sqlx::query_as::<Postgres, CleanupJob>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load cleanup job")
    }

    async fn find_by_external_id(&self, external_blob_id: &str) -> Result<Option<CleanupJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM cleanup_jobs WHERE external_blob_id = $1");
        sqlx::query_as::<Postgres, CleanupJob>(&sql)
            .bind(external_blob_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load cleanup job by external id")
    }

    #[tracing::instrument(skip(self), fields(db.table = "cleanup_jobs", db.operation = "update"))]
    async fn fetch_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<CleanupJob>> {
        let lease_until = now + chrono::Duration::seconds(CLAIM_LEASE_SECS);
        let mut jobs = sqlx::query_as::<Postgres, CleanupJob>(&claim_due_sql())
            .bind(now)
            .bind(limit)
            .bind(lease_until)
            .fetch_all(&self.pool)
            .await
            .context("Failed to claim due cleanup jobs")?;

        // RETURNING does not keep the subquery order.
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn mark_completed(&self, id: Uuid, completed_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE cleanup_jobs SET status = 'completed', completed_at = $2, updated_at = $2 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(completed_at)
        .execute(&self.pool)
        .await
        .context("Failed to mark cleanup job completed")?;

        Ok(())
    }

    async fn record_failure(&self, id: Uuid, failure: &CleanupFailure) -> Result<()> {
        sqlx::query(
            "UPDATE cleanup_jobs SET retry_count = $2, next_retry_at = $3, last_error = $4, \
             status = $5, updated_at = $6 WHERE id = $1",
        )
        .bind(id)
        .bind(failure.retry_count)
        .bind(failure.next_retry_at)
        .bind(&failure.last_error)
        .bind(failure.status)
        .bind(failure.failed_at)
        .execute(&self.pool)
        .await
        .context("Failed to record cleanup job failure")?;

        Ok(())
    }

    async fn stats(&self) -> Result<CleanupStats> {
        let (pending, completed, failed) = sqlx::query_as::<Postgres, (i64, i64, i64)>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'failed')
            FROM cleanup_jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to load cleanup job stats")?;

        Ok(CleanupStats {
            pending,
            completed,
            failed,
        })
    }
}
