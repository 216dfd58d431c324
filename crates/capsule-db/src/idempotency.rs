//! Idempotency record repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use capsule_core::models::{IdempotencyRecord, IdempotencyStatus};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use std::time::Duration;

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// The live record for `key`. Expired records are reported as absent.
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// Atomically create a `processing` record. Returns `false` when a live record
    /// already holds the key.
    async fn try_claim(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn put_completed(&self, key: &str, status: u16, body: &[u8], ttl: Duration)
        -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Drop expired records; returns how many were removed.
    async fn purge_expired(&self) -> Result<u64>;
}

#[derive(Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type RecordRow = (
    String,
    IdempotencyStatus,
    Option<i32>,
    Option<Vec<u8>>,
    DateTime<Utc>,
);

fn record_from_row(row: RecordRow) -> IdempotencyRecord {
    let (key, status, cached_status, cached_body, expires_at) = row;
    IdempotencyRecord {
        key,
        status,
        cached_status: cached_status.and_then(|s| u16::try_from(s).ok()),
        cached_body,
        expires_at,
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query_as::<Postgres, RecordRow>(
            "SELECT key, status, cached_status, cached_body, expires_at \
             FROM idempotency_records WHERE key = $1 AND expires_at > NOW()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load idempotency record")?;

        Ok(row.map(record_from_row))
    }

    async fn try_claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        // An expired record is taken over in place; a live one blocks the claim.
        let claimed = sqlx::query_scalar::<Postgres, String>(
            r#"
            INSERT INTO idempotency_records (key, status, expires_at)
            VALUES ($1, 'processing', NOW() + make_interval(secs => $2))
            ON CONFLICT (key) DO UPDATE
                SET status = 'processing',
                    cached_status = NULL,
                    cached_body = NULL,
                    expires_at = EXCLUDED.expires_at,
                    created_at = NOW()
                WHERE idempotency_records.expires_at <= NOW()
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to claim idempotency key")?;

        Ok(claimed.is_some())
    }

    async fn put_completed(
        &self,
        key: &str,
        status: u16,
        body: &[u8],
        ttl: Duration,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_records (key, status, cached_status, cached_body, expires_at)
            VALUES ($1, 'completed', $2, $3, NOW() + make_interval(secs => $4))
            ON CONFLICT (key) DO UPDATE
                SET status = 'completed',
                    cached_status = EXCLUDED.cached_status,
                    cached_body = EXCLUDED.cached_body,
                    expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(i32::from(status))
        .bind(body)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .context("Failed to store idempotent response")?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_records WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .context("Failed to delete idempotency record")?;

        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM idempotency_records WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .context("Failed to purge expired idempotency records")?;

        Ok(result.rows_affected())
    }
}
