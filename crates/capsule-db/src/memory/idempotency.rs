use anyhow::Result;
use async_trait::async_trait;
use capsule_core::models::{IdempotencyRecord, IdempotencyStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::idempotency::IdempotencyStore;

fn expiry_after(ttl: Duration) -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365))
}

#[derive(Clone, Default)]
pub struct InMemoryIdempotencyStore {
    records: Arc<Mutex<HashMap<String, IdempotencyRecord>>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, IdempotencyRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move every record's expiry into the past.
    pub fn expire_all(&self) {
        let past = Utc::now() - chrono::Duration::seconds(1);
        for record in self.lock().values_mut() {
            record.expires_at = past;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let now = Utc::now();
        Ok(self
            .lock()
            .get(key)
            .filter(|record| !record.is_expired(now))
            .cloned())
    }

    async fn try_claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut records = self.lock();
        let now = Utc::now();
        if records.get(key).is_some_and(|r| !r.is_expired(now)) {
            return Ok(false);
        }

        records.insert(
            key.to_string(),
            IdempotencyRecord {
                key: key.to_string(),
                status: IdempotencyStatus::Processing,
                cached_status: None,
                cached_body: None,
                expires_at: expiry_after(ttl),
            },
        );
        Ok(true)
    }

    async fn put_completed(
        &self,
        key: &str,
        status: u16,
        body: &[u8],
        ttl: Duration,
    ) -> Result<()> {
        self.lock().insert(
            key.to_string(),
            IdempotencyRecord {
                key: key.to_string(),
                status: IdempotencyStatus::Completed,
                cached_status: Some(status),
                cached_body: Some(body.to_vec()),
                expires_at: expiry_after(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        Ok((before - records.len()) as u64)
    }
}
