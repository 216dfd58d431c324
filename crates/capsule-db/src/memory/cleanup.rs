use anyhow::Result;
use async_trait::async_trait;
use capsule_core::models::{CleanupFailure, CleanupJob, CleanupJobStatus, CleanupStats, MediaKind};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::cleanup::CleanupJobStore;

#[derive(Clone, Default)]
pub struct InMemoryCleanupJobStore {
    jobs: Arc<Mutex<HashMap<Uuid, CleanupJob>>>,
}

impl InMemoryCleanupJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, CleanupJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn all(&self) -> Vec<CleanupJob> {
        let mut jobs: Vec<CleanupJob> = self.lock().values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }
}

#[async_trait]
impl CleanupJobStore for InMemoryCleanupJobStore {
    async fn create_or_get(&self, external_blob_id: &str, kind: MediaKind) -> Result<CleanupJob> {
        let mut jobs = self.lock();
        if let Some(existing) = jobs
            .values()
            .find(|j| j.external_blob_id == external_blob_id)
        {
            return Ok(existing.clone());
        }

        let job = CleanupJob::new(external_blob_id, kind, Utc::now());
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CleanupJob>> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn find_by_external_id(&self, external_blob_id: &str) -> Result<Option<CleanupJob>> {
        Ok(self
            .lock()
            .values()
            .find(|j| j.external_blob_id == external_blob_id)
            .cloned())
    }

    async fn fetch_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<CleanupJob>> {
        let mut due: Vec<CleanupJob> = self
            .lock()
            .values()
            .filter(|j| j.status == CleanupJobStatus::Pending && j.next_retry_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|j| j.created_at);
        due.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(due)
    }

    async fn mark_completed(&self, id: Uuid, completed_at: DateTime<Utc>) -> Result<()> {
        if let Some(job) = self.lock().get_mut(&id) {
            job.status = CleanupJobStatus::Completed;
            job.completed_at = Some(completed_at);
            job.updated_at = completed_at;
        }
        Ok(())
    }

    async fn record_failure(&self, id: Uuid, failure: &CleanupFailure) -> Result<()> {
        if let Some(job) = self.lock().get_mut(&id) {
            job.retry_count = failure.retry_count;
            job.next_retry_at = failure.next_retry_at;
            job.last_error = Some(failure.last_error.clone());
            job.status = failure.status;
            job.updated_at = failure.failed_at;
        }
        Ok(())
    }

    async fn stats(&self) -> Result<CleanupStats> {
        let mut stats = CleanupStats::default();
        for job in self.lock().values() {
            match job.status {
                CleanupJobStatus::Pending => stats.pending += 1,
                CleanupJobStatus::Completed => stats.completed += 1,
                CleanupJobStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
