//! Cleanup job queue: polling ticker, blob deletion and retry bookkeeping.
//!
//! Shutdown: [`CleanupWorker::shutdown`] stops the ticker after the tick in flight
//! finishes. A tick that dies midway leaves its jobs pending; the next tick picks
//! them up again.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use capsule_core::constants::{CLEANUP_BACKOFF_LADDER_MINUTES, MAX_CLEANUP_RETRIES};
use capsule_core::models::{
    CleanupFailure, CleanupJob, CleanupJobStatus, CleanupStats, CleanupTickReport, MediaKind,
};
use capsule_core::CleanupConfig;
use capsule_db::{CleanupJobStore, IdempotencyStore};
use capsule_storage::BlobStore;

/// Delay before the next attempt after the `retry_count`-th failure.
///
/// Walks the ladder 1m, 5m, 15m, 1h, 6h, 24h and stays on the last rung.
#[inline]
pub fn compute_cleanup_backoff(retry_count: i32) -> chrono::Duration {
    let last = CLEANUP_BACKOFF_LADDER_MINUTES.len() - 1;
    let index = usize::try_from(retry_count.saturating_sub(1))
        .unwrap_or(0)
        .min(last);
    chrono::Duration::minutes(CLEANUP_BACKOFF_LADDER_MINUTES[index])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Completed,
    Retried,
    Failed,
    /// The attempt ran but its result could not be written back.
    Unrecorded,
}

pub struct CleanupJobQueue {
    store: Arc<dyn CleanupJobStore>,
    blob_store: Arc<dyn BlobStore>,
    idempotency_store: Option<Arc<dyn IdempotencyStore>>,
    config: CleanupConfig,
}

impl CleanupJobQueue {
    pub fn new(
        store: Arc<dyn CleanupJobStore>,
        blob_store: Arc<dyn BlobStore>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            store,
            blob_store,
            idempotency_store: None,
            config,
        }
    }

    /// Also purge expired idempotency records on every tick.
    pub fn with_idempotency_store(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency_store = Some(store);
        self
    }

    /// Enqueue deletion of a blob. Scheduling the same blob twice returns the existing job.
    #[tracing::instrument(skip(self), fields(external_id = %external_blob_id, kind = %kind))]
    pub async fn schedule(&self, external_blob_id: &str, kind: MediaKind) -> Result<CleanupJob> {
        let job = self
            .store
            .create_or_get(external_blob_id, kind)
            .await
            .with_context(|| format!("Failed to schedule cleanup for blob {}", external_blob_id))?;

        tracing::debug!(job_id = %job.id, status = %job.status, "Cleanup job scheduled");
        Ok(job)
    }

    pub async fn stats(&self) -> Result<CleanupStats> {
        self.store.stats().await
    }

    pub async fn process_due(&self) -> Result<CleanupTickReport> {
        self.process_due_at(Utc::now()).await
    }

    /// Process every job due at `now`, up to the configured batch size.
    pub async fn process_due_at(&self, now: DateTime<Utc>) -> Result<CleanupTickReport> {
        let jobs = self
            .store
            .fetch_due(now, self.config.batch_size)
            .await
            .context("Failed to fetch due cleanup jobs")?;

        let mut report = CleanupTickReport {
            processed: jobs.len(),
            ..Default::default()
        };
        if jobs.is_empty() {
            return Ok(report);
        }

        let outcomes: Vec<JobOutcome> = stream::iter(jobs)
            .map(|job| self.process_job(job, now))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                JobOutcome::Completed => report.completed += 1,
                JobOutcome::Retried => report.retried += 1,
                JobOutcome::Failed => report.failed += 1,
                JobOutcome::Unrecorded => {}
            }
        }

        tracing::info!(
            processed = report.processed,
            completed = report.completed,
            retried = report.retried,
            failed = report.failed,
            "Cleanup tick finished"
        );
        Ok(report)
    }

    async fn process_job(&self, job: CleanupJob, now: DateTime<Utc>) -> JobOutcome {
        let span = tracing::info_span!(
            "cleanup_job",
            job_id = %job.id,
            external_id = %job.external_blob_id,
            retry_count = job.retry_count
        );

        async move {
            let error = match self
                .blob_store
                .delete_asset(&job.external_blob_id, job.kind)
                .await
            {
                Ok(true) => {
                    return match self.store.mark_completed(job.id, now).await {
                        Ok(()) => {
                            tracing::info!("Blob deleted, cleanup job completed");
                            JobOutcome::Completed
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Blob deleted but job could not be marked completed");
                            JobOutcome::Unrecorded
                        }
                    };
                }
                Ok(false) => format!(
                    "{} store did not confirm deletion",
                    self.blob_store.backend_name()
                ),
                Err(e) => e.to_string(),
            };

            let failure = next_failure(&job, error, now);
            let outcome = if failure.status == CleanupJobStatus::Failed {
                tracing::error!(
                    error = %failure.last_error,
                    reconciliation_required = true,
                    "Cleanup job exhausted its retries"
                );
                JobOutcome::Failed
            } else {
                tracing::warn!(
                    error = %failure.last_error,
                    next_retry_at = %failure.next_retry_at,
                    "Blob deletion failed, will retry"
                );
                JobOutcome::Retried
            };

            match self.store.record_failure(job.id, &failure).await {
                Ok(()) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to record cleanup failure");
                    JobOutcome::Unrecorded
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn purge_idempotency_records(&self) {
        let Some(store) = &self.idempotency_store else {
            return;
        };
        match store.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "Expired idempotency records purged"),
            Err(e) => tracing::warn!(error = %e, "Failed to purge idempotency records"),
        }
    }

    async fn tick(&self) {
        if let Err(e) = self.process_due().await {
            tracing::error!(error = %e, "Cleanup tick failed");
        }
        self.purge_idempotency_records().await;
    }

    /// Spawn the recurring ticker. Missed ticks are skipped, not replayed.
    pub fn start(self: Arc<Self>) -> CleanupWorker {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let poll_interval = self.config.poll_interval;

        let handle = tokio::spawn(async move {
            tracing::info!(
                poll_interval_secs = poll_interval.as_secs(),
                batch_size = self.config.batch_size,
                concurrency = self.config.concurrency,
                backend = self.blob_store.backend_name(),
                "Cleanup worker started"
            );

            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Cleanup worker shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        self.tick().instrument(tracing::info_span!("cleanup_tick")).await;
                    }
                }
            }

            tracing::info!("Cleanup worker stopped");
        });

        CleanupWorker {
            handle,
            shutdown_tx,
        }
    }
}

fn next_failure(job: &CleanupJob, error: String, now: DateTime<Utc>) -> CleanupFailure {
    let retry_count = job.retry_count + 1;
    let status = if retry_count >= MAX_CLEANUP_RETRIES {
        CleanupJobStatus::Failed
    } else {
        CleanupJobStatus::Pending
    };

    CleanupFailure {
        retry_count,
        next_retry_at: now + compute_cleanup_backoff(retry_count),
        last_error: error,
        status,
        failed_at: now,
    }
}

/// Handle to a running ticker.
pub struct CleanupWorker {
    handle: JoinHandle<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl CleanupWorker {
    /// Signal the ticker to stop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Cleanup worker task ended abnormally");
        }
    }
}
