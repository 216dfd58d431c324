//! Capsule cleanup worker
//!
//! Drives the durable cleanup job queue: due jobs are polled on a fixed interval and
//! their blobs deleted from the external store, with a fixed backoff ladder between
//! attempts.

pub mod queue;
pub mod telemetry;

pub use queue::{compute_cleanup_backoff, CleanupJobQueue, CleanupWorker};
