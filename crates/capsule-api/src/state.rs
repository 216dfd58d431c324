//! Application state shared by handlers and middleware.
//!
//! Every service is built once at startup and shared through `Arc`; middleware pulls
//! just the piece it needs via `FromRef`.

use axum::extract::FromRef;
use capsule_core::CapsuleConfig;
use capsule_db::MediaCatalog;
use capsule_services::IdempotencyGuard;
use capsule_worker::CleanupJobQueue;
use std::sync::Arc;

use crate::services::{BatchPublisher, MediaLifecycleService};

#[derive(Clone)]
pub struct AppState {
    pub config: CapsuleConfig,
    pub catalog: Arc<dyn MediaCatalog>,
    pub media: Arc<MediaLifecycleService>,
    pub publisher: Arc<BatchPublisher>,
    pub cleanup: Arc<CleanupJobQueue>,
    pub idempotency: Arc<IdempotencyGuard>,
}

impl FromRef<AppState> for Arc<IdempotencyGuard> {
    fn from_ref(state: &AppState) -> Self {
        state.idempotency.clone()
    }
}

impl FromRef<AppState> for Arc<MediaLifecycleService> {
    fn from_ref(state: &AppState) -> Self {
        state.media.clone()
    }
}

impl FromRef<AppState> for Arc<BatchPublisher> {
    fn from_ref(state: &AppState) -> Self {
        state.publisher.clone()
    }
}
