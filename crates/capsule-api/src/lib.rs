//! Capsule API
//!
//! The media lifecycle orchestrator, the atomic metadata publisher and the quota
//! check, plus the axum pieces (error rendering, idempotency middleware, shared
//! state) an HTTP layer mounts them with.

pub mod error;
pub mod middleware;
pub mod services;
pub mod setup;
pub mod state;

pub use error::HttpAppError;
pub use services::{BatchPublisher, MediaLifecycleService, QuotaService, UploadMediaRequest};
pub use state::AppState;
