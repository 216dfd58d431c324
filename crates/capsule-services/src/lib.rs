//! Capsule services
//!
//! Request-independent building blocks used by the lifecycle orchestrator:
//! content moderation with a single compress-and-retry, image compression, and the
//! idempotency guard.

pub mod compression;
pub mod idempotency;
pub mod moderation;

pub use compression::{ImageCompressor, JpegCompressor};
pub use idempotency::{GuardedResponse, IdempotencyGuard};
pub use moderation::{
    CategoryScores, ContentModerationGateway, ContentScorer, HttpContentScorer,
    ModerationError, ModerationOutcome, ModerationVerdict, ScorerError,
};
