//! Capsule Core Library
//!
//! Domain models, error types, configuration and the pure quota decision shared by
//! every Capsule crate.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod quota;

// Re-export commonly used types
pub use config::{
    BlobBackend, BlobConfig, CapsuleConfig, CleanupConfig, DatabaseConfig, IdempotencyConfig,
    ModerationConfig, UploadLimits,
};
pub use error::{AppError, ErrorBody, ErrorMetadata, LogLevel};
pub use quota::{QuotaPolicy, QuotaRejection, QuotaUsage, QuotaValidator, QuotaViolation, TierLimits};
