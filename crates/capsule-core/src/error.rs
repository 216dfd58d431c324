//! Error types module
//!
//! All failures the lifecycle services can surface are unified under [`AppError`].
//! Each variant self-describes its HTTP rendering through [`ErrorMetadata`], and
//! [`AppError::to_error_body`] produces the `(code, message, http_status)` triple
//! returned to callers.
//!
//! `Database` wraps `sqlx::Error` only when the `sqlx` feature is on.

use serde::{Deserialize, Serialize};

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

use crate::quota::{QuotaRejection, QuotaViolation};

/// Severity the HTTP layer logs a failure at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Caller mistakes such as a malformed upload
    Debug,
    /// Expected refusals: quota, moderation
    Warn,
    /// Dependency outages and broken invariants
    Error,
}

/// How a failure is rendered to callers and logged.
pub trait ErrorMetadata {
    fn http_status_code(&self) -> u16;

    /// Stable code clients branch on, e.g. `UPLOAD_FAILED`.
    fn error_code(&self) -> &'static str;

    /// The same request may succeed if retried unchanged.
    fn is_recoverable(&self) -> bool;

    fn suggested_action(&self) -> Option<&'static str>;

    /// Message safe to show the caller.
    fn client_message(&self) -> String;

    /// Internal details must stay out of the response body.
    fn is_sensitive(&self) -> bool;

    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(QuotaViolation),

    #[error("Content rejected by moderation: {0}")]
    ModerationRejected(String),

    #[error("Moderation could not process the payload: {0}")]
    ModerationPayloadTooLarge(String),

    #[error("Moderation service unavailable: {0}")]
    ModerationUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Blob upload failed: {0}")]
    UploadFailed(String),

    #[error("Catalog write failed: {0}")]
    CatalogWriteFailed(String),

    #[error("Metadata publish failed: {0}")]
    PublishFailed(String),

    #[error("Cleanup scheduling failed: {0}")]
    CleanupSchedulingFailed(String),

    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<QuotaViolation> for AppError {
    fn from(violation: QuotaViolation) -> Self {
        AppError::QuotaExceeded(violation)
    }
}

/// `(status, code, recoverable, suggested_action, sensitive, log_level)` per variant.
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::Validation(_) => (
            400,
            "VALIDATION_ERROR",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::QuotaExceeded(violation) => (
            400,
            violation.rejection.code(),
            false,
            match violation.rejection {
                QuotaRejection::UpgradeRequired => Some("Upgrade the album storage tier"),
                QuotaRejection::TierLimit => Some("Remove existing media before uploading more"),
                QuotaRejection::VideoTooLong => Some("Trim the video below the tier limit"),
            },
            false,
            LogLevel::Warn,
        ),
        AppError::ModerationRejected(_) => (
            400,
            "CONTENT_REJECTED",
            false,
            None,
            false,
            LogLevel::Warn,
        ),
        AppError::ModerationPayloadTooLarge(_) => (
            400,
            "MODERATION_PAYLOAD_TOO_LARGE",
            false,
            Some("Upload a smaller file"),
            false,
            LogLevel::Warn,
        ),
        AppError::ModerationUnavailable(_) => (
            502,
            "MODERATION_UNAVAILABLE",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Verify the resource ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::UploadFailed(_) => (
            502,
            "UPLOAD_FAILED",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::CatalogWriteFailed(_) => (
            500,
            "CATALOG_WRITE_FAILED",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::PublishFailed(_) => (
            500,
            "METADATA_PUBLISH_FAILED",
            true,
            Some("Reload the album and submit the changes again"),
            true,
            LogLevel::Error,
        ),
        AppError::CleanupSchedulingFailed(_) => (
            500,
            "CLEANUP_SCHEDULING_FAILED",
            true,
            None,
            true,
            LogLevel::Error,
        ),
        AppError::Database(_) => (
            500,
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Display of this error followed by up to five `Caused by:` lines.
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }

    /// Structured body returned to callers for this error.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody::new(
            self.error_code(),
            self.client_message(),
            self.http_status_code(),
        )
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::QuotaExceeded(violation) => violation.message.clone(),
            AppError::ModerationRejected(msg) => msg.clone(),
            AppError::ModerationPayloadTooLarge(msg) => msg.clone(),
            AppError::ModerationUnavailable(_) => {
                "Content moderation is temporarily unavailable".to_string()
            }
            AppError::NotFound(msg) => msg.clone(),
            AppError::UploadFailed(_) => "Failed to upload media to storage".to_string(),
            AppError::CatalogWriteFailed(_) => "Failed to save media".to_string(),
            AppError::PublishFailed(_) => {
                "Failed to publish changes; no changes were applied".to_string()
            }
            AppError::CleanupSchedulingFailed(_) => "Internal server error".to_string(),
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
        }
    }
}

/// The `(code, message, http_status)` triple every failure renders to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub http_status: u16,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>, http_status: u16) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            http_status,
        }
    }

    /// Serialized JSON bytes of this body.
    pub fn to_json_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::QuotaViolation;

    #[test]
    fn test_error_metadata_database() {
        #[cfg(feature = "sqlx")]
        let err = AppError::from(sqlx::Error::PoolClosed);
        #[cfg(not(feature = "sqlx"))]
        let err = AppError::Database("pool closed".to_string());
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert!(err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to access database");
        assert!(err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_quota_error_uses_rejection_code() {
        let err = AppError::from(QuotaViolation {
            rejection: QuotaRejection::UpgradeRequired,
            message: "Album reached the base tier limit of 50 images".to_string(),
        });
        assert_eq!(err.http_status_code(), 400);
        assert_eq!(err.error_code(), "UPGRADE_REQUIRED");
        assert!(!err.is_recoverable());
        assert!(err.client_message().contains("50"));
    }

    #[test]
    fn test_upload_and_catalog_failures_are_server_side() {
        let upload = AppError::UploadFailed("cdn timeout".to_string());
        assert_eq!(upload.http_status_code(), 502);
        assert_eq!(upload.error_code(), "UPLOAD_FAILED");

        let catalog = AppError::CatalogWriteFailed("unique violation".to_string());
        assert_eq!(catalog.http_status_code(), 500);
        assert_eq!(catalog.error_code(), "CATALOG_WRITE_FAILED");
        // internal detail stays out of the client message
        assert!(!catalog.client_message().contains("unique"));
    }

    #[test]
    fn test_cleanup_scheduling_failure_hides_details() {
        let err = AppError::CleanupSchedulingFailed("cleanup table unavailable".to_string());
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "CLEANUP_SCHEDULING_FAILED");
        assert!(err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Error);
        assert_eq!(err.client_message(), "Internal server error");
    }

    #[test]
    fn test_error_body_triple() {
        let err = AppError::PublishFailed("statement 2 matched no rows".to_string());
        let body = err.to_error_body();
        assert_eq!(body.code, "METADATA_PUBLISH_FAILED");
        assert_eq!(body.http_status, 500);
        assert_eq!(
            body.message,
            "Failed to publish changes; no changes were applied"
        );

        let parsed: ErrorBody = serde_json::from_slice(&body.to_json_bytes()).unwrap();
        assert_eq!(parsed, body);
    }

    #[test]
    fn test_detailed_message_includes_source_chain() {
        let err = AppError::from(anyhow::anyhow!("connection reset").context("insert media row"));
        let details = err.detailed_message();
        assert!(details.contains("Internal error with source"));
        assert!(details.contains("insert media row"));
    }
}
