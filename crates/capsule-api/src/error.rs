//! HTTP error response conversion
//!
//! Handlers return `Result<impl IntoResponse, HttpAppError>`; any `AppError` converts
//! with `?` and renders as an [`ErrorBody`] with the matching status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use capsule_core::{AppError, ErrorBody, ErrorMetadata, LogLevel};

/// Wrapper so `IntoResponse` can be implemented for the core error type.
#[derive(Debug)]
pub struct HttpAppError(pub AppError);

impl From<AppError> for HttpAppError {
    fn from(err: AppError) -> Self {
        HttpAppError(err)
    }
}

impl From<anyhow::Error> for HttpAppError {
    fn from(err: anyhow::Error) -> Self {
        HttpAppError(AppError::from(err))
    }
}

pub(crate) fn log_error(error: &AppError) {
    let code = error.error_code();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, code, "Request failed");
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, code, "Request failed");
        }
        LogLevel::Error => {
            tracing::error!(error = %error.detailed_message(), code, "Request failed");
        }
    }
}

/// Status code for an error, falling back to 500 for anything out of range.
pub fn status_of(error: &AppError) -> StatusCode {
    StatusCode::from_u16(error.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let app_error = &self.0;
        log_error(app_error);

        let body: ErrorBody = app_error.to_error_body();
        (status_of(app_error), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_core::{QuotaRejection, QuotaViolation};

    async fn render(error: AppError) -> (StatusCode, ErrorBody) {
        let response = HttpAppError(error).into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_quota_error_renders_tier_code() {
        let (status, body) = render(AppError::QuotaExceeded(QuotaViolation {
            rejection: QuotaRejection::TierLimit,
            message: "full".to_string(),
        }))
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "TIER_LIMIT");
        assert_eq!(body.http_status, 400);
    }

    #[tokio::test]
    async fn test_server_errors_hide_details() {
        let (status, body) = render(AppError::CatalogWriteFailed(
            "duplicate key value violates unique constraint".to_string(),
        ))
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, "CATALOG_WRITE_FAILED");
        assert!(!body.message.contains("duplicate key"));
    }
}
