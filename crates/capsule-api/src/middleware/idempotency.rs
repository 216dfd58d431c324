//! Idempotency middleware
//!
//! Runs mutating requests through the [`IdempotencyGuard`]: a retried request with the
//! same `Idempotency-Key` on the same endpoint gets the stored response back instead of
//! executing again. Replays carry `X-Idempotent-Replayed: true`.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use capsule_core::constants::IDEMPOTENCY_KEY_HEADER;
use capsule_core::ErrorBody;
use capsule_services::IdempotencyGuard;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

pub const REPLAYED_HEADER: &str = "X-Idempotent-Replayed";

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

pub async fn idempotency_middleware(
    State(guard): State<Arc<IdempotencyGuard>>,
    request: Request,
    next: Next,
) -> Response {
    if !is_mutating(request.method()) {
        return next.run(request).await;
    }

    // A header that is not valid UTF-8 is treated as blank and rejected by the guard.
    let client_key = request
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|value| value.to_str().map(str::to_owned).unwrap_or_default());
    let endpoint = request.uri().path().to_owned();

    let fresh_headers: Mutex<Option<HeaderMap>> = Mutex::new(None);
    let slot = &fresh_headers;

    let guarded = guard
        .execute(&endpoint, client_key.as_deref(), move || async move {
            let (parts, body) = next.run(request).await.into_parts();
            match axum::body::to_bytes(body, usize::MAX).await {
                Ok(bytes) => {
                    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(parts.headers);
                    (parts.status.as_u16(), bytes.to_vec())
                }
                Err(e) => {
                    warn!(error = %e, "Failed to buffer response body");
                    let status = StatusCode::INTERNAL_SERVER_ERROR.as_u16();
                    let body = ErrorBody::new("INTERNAL_ERROR", "Internal server error", status);
                    (status, body.to_json_bytes())
                }
            }
        })
        .await;

    let status = StatusCode::from_u16(guarded.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Body::from(guarded.body)).into_response();

    let headers = fresh_headers
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);
    match headers {
        Some(headers) if !guarded.replayed => {
            // `append` keeps repeated headers such as `Set-Cookie`.
            for (name, value) in headers.iter() {
                if name != header::CONTENT_LENGTH {
                    response.headers_mut().append(name.clone(), value.clone());
                }
            }
        }
        _ => {
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }
    }

    if guarded.replayed {
        debug!(endpoint = %endpoint, status = guarded.status, "Returning replayed response");
        response
            .headers_mut()
            .insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
    }

    response
}
