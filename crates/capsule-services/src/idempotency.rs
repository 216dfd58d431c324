//! Idempotency guard
//!
//! Deduplicates retried requests. A request is identified by its normalized endpoint
//! plus the client-supplied key. The first request claims the key, runs, and stores
//! its `(status, body)`; duplicates replay that result without running the handler.

use capsule_core::constants::MAX_IDEMPOTENCY_KEY_LENGTH;
use capsule_core::models::IdempotencyStatus;
use capsule_core::{ErrorBody, IdempotencyConfig};
use capsule_db::IdempotencyStore;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of a guarded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// True when the body came from a stored earlier response.
    pub replayed: bool,
}

impl GuardedResponse {
    fn fresh(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            body,
            replayed: false,
        }
    }

    fn error(code: &str, message: &str, status: u16) -> Self {
        Self::fresh(status, ErrorBody::new(code, message, status).to_json_bytes())
    }
}

/// Lowercase the path, drop the query string, collapse repeated slashes and trim the trailing one.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let path = endpoint.split(['?', '#']).next().unwrap_or_default();

    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        normalized.push('/');
        normalized.push_str(&segment.to_lowercase());
    }

    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// Storage key for an endpoint and client key.
pub fn record_key(endpoint: &str, client_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_endpoint(endpoint).as_bytes());
    hasher.update(b":");
    hasher.update(client_key.as_bytes());
    format!("idem:{}", hex::encode(hasher.finalize()))
}

#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
    processing_ttl: Duration,
    completed_ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn IdempotencyStore>, config: IdempotencyConfig) -> Self {
        Self {
            store,
            processing_ttl: config.processing_ttl,
            completed_ttl: config.completed_ttl,
        }
    }

    fn validate_key(client_key: Option<&str>) -> Result<&str, GuardedResponse> {
        let Some(key) = client_key else {
            return Err(GuardedResponse::error(
                "IDEMPOTENCY_KEY_REQUIRED",
                "Idempotency-Key header is required",
                400,
            ));
        };

        if key.trim().is_empty() || key.chars().count() > MAX_IDEMPOTENCY_KEY_LENGTH {
            return Err(GuardedResponse::error(
                "INVALID_IDEMPOTENCY_KEY",
                "Idempotency-Key must be 1 to 256 characters",
                400,
            ));
        }

        Ok(key)
    }

    fn in_progress() -> GuardedResponse {
        GuardedResponse::error(
            "IDEMPOTENCY_IN_PROGRESS",
            "A request with this Idempotency-Key is still being processed",
            409,
        )
    }

    /// Look up a stored response. `Ok(None)` means no live record.
    async fn lookup(&self, key: &str) -> anyhow::Result<Option<GuardedResponse>> {
        let Some(record) = self.store.get(key).await? else {
            return Ok(None);
        };

        match (record.status, record.cached_status, record.cached_body) {
            (IdempotencyStatus::Completed, Some(status), Some(body)) => Ok(Some(GuardedResponse {
                status,
                body,
                replayed: true,
            })),
            _ => Ok(Some(Self::in_progress())),
        }
    }

    /// Run `handler` at most once per `(endpoint, client_key)` within the completed TTL.
    ///
    /// Responses with status >= 500 are not stored; the claim is released so the client
    /// can retry. When the record store itself fails, the handler runs unguarded.
    #[tracing::instrument(skip(self, client_key, handler), fields(endpoint = %endpoint))]
    pub async fn execute<F, Fut>(
        &self,
        endpoint: &str,
        client_key: Option<&str>,
        handler: F,
    ) -> GuardedResponse
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (u16, Vec<u8>)>,
    {
        let client_key = match Self::validate_key(client_key) {
            Ok(key) => key,
            Err(response) => return response,
        };
        let key = record_key(endpoint, client_key);

        match self.lookup(&key).await {
            Ok(Some(response)) => {
                debug!(replayed = response.replayed, "Idempotency record found");
                return response;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Idempotency store unavailable, running request unguarded");
                let (status, body) = handler().await;
                return GuardedResponse::fresh(status, body);
            }
        }

        match self.store.try_claim(&key, self.processing_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                // Lost the race; the winner may already have finished.
                return match self.lookup(&key).await {
                    Ok(Some(response)) => response,
                    _ => Self::in_progress(),
                };
            }
            Err(e) => {
                warn!(error = %e, "Failed to claim idempotency key, running request unguarded");
                let (status, body) = handler().await;
                return GuardedResponse::fresh(status, body);
            }
        }

        let (status, body) = handler().await;

        if status < 500 {
            if let Err(e) = self
                .store
                .put_completed(&key, status, &body, self.completed_ttl)
                .await
            {
                warn!(error = %e, status, "Failed to store idempotent response");
            }
        } else if let Err(e) = self.store.delete(&key).await {
            warn!(error = %e, status, "Failed to release idempotency claim");
        }

        GuardedResponse::fresh(status, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use capsule_core::models::IdempotencyRecord;
    use capsule_db::InMemoryIdempotencyStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn guard(store: Arc<InMemoryIdempotencyStore>) -> IdempotencyGuard {
        IdempotencyGuard::new(store, IdempotencyConfig::default())
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("/Albums//42/Media/?x=1"), "/albums/42/media");
        assert_eq!(normalize_endpoint("albums/42"), "/albums/42");
        assert_eq!(normalize_endpoint("/"), "/");
        assert_eq!(normalize_endpoint("?only=query"), "/");
    }

    #[test]
    fn test_record_key_ignores_cosmetic_differences() {
        let a = record_key("/albums/42/media", "abc");
        let b = record_key("/ALBUMS/42/media/?retry=1", "abc");
        assert_eq!(a, b);
        assert!(a.starts_with("idem:"));
        assert_eq!(a.len(), "idem:".len() + 64);
        assert_ne!(a, record_key("/albums/42/media", "abd"));
        assert_ne!(a, record_key("/albums/43/media", "abc"));
    }

    #[tokio::test]
    async fn test_key_validation() {
        let guard = guard(Arc::new(InMemoryIdempotencyStore::new()));

        let missing = guard.execute("/media", None, || async { (201, vec![]) }).await;
        assert_eq!(missing.status, 400);
        let body: ErrorBody = serde_json::from_slice(&missing.body).unwrap();
        assert_eq!(body.code, "IDEMPOTENCY_KEY_REQUIRED");

        let long_key = "k".repeat(257);
        let too_long = guard
            .execute("/media", Some(&long_key), || async { (201, vec![]) })
            .await;
        let body: ErrorBody = serde_json::from_slice(&too_long.body).unwrap();
        assert_eq!(body.code, "INVALID_IDEMPOTENCY_KEY");

        let blank = guard.execute("/media", Some("  "), || async { (201, vec![]) }).await;
        assert_eq!(blank.status, 400);

        let max_key = "k".repeat(256);
        let ok = guard
            .execute("/media", Some(&max_key), || async { (201, vec![1]) })
            .await;
        assert_eq!(ok.status, 201);
    }

    #[tokio::test]
    async fn test_replays_client_errors_but_not_server_errors() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let guard = guard(store.clone());
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let response = guard
                .execute("/media", Some("bad-request"), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (400, b"nope".to_vec())
                })
                .await;
            assert_eq!(response.status, 400);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        calls.store(0, Ordering::SeqCst);
        for _ in 0..2 {
            let response = guard
                .execute("/media", Some("server-error"), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (502, b"upstream".to_vec())
                })
                .await;
            assert!(!response.replayed);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_processing_record_conflicts() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let guard = guard(store.clone());
        store
            .try_claim(&record_key("/media", "busy"), Duration::from_secs(60))
            .await
            .unwrap();

        let response = guard
            .execute("/media", Some("busy"), || async { (201, vec![]) })
            .await;
        assert_eq!(response.status, 409);
        let body: ErrorBody = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body.code, "IDEMPOTENCY_IN_PROGRESS");
    }

    struct DownStore;

    #[async_trait]
    impl IdempotencyStore for DownStore {
        async fn get(&self, _key: &str) -> anyhow::Result<Option<IdempotencyRecord>> {
            Err(anyhow::anyhow!("connection refused"))
        }
        async fn try_claim(&self, _key: &str, _ttl: Duration) -> anyhow::Result<bool> {
            Err(anyhow::anyhow!("connection refused"))
        }
        async fn put_completed(
            &self,
            _key: &str,
            _status: u16,
            _body: &[u8],
            _ttl: Duration,
        ) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("connection refused"))
        }
        async fn delete(&self, _key: &str) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("connection refused"))
        }
        async fn purge_expired(&self) -> anyhow::Result<u64> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_store_outage_fails_open() {
        let guard = IdempotencyGuard::new(Arc::new(DownStore), IdempotencyConfig::default());
        let response = guard
            .execute("/media", Some("k"), || async { (201, b"created".to_vec()) })
            .await;
        assert_eq!(response.status, 201);
        assert_eq!(response.body, b"created");
        assert!(!response.replayed);
    }
}
