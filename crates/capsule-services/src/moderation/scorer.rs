//! External content scorer

use async_trait::async_trait;
use bytes::Bytes;
use capsule_core::models::MediaKind;
use capsule_core::ModerationConfig;
use serde::Deserialize;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Per-category probabilities in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CategoryScores {
    pub nudity: f64,
    pub violence: f64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ScorerError {
    /// The scorer refused the payload because of its size.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// Transport failure or any other scorer error.
    #[error("scorer request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait ContentScorer: Send + Sync {
    async fn score(&self, data: Bytes, kind: MediaKind) -> Result<CategoryScores, ScorerError>;
}

#[derive(Debug, Deserialize)]
struct ScorerResponse {
    status: String,
    nudity: Option<NudityScores>,
    gore: Option<GoreScores>,
    error: Option<ScorerFailure>,
}

#[derive(Debug, Deserialize)]
struct NudityScores {
    #[serde(default)]
    raw: f64,
}

#[derive(Debug, Deserialize)]
struct GoreScores {
    #[serde(default)]
    prob: f64,
}

#[derive(Debug, Deserialize)]
struct ScorerFailure {
    code: Option<serde_json::Value>,
    message: Option<String>,
}

impl ScorerFailure {
    fn code_string(&self) -> Option<String> {
        match &self.code {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        }
    }
}

/// Scorer reached over HTTP.
///
/// Sends the bytes as a multipart `media` part and expects
/// `{"status":"success","nudity":{"raw":..},"gore":{"prob":..}}` or
/// `{"status":"failure","error":{"code":..,"message":..}}`.
pub struct HttpContentScorer {
    http_client: reqwest::Client,
    api_url: String,
    api_user: Option<String>,
    api_secret: Option<String>,
    oversize_error_code: String,
}

impl Debug for HttpContentScorer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("HttpContentScorer")
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl HttpContentScorer {
    pub fn new(
        api_url: impl Into<String>,
        api_user: Option<String>,
        api_secret: Option<String>,
        oversize_error_code: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client for content scorer: {}", e))?;

        Ok(Self {
            http_client,
            api_url: api_url.into(),
            api_user,
            api_secret,
            oversize_error_code: oversize_error_code.into(),
        })
    }

    /// Build from configuration; `None` when no scorer URL is configured.
    pub fn from_config(config: &ModerationConfig) -> anyhow::Result<Option<Self>> {
        let Some(api_url) = config.api_url.clone() else {
            return Ok(None);
        };

        Self::new(
            api_url,
            config.api_user.clone(),
            config.api_secret.clone(),
            config.oversize_error_code.clone(),
        )
        .map(Some)
    }
}

#[async_trait]
impl ContentScorer for HttpContentScorer {
    async fn score(&self, data: Bytes, kind: MediaKind) -> Result<CategoryScores, ScorerError> {
        let size = data.len();
        let part = reqwest::multipart::Part::bytes(data.to_vec())
            .file_name(format!("upload.{}", kind.as_str()));
        let mut form = reqwest::multipart::Form::new()
            .part("media", part)
            .text("models", "nudity,gore");
        if let Some(user) = &self.api_user {
            form = form.text("api_user", user.clone());
        }
        if let Some(secret) = &self.api_secret {
            form = form.text("api_secret", secret.clone());
        }

        let response = self
            .http_client
            .post(&self.api_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ScorerError::Request(format!("Failed to reach content scorer: {}", e)))?;

        let status = response.status();
        let body: ScorerResponse = response.json().await.map_err(|e| {
            ScorerError::Request(format!(
                "Unreadable content scorer response (status {}): {}",
                status, e
            ))
        })?;

        if body.status != "success" {
            let failure = body.error.unwrap_or(ScorerFailure {
                code: None,
                message: None,
            });
            let message = failure
                .message
                .clone()
                .unwrap_or_else(|| format!("scorer returned status {}", body.status));

            if failure.code_string().as_deref() == Some(self.oversize_error_code.as_str()) {
                tracing::debug!(size_bytes = size, "Content scorer reported oversize payload");
                return Err(ScorerError::PayloadTooLarge(message));
            }
            return Err(ScorerError::Request(message));
        }

        Ok(CategoryScores {
            nudity: body.nudity.map(|n| n.raw).unwrap_or_default(),
            violence: body.gore.map(|g| g.prob).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer(url: String) -> HttpContentScorer {
        HttpContentScorer::new(url, Some("user".into()), Some("secret".into()), "file_too_large")
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_response_maps_scores() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/check")
            .with_status(200)
            .with_body(r#"{"status":"success","nudity":{"raw":0.12},"gore":{"prob":0.95}}"#)
            .create_async()
            .await;

        let scores = scorer(format!("{}/check", server.url()))
            .score(Bytes::from_static(b"img"), MediaKind::Image)
            .await
            .unwrap();
        assert_eq!(
            scores,
            CategoryScores {
                nudity: 0.12,
                violence: 0.95
            }
        );
    }

    #[tokio::test]
    async fn test_oversize_code_is_distinguished() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/check")
            .with_status(200)
            .with_body(r#"{"status":"failure","error":{"code":"file_too_large","message":"too big"}}"#)
            .create_async()
            .await;

        let err = scorer(format!("{}/check", server.url()))
            .score(Bytes::from_static(b"img"), MediaKind::Image)
            .await
            .unwrap_err();
        assert!(matches!(err, ScorerError::PayloadTooLarge(msg) if msg == "too big"));
    }

    #[tokio::test]
    async fn test_other_failures_are_request_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/check")
            .with_status(200)
            .with_body(r#"{"status":"failure","error":{"code":21,"message":"quota exhausted"}}"#)
            .create_async()
            .await;

        let err = scorer(format!("{}/check", server.url()))
            .score(Bytes::from_static(b"img"), MediaKind::Image)
            .await
            .unwrap_err();
        assert!(matches!(err, ScorerError::Request(_)));
    }

    #[test]
    fn test_from_config_without_url() {
        let config = ModerationConfig {
            api_url: None,
            api_user: None,
            api_secret: None,
            oversize_error_code: "file_too_large".to_string(),
            compression_enabled: true,
        };
        assert!(HttpContentScorer::from_config(&config).unwrap().is_none());
    }
}
