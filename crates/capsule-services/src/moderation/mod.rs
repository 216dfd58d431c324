//! Content moderation gateway
//!
//! Scores uploads with an external [`ContentScorer`] and turns the scores into a
//! verdict. When the scorer refuses an image because of its size, the gateway
//! compresses it once and resubmits; it never retries more than that.

mod scorer;

pub use scorer::{CategoryScores, ContentScorer, HttpContentScorer, ScorerError};

use bytes::Bytes;
use capsule_core::constants::MODERATION_SCORE_THRESHOLD;
use capsule_core::models::MediaKind;
use std::sync::Arc;

use crate::compression::ImageCompressor;

#[derive(Debug, Clone, PartialEq)]
pub enum ModerationVerdict {
    Approved,
    /// A category scored at or above its threshold.
    Rejected { category: &'static str, score: f64 },
    /// The scorer could not process the payload and no smaller version was accepted.
    PayloadTooLarge { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModerationOutcome {
    pub verdict: ModerationVerdict,
    /// Whether a compressed copy was submitted. The original bytes are what gets stored.
    pub compressed: bool,
}

impl ModerationOutcome {
    pub fn is_approved(&self) -> bool {
        self.verdict == ModerationVerdict::Approved
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error("content scorer unavailable: {0}")]
    Unavailable(String),
}

pub struct ContentModerationGateway {
    scorer: Option<Arc<dyn ContentScorer>>,
    compressor: Option<Arc<dyn ImageCompressor>>,
    nudity_threshold: f64,
    violence_threshold: f64,
}

impl ContentModerationGateway {
    pub fn new(
        scorer: Arc<dyn ContentScorer>,
        compressor: Option<Arc<dyn ImageCompressor>>,
    ) -> Self {
        Self {
            scorer: Some(scorer),
            compressor,
            nudity_threshold: MODERATION_SCORE_THRESHOLD,
            violence_threshold: MODERATION_SCORE_THRESHOLD,
        }
    }

    /// Gateway that approves everything. For development setups without a scorer.
    pub fn disabled() -> Self {
        Self {
            scorer: None,
            compressor: None,
            nudity_threshold: MODERATION_SCORE_THRESHOLD,
            violence_threshold: MODERATION_SCORE_THRESHOLD,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.scorer.is_some()
    }

    fn verdict(&self, scores: CategoryScores) -> ModerationVerdict {
        if scores.nudity >= self.nudity_threshold {
            return ModerationVerdict::Rejected {
                category: "nudity",
                score: scores.nudity,
            };
        }
        if scores.violence >= self.violence_threshold {
            return ModerationVerdict::Rejected {
                category: "violence",
                score: scores.violence,
            };
        }
        ModerationVerdict::Approved
    }

    #[tracing::instrument(skip(self, data), fields(kind = %kind, size_bytes = data.len()))]
    pub async fn moderate(
        &self,
        data: Bytes,
        kind: MediaKind,
    ) -> Result<ModerationOutcome, ModerationError> {
        let Some(scorer) = &self.scorer else {
            tracing::debug!("Moderation disabled, approving");
            return Ok(ModerationOutcome {
                verdict: ModerationVerdict::Approved,
                compressed: false,
            });
        };

        let reason = match scorer.score(data.clone(), kind).await {
            Ok(scores) => {
                return Ok(ModerationOutcome {
                    verdict: self.verdict(scores),
                    compressed: false,
                });
            }
            Err(ScorerError::PayloadTooLarge(reason)) => reason,
            Err(ScorerError::Request(e)) => return Err(ModerationError::Unavailable(e)),
        };

        let compressor = match (&self.compressor, kind) {
            (Some(compressor), MediaKind::Image) => compressor.clone(),
            _ => {
                tracing::info!(reason = %reason, "Payload too large and cannot be compressed");
                return Ok(ModerationOutcome {
                    verdict: ModerationVerdict::PayloadTooLarge { reason },
                    compressed: false,
                });
            }
        };

        let compressed = match tokio::task::spawn_blocking(move || compressor.compress(&data)).await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Compression for moderation failed");
                return Ok(ModerationOutcome {
                    verdict: ModerationVerdict::PayloadTooLarge {
                        reason: format!("{}; compression failed: {}", reason, e),
                    },
                    compressed: false,
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "Compression task panicked");
                return Ok(ModerationOutcome {
                    verdict: ModerationVerdict::PayloadTooLarge {
                        reason: format!("{}; compression failed", reason),
                    },
                    compressed: false,
                });
            }
        };

        tracing::info!(
            compressed_bytes = compressed.len(),
            "Resubmitting compressed image to moderation"
        );

        match scorer.score(compressed, kind).await {
            Ok(scores) => Ok(ModerationOutcome {
                verdict: self.verdict(scores),
                compressed: true,
            }),
            Err(ScorerError::PayloadTooLarge(reason)) => Ok(ModerationOutcome {
                verdict: ModerationVerdict::PayloadTooLarge { reason },
                compressed: true,
            }),
            Err(ScorerError::Request(e)) => Err(ModerationError::Unavailable(e)),
        }
    }
}
