//! Storage quota decision
//!
//! Pure read-then-decide logic: callers load [`QuotaUsage`] for an album and ask
//! [`QuotaValidator::evaluate`] whether a new asset fits. Nothing here touches the
//! network or the database.

use serde::{Deserialize, Serialize};

use crate::models::{MediaKind, StorageTier};

pub(crate) const BASE_IMAGE_LIMIT: i64 = 50;
pub(crate) const BASE_VIDEO_SECONDS_LIMIT: i64 = 300;
pub(crate) const UPGRADED_IMAGE_LIMIT: i64 = 500;
pub(crate) const UPGRADED_VIDEO_SECONDS_LIMIT: i64 = 3600;

/// Thresholds applied to a single storage tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub image_limit: i64,
    pub video_seconds_limit: i64,
}

/// Limits for every tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPolicy {
    pub base: TierLimits,
    pub upgraded: TierLimits,
}

impl QuotaPolicy {
    pub fn limits_for(&self, tier: StorageTier) -> TierLimits {
        match tier {
            StorageTier::Base => self.base,
            StorageTier::Upgraded => self.upgraded,
        }
    }
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            base: TierLimits {
                image_limit: BASE_IMAGE_LIMIT,
                video_seconds_limit: BASE_VIDEO_SECONDS_LIMIT,
            },
            upgraded: TierLimits {
                image_limit: UPGRADED_IMAGE_LIMIT,
                video_seconds_limit: UPGRADED_VIDEO_SECONDS_LIMIT,
            },
        }
    }
}

/// Current consumption of an album. The main image never counts against the quota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub non_main_images: i64,
    pub non_main_video_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaRejection {
    /// A single video is longer than the whole tier allowance.
    VideoTooLong,
    /// Limit reached on the base tier; upgrading would lift it.
    UpgradeRequired,
    /// Limit reached on the upgraded tier.
    TierLimit,
}

impl QuotaRejection {
    pub fn code(&self) -> &'static str {
        match self {
            QuotaRejection::VideoTooLong => "VIDEO_TOO_LONG",
            QuotaRejection::UpgradeRequired => "UPGRADE_REQUIRED",
            QuotaRejection::TierLimit => "TIER_LIMIT",
        }
    }

    fn for_tier(tier: StorageTier) -> Self {
        match tier {
            StorageTier::Base => QuotaRejection::UpgradeRequired,
            StorageTier::Upgraded => QuotaRejection::TierLimit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct QuotaViolation {
    pub rejection: QuotaRejection,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct QuotaValidator {
    policy: QuotaPolicy,
}

impl QuotaValidator {
    pub fn new(policy: QuotaPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Decide whether one more asset of `kind` fits into an album on `tier`.
    ///
    /// `proposed_duration` is only read for videos; a missing value counts as zero
    /// seconds. The aggregate video check is strict: reaching the limit exactly is
    /// allowed.
    pub fn evaluate(
        &self,
        tier: StorageTier,
        kind: MediaKind,
        proposed_duration: Option<i32>,
        usage: &QuotaUsage,
    ) -> Result<(), QuotaViolation> {
        let limits = self.policy.limits_for(tier);

        match kind {
            MediaKind::Video => {
                let proposed = i64::from(proposed_duration.unwrap_or(0).max(0));

                if proposed > limits.video_seconds_limit {
                    return Err(QuotaViolation {
                        rejection: QuotaRejection::VideoTooLong,
                        message: format!(
                            "Video is {}s long; the {} tier allows at most {}s of video",
                            proposed,
                            tier.as_str(),
                            limits.video_seconds_limit
                        ),
                    });
                }

                if usage.non_main_video_seconds + proposed > limits.video_seconds_limit {
                    return Err(QuotaViolation {
                        rejection: QuotaRejection::for_tier(tier),
                        message: format!(
                            "Album video allowance exceeded: {}s used + {}s requested > {}s on the {} tier",
                            usage.non_main_video_seconds,
                            proposed,
                            limits.video_seconds_limit,
                            tier.as_str()
                        ),
                    });
                }
            }
            MediaKind::Image => {
                if usage.non_main_images >= limits.image_limit {
                    return Err(QuotaViolation {
                        rejection: QuotaRejection::for_tier(tier),
                        message: format!(
                            "Album reached the {} tier limit of {} images",
                            tier.as_str(),
                            limits.image_limit
                        ),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(images: i64, video_seconds: i64) -> QuotaUsage {
        QuotaUsage {
            non_main_images: images,
            non_main_video_seconds: video_seconds,
        }
    }

    #[test]
    fn test_image_below_limit_is_allowed() {
        let validator = QuotaValidator::default();
        assert!(validator
            .evaluate(StorageTier::Base, MediaKind::Image, None, &usage(49, 0))
            .is_ok());
    }

    #[test]
    fn test_image_at_limit_is_rejected_per_tier() {
        let validator = QuotaValidator::default();

        let base = validator
            .evaluate(StorageTier::Base, MediaKind::Image, None, &usage(50, 0))
            .unwrap_err();
        assert_eq!(base.rejection, QuotaRejection::UpgradeRequired);
        assert_eq!(base.rejection.code(), "UPGRADE_REQUIRED");

        let upgraded = validator
            .evaluate(StorageTier::Upgraded, MediaKind::Image, None, &usage(500, 0))
            .unwrap_err();
        assert_eq!(upgraded.rejection, QuotaRejection::TierLimit);
        assert!(validator
            .evaluate(StorageTier::Upgraded, MediaKind::Image, None, &usage(499, 0))
            .is_ok());
    }

    #[test]
    fn test_single_long_video_rejected_even_in_empty_album() {
        let validator = QuotaValidator::default();
        for tier in [StorageTier::Base, StorageTier::Upgraded] {
            let limit = validator.policy().limits_for(tier).video_seconds_limit as i32;
            let err = validator
                .evaluate(tier, MediaKind::Video, Some(limit + 1), &usage(0, 0))
                .unwrap_err();
            assert_eq!(err.rejection, QuotaRejection::VideoTooLong);
        }
    }

    #[test]
    fn test_video_aggregate_is_strict() {
        let validator = QuotaValidator::default();

        // 200 + 100 == 300 lands exactly on the limit
        assert!(validator
            .evaluate(StorageTier::Base, MediaKind::Video, Some(100), &usage(0, 200))
            .is_ok());

        let err = validator
            .evaluate(StorageTier::Base, MediaKind::Video, Some(101), &usage(0, 200))
            .unwrap_err();
        assert_eq!(err.rejection, QuotaRejection::UpgradeRequired);

        let err = validator
            .evaluate(StorageTier::Upgraded, MediaKind::Video, Some(2), &usage(0, 3599))
            .unwrap_err();
        assert_eq!(err.rejection, QuotaRejection::TierLimit);
    }

    #[test]
    fn test_image_count_does_not_affect_video() {
        let validator = QuotaValidator::default();
        assert!(validator
            .evaluate(StorageTier::Base, MediaKind::Video, Some(30), &usage(50, 0))
            .is_ok());
    }

    #[test]
    fn test_custom_policy() {
        let validator = QuotaValidator::new(QuotaPolicy {
            base: TierLimits {
                image_limit: 2,
                video_seconds_limit: 10,
            },
            upgraded: TierLimits {
                image_limit: 4,
                video_seconds_limit: 20,
            },
        });
        assert!(validator
            .evaluate(StorageTier::Base, MediaKind::Image, None, &usage(2, 0))
            .is_err());
        assert!(validator
            .evaluate(StorageTier::Upgraded, MediaKind::Image, None, &usage(2, 0))
            .is_ok());
    }
}
