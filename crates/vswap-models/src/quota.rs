//! Quota evaluation against a subscription plan.
//!
//! All checks are pure: callers gather usage from the store and pass it in.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::plan::{format_bytes, Plan, PlanTier};
use crate::video::Video;

/// Current library usage of one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LibraryUsage {
    /// Videos the user currently owns.
    pub videos: u32,
    /// Sum of their sizes in bytes.
    pub bytes: u64,
}

impl LibraryUsage {
    /// Usage of `uid` over a set of videos, counting only those it currently owns.
    pub fn of_owner<'a, I>(uid: &str, videos: I) -> Self
    where
        I: IntoIterator<Item = &'a Video>,
    {
        videos
            .into_iter()
            .filter(|v| v.is_owned_by(uid))
            .fold(Self::default(), |acc, v| Self {
                videos: acc.videos.saturating_add(1),
                bytes: acc.bytes.saturating_add(v.size),
            })
    }
}

/// A quota the requested operation would exceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaViolation {
    VideoTooLarge { plan: PlanTier, size: u64, limit: u64 },
    LibraryFull { plan: PlanTier, count: u32, limit: u32 },
    StorageExceeded {
        plan: PlanTier,
        used: u64,
        requested: u64,
        limit: u64,
    },
    ExchangeLimitReached { plan: PlanTier, used: u32, limit: u32 },
}

impl QuotaViolation {
    /// Short quota name, used as a metrics label.
    pub fn quota_name(&self) -> &'static str {
        match self {
            Self::VideoTooLarge { .. } => "video_max_size",
            Self::LibraryFull { .. } => "library_size",
            Self::StorageExceeded { .. } => "library_storage",
            Self::ExchangeLimitReached { .. } => "exchange_limit",
        }
    }
}

impl std::fmt::Display for QuotaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VideoTooLarge { plan, size, limit } => write!(
                f,
                "Video size {} exceeds the {} plan's per-video limit of {} by {}",
                format_bytes(*size),
                plan,
                format_bytes(*limit),
                format_bytes(size.saturating_sub(*limit))
            ),
            Self::LibraryFull { plan, count, limit } => write!(
                f,
                "Library already holds {} videos; the {} plan allows at most {}",
                count, plan, limit
            ),
            Self::StorageExceeded {
                plan,
                used,
                requested,
                limit,
            } => write!(
                f,
                "Uploading {} would use {} of the {} plan's {} storage, {} over the limit",
                format_bytes(*requested),
                format_bytes(used.saturating_add(*requested)),
                plan,
                format_bytes(*limit),
                format_bytes(used.saturating_add(*requested).saturating_sub(*limit))
            ),
            Self::ExchangeLimitReached { plan, used, limit } => write!(
                f,
                "Monthly exchange limit reached: {} of {} requests used on the {} plan",
                used, limit, plan
            ),
        }
    }
}

impl std::error::Error for QuotaViolation {}

/// Reject an upload larger than the plan's per-video ceiling.
pub fn check_video_size(plan: &Plan, size: u64) -> Result<(), QuotaViolation> {
    if size > plan.video_max_size {
        return Err(QuotaViolation::VideoTooLarge {
            plan: plan.name,
            size,
            limit: plan.video_max_size,
        });
    }
    Ok(())
}

/// Reject when the library already holds `library_size` videos.
pub fn check_library_count(plan: &Plan, usage: &LibraryUsage) -> Result<(), QuotaViolation> {
    if usage.videos >= plan.library_size {
        return Err(QuotaViolation::LibraryFull {
            plan: plan.name,
            count: usage.videos,
            limit: plan.library_size,
        });
    }
    Ok(())
}

/// Reject when the new video would push total storage over the plan limit.
pub fn check_storage(plan: &Plan, usage: &LibraryUsage, size: u64) -> Result<(), QuotaViolation> {
    if usage.bytes.saturating_add(size) > plan.library_storage {
        return Err(QuotaViolation::StorageExceeded {
            plan: plan.name,
            used: usage.bytes,
            requested: size,
            limit: plan.library_storage,
        });
    }
    Ok(())
}

/// Reject a new exchange request when the monthly quota is used up.
///
/// `initiated_this_month` counts exchanges the user initiated in the current
/// month window, whatever their status.
pub fn check_exchange_count(plan: &Plan, initiated_this_month: u32) -> Result<(), QuotaViolation> {
    if !plan.has_unlimited_exchanges() && initiated_this_month >= plan.exchange_limit {
        return Err(QuotaViolation::ExchangeLimitReached {
            plan: plan.name,
            used: initiated_this_month,
            limit: plan.exchange_limit,
        });
    }
    Ok(())
}

/// All upload checks, in the order they are reported.
pub fn evaluate_upload(plan: &Plan, usage: &LibraryUsage, size: u64) -> Result<(), QuotaViolation> {
    check_video_size(plan, size)?;
    check_library_count(plan, usage)?;
    check_storage(plan, usage, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const MB: u64 = 1024 * 1024;

    fn plan(library_size: u32, library_storage: u64, video_max_size: u64, exchange_limit: u32) -> Plan {
        Plan {
            library_size,
            library_storage,
            video_max_size,
            exchange_limit,
            ..Plan::default()
        }
    }

    #[test]
    fn test_video_size_boundary() {
        let p = plan(10, 1000 * MB, 100 * MB, 5);
        assert!(check_video_size(&p, 100 * MB).is_ok());
        let err = check_video_size(&p, 100 * MB + 1).unwrap_err();
        assert_eq!(err.quota_name(), "video_max_size");
    }

    #[test]
    fn test_library_count_rejects_at_limit() {
        let p = plan(3, 1000 * MB, 100 * MB, 5);
        let below = LibraryUsage { videos: 2, bytes: 0 };
        let at = LibraryUsage { videos: 3, bytes: 0 };
        assert!(check_library_count(&p, &below).is_ok());
        assert_eq!(
            check_library_count(&p, &at),
            Err(QuotaViolation::LibraryFull {
                plan: PlanTier::Basic,
                count: 3,
                limit: 3
            })
        );
    }

    #[test]
    fn test_storage_includes_new_video() {
        let p = plan(10, 100 * MB, 100 * MB, 5);
        let usage = LibraryUsage { videos: 1, bytes: 60 * MB };
        assert!(check_storage(&p, &usage, 40 * MB).is_ok());
        assert!(check_storage(&p, &usage, 40 * MB + 1).is_err());
    }

    #[test]
    fn test_exchange_limit_zero_is_unlimited() {
        let p = plan(10, 100 * MB, 100 * MB, 0);
        assert!(check_exchange_count(&p, 10_000).is_ok());
    }

    #[test]
    fn test_exchange_limit_blocks_kth_plus_one() {
        let p = plan(10, 100 * MB, 100 * MB, 5);
        assert!(check_exchange_count(&p, 4).is_ok());
        let err = check_exchange_count(&p, 5).unwrap_err();
        assert_eq!(err.quota_name(), "exchange_limit");
        assert!(err.to_string().contains("5 of 5"));
        assert!(err.to_string().contains("basic"));
    }

    #[test]
    fn test_evaluate_upload_reports_size_first() {
        let p = plan(1, 10 * MB, 5 * MB, 5);
        let full = LibraryUsage { videos: 1, bytes: 10 * MB };
        let err = evaluate_upload(&p, &full, 6 * MB).unwrap_err();
        assert_eq!(err.quota_name(), "video_max_size");
        let err = evaluate_upload(&p, &full, MB).unwrap_err();
        assert_eq!(err.quota_name(), "library_size");
    }

    #[test]
    fn test_messages_name_the_limit() {
        let err = QuotaViolation::StorageExceeded {
            plan: PlanTier::Advanced,
            used: 900 * MB,
            requested: 200 * MB,
            limit: 1024 * MB,
        };
        let msg = err.to_string();
        assert!(msg.contains("advanced"));
        assert!(msg.contains("1.00 GB"));
        assert!(msg.contains("76.00 MB over"));
    }

    #[test]
    fn test_usage_counts_only_current_ownership() {
        let now = Utc::now();
        let mut traded = Video::uploaded("alice", "a", 10, "h1", now);
        traded.hand_over_to("bob");
        let kept = Video::uploaded("alice", "b", 20, "h2", now);
        let received = {
            let mut v = Video::uploaded("bob", "c", 40, "h3", now);
            v.hand_over_to("alice");
            v
        };

        let usage = LibraryUsage::of_owner("alice", [&traded, &kept, &received]);
        assert_eq!(usage, LibraryUsage { videos: 2, bytes: 60 });
    }
}
