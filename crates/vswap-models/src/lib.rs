//! Shared data models for the VideoSwap backend.
//!
//! This crate provides Serde-serializable types for:
//! - Users, videos and their ownership history
//! - Exchanges and the exchange status state machine
//! - Subscription plans and quota evaluation
//! - Ratings and running aggregates
//! - Notifications, reports and moderation verdicts
//!
//! Everything here is pure: no I/O, no clocks except where a caller passes one in.

pub mod exchange;
pub mod moderation;
pub mod notification;
pub mod period;
pub mod plan;
pub mod quota;
pub mod rating;
pub mod subscription;
pub mod user;
pub mod video;

// Re-export common types
pub use exchange::{
    pair_key, Exchange, ExchangeDecision, ExchangeId, ExchangeRole, ExchangeStatus,
    TransitionError,
};
pub use moderation::{ModerationFrame, ModerationVerdict};
pub use notification::{Notification, NotificationKind, VideoReport};
pub use period::MonthWindow;
pub use plan::{format_bytes, Plan, PlanFeatures, PlanTier};
pub use quota::{LibraryUsage, QuotaViolation};
pub use rating::{Rating, RatingAggregate, MAX_RATING, MIN_RATING};
pub use subscription::{BillingState, BillingStatus, SubscriptionRef};
pub use user::User;
pub use video::{Video, VideoId};
