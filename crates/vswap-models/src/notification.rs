//! Notifications and video reports.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::exchange::ExchangeId;
use crate::video::VideoId;

/// Kind of event a notification tells a user about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ExchangeRequested,
    ExchangeAccepted,
    ExchangeRejected,
    ExchangeCancelled,
    RatingReceived,
    VideoFlagged,
    PlanDowngraded,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExchangeRequested => "exchange_requested",
            Self::ExchangeAccepted => "exchange_accepted",
            Self::ExchangeRejected => "exchange_rejected",
            Self::ExchangeCancelled => "exchange_cancelled",
            Self::RatingReceived => "rating_received",
            Self::VideoFlagged => "video_flagged",
            Self::PlanDowngraded => "plan_downgraded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exchange_requested" => Some(Self::ExchangeRequested),
            "exchange_accepted" => Some(Self::ExchangeAccepted),
            "exchange_rejected" => Some(Self::ExchangeRejected),
            "exchange_cancelled" => Some(Self::ExchangeCancelled),
            "rating_received" => Some(Self::RatingReceived),
            "video_flagged" => Some(Self::VideoFlagged),
            "plan_downgraded" => Some(Self::PlanDowngraded),
            _ => None,
        }
    }

    /// Default message shown for this kind.
    pub fn message(&self) -> &'static str {
        match self {
            Self::ExchangeRequested => "You received a new exchange request",
            Self::ExchangeAccepted => "Your exchange request was accepted",
            Self::ExchangeRejected => "Your exchange request was rejected",
            Self::ExchangeCancelled => "An exchange request was cancelled",
            Self::RatingReceived => "You received a new rating",
            Self::VideoFlagged => "One of your videos was flagged as sensitive",
            Self::PlanDowngraded => "Your subscription ended and your plan is now basic",
        }
    }
}

/// A message delivered to one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Notification {
    pub id: String,
    pub user: String,
    pub kind: NotificationKind,
    pub message: String,
    #[serde(default)]
    pub exchange: Option<ExchangeId>,
    #[serde(default)]
    pub video: Option<VideoId>,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(user: impl Into<String>, kind: NotificationKind, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user: user.into(),
            kind,
            message: kind.message().to_string(),
            exchange: None,
            video: None,
            read: false,
            created_at,
        }
    }

    pub fn with_exchange(mut self, id: ExchangeId) -> Self {
        self.exchange = Some(id);
        self
    }

    pub fn with_video(mut self, id: VideoId) -> Self {
        self.video = Some(id);
        self
    }
}

/// A user's report against a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoReport {
    pub id: String,
    pub video: VideoId,
    pub reporter: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl VideoReport {
    pub fn new(
        video: VideoId,
        reporter: impl Into<String>,
        reason: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            video,
            reporter: reporter.into(),
            reason: reason.into(),
            created_at,
        }
    }
}
