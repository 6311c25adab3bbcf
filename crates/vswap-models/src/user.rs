//! User records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::exchange::ExchangeId;
use crate::rating::RatingAggregate;
use crate::subscription::SubscriptionRef;
use crate::video::VideoId;

/// User record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct User {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Library, in the order videos were acquired.
    #[serde(default)]
    pub videos: Vec<VideoId>,
    /// Exchanges the user is a party to.
    #[serde(default)]
    pub exchanges: Vec<ExchangeId>,
    #[serde(default)]
    pub subscription: SubscriptionRef,
    #[serde(default)]
    pub rating: RatingAggregate,
    #[serde(default)]
    pub role: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// New user on the basic plan.
    pub fn new(uid: impl Into<String>, email: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            uid: uid.into(),
            email,
            videos: Vec::new(),
            exchanges: Vec::new(),
            subscription: SubscriptionRef::basic(),
            rating: RatingAggregate::default(),
            role: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_video(&self, id: &VideoId) -> bool {
        self.videos.contains(id)
    }

    /// Add a video to the library if it is not already there.
    pub fn add_video(&mut self, id: VideoId) {
        if !self.videos.contains(&id) {
            self.videos.push(id);
        }
    }

    pub fn remove_video(&mut self, id: &VideoId) {
        self.videos.retain(|v| v != id);
    }

    pub fn add_exchange(&mut self, id: ExchangeId) {
        if !self.exchanges.contains(&id) {
            self.exchanges.push(id);
        }
    }

    pub fn remove_exchange(&mut self, id: &ExchangeId) {
        self.exchanges.retain(|e| e != id);
    }

    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin")
    }
}
