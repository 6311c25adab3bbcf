//! Ratings and running rating aggregates.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::exchange::ExchangeId;
use crate::video::VideoId;

/// Lowest accepted rating value.
pub const MIN_RATING: u8 = 1;
/// Highest accepted rating value.
pub const MAX_RATING: u8 = 5;

/// Running rating aggregate stored as sum and count.
///
/// Keeping the sum instead of the average lets stores apply a new rating
/// with two atomic increments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RatingAggregate {
    pub sum: f64,
    pub count: u32,
}

impl RatingAggregate {
    /// Build an aggregate from a set of rating values.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        values
            .into_iter()
            .fold(Self::default(), |acc, v| acc.with_rating(v))
    }

    /// Average rating, 0 when nothing has been rated yet.
    pub fn value(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    /// Aggregate after adding one more rating.
    pub fn with_rating(self, rating: f64) -> Self {
        Self {
            sum: self.sum + rating,
            count: self.count.saturating_add(1),
        }
    }
}

/// A rating left by one party of an accepted exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Rating {
    pub exchange_id: ExchangeId,
    pub rating_user: String,
    pub rated_user: String,
    /// Video the rating user received in the exchange.
    pub video: VideoId,
    /// Original uploader of `video` at the time of rating.
    pub video_uploader: String,
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Rating {
    /// Document id. One rating per exchange per rating user.
    pub fn id(&self) -> String {
        Self::id_for(&self.exchange_id, &self.rating_user)
    }

    pub fn id_for(exchange_id: &ExchangeId, rating_user: &str) -> String {
        format!("{}_{}", exchange_id, rating_user)
    }

    pub fn value(&self) -> f64 {
        f64::from(self.rating)
    }

    /// Users whose aggregate this rating contributes to.
    ///
    /// A rating counts for the user it names and for the original uploader of
    /// the rated video, at most once each, and never for its own author.
    pub fn attributed_users(&self) -> Vec<String> {
        let mut users = Vec::with_capacity(2);
        for uid in [&self.rated_user, &self.video_uploader] {
            if uid != &self.rating_user && !users.contains(uid) {
                users.push(uid.clone());
            }
        }
        users
    }

    /// True if this rating counts toward `uid`'s aggregate.
    pub fn is_attributed_to(&self, uid: &str) -> bool {
        self.rating_user != uid && (self.rated_user == uid || self.video_uploader == uid)
    }
}
