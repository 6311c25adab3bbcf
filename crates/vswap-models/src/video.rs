//! Video records and their chain of custody.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::rating::RatingAggregate;

/// Unique identifier for a video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A video in the catalog.
///
/// `users` is the ownership history: the first entry is the uploader and the
/// last entry is the current owner. `owner` mirrors the last entry so stores
/// can index on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Video {
    pub id: VideoId,
    pub title: String,
    /// Size in bytes.
    pub size: u64,
    /// Content hash supplied by the media pipeline. Unique across the catalog.
    pub hash: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub is_sensitive_content: bool,
    /// Ownership history, oldest first.
    pub users: Vec<String>,
    /// Current owner, always equal to the last element of `users`.
    pub owner: String,
    #[serde(default)]
    pub rating: RatingAggregate,
    pub uploaded_at: DateTime<Utc>,
}

impl Video {
    /// Create a freshly uploaded video owned by `uploader`.
    pub fn uploaded(
        uploader: impl Into<String>,
        title: impl Into<String>,
        size: u64,
        hash: impl Into<String>,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        let uploader = uploader.into();
        Self {
            id: VideoId::new(),
            title: title.into(),
            size,
            hash: hash.into(),
            category: None,
            keywords: Vec::new(),
            is_sensitive_content: false,
            users: vec![uploader.clone()],
            owner: uploader,
            rating: RatingAggregate::default(),
            uploaded_at,
        }
    }

    /// Current owner (last element of the history).
    pub fn current_owner(&self) -> Option<&str> {
        self.users.last().map(String::as_str)
    }

    /// Original uploader (first element of the history).
    pub fn original_uploader(&self) -> Option<&str> {
        self.users.first().map(String::as_str)
    }

    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.current_owner() == Some(uid)
    }

    /// Append a new owner to the history.
    pub fn hand_over_to(&mut self, uid: impl Into<String>) {
        let uid = uid.into();
        self.users.push(uid.clone());
        self.owner = uid;
    }

    /// True when the denormalized owner agrees with the history.
    pub fn owner_is_consistent(&self) -> bool {
        self.current_owner() == Some(self.owner.as_str())
    }
}
