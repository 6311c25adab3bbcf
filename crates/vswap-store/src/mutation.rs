//! Atomic commit vocabulary.
//!
//! A commit is an ordered list of mutations applied all-or-nothing. Every
//! multi-record change the services make (exchange creation, ownership
//! transfer, rating submission, video and account deletion) is expressed as
//! one commit.

use vswap_models::{pair_key, Exchange, ExchangeId, Rating, User, Video, VideoId};

use crate::store::Version;

/// Condition a record must satisfy for a write to apply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Precondition {
    #[default]
    None,
    MustNotExist,
    MustExist,
    /// Record must still be at this version.
    Version(Version),
}

/// Singleton records that guard a uniqueness rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// At most one pending exchange per unordered user pair.
    PendingPair(String),
    /// At most one video per content hash.
    VideoHash(String),
}

impl LockKey {
    pub fn pending_pair(a: &str, b: &str) -> Self {
        LockKey::PendingPair(pair_key(a, b))
    }

    /// Hashes are client supplied; the prefix keeps ids like `.` or `__x__`
    /// out of the document namespace and encoding removes `/`.
    pub fn video_hash(hash: &str) -> Self {
        LockKey::VideoHash(format!("h:{}", urlencoding::encode(hash)))
    }

    /// Collection the lock record lives in.
    pub fn collection(&self) -> &'static str {
        match self {
            LockKey::PendingPair(_) => "pending_pairs",
            LockKey::VideoHash(_) => "video_hashes",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            LockKey::PendingPair(id) | LockKey::VideoHash(id) => id,
        }
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection(), self.id())
    }
}

/// Record whose rating aggregate is incremented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RatingTarget {
    User(String),
    Video(VideoId),
}

/// One write in a commit.
#[derive(Debug, Clone)]
pub enum Mutation {
    PutUser {
        user: User,
        precondition: Precondition,
    },
    DeleteUser {
        uid: String,
        precondition: Precondition,
    },
    PutVideo {
        video: Video,
        precondition: Precondition,
    },
    DeleteVideo {
        id: VideoId,
        precondition: Precondition,
    },
    PutExchange {
        exchange: Exchange,
        precondition: Precondition,
    },
    DeleteExchange {
        id: ExchangeId,
        precondition: Precondition,
    },
    /// Create a lock record naming its holder. Fails with `Conflict` if held.
    AcquireLock { key: LockKey, holder: String },
    /// Remove a lock record. Removing a missing lock is not an error.
    ReleaseLock { key: LockKey },
    /// Insert a rating. Fails with `Conflict` if one exists under the same id.
    InsertRating { rating: Rating },
    /// Add one rating value to an aggregate. The target must exist.
    AddRating { target: RatingTarget, value: f64 },
}

impl Mutation {
    pub fn put_user(user: User, precondition: Precondition) -> Self {
        Mutation::PutUser { user, precondition }
    }

    pub fn put_video(video: Video, precondition: Precondition) -> Self {
        Mutation::PutVideo { video, precondition }
    }

    pub fn put_exchange(exchange: Exchange, precondition: Precondition) -> Self {
        Mutation::PutExchange {
            exchange,
            precondition,
        }
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::PutUser { .. } => "put_user",
            Mutation::DeleteUser { .. } => "delete_user",
            Mutation::PutVideo { .. } => "put_video",
            Mutation::DeleteVideo { .. } => "delete_video",
            Mutation::PutExchange { .. } => "put_exchange",
            Mutation::DeleteExchange { .. } => "delete_exchange",
            Mutation::AcquireLock { .. } => "acquire_lock",
            Mutation::ReleaseLock { .. } => "release_lock",
            Mutation::InsertRating { .. } => "insert_rating",
            Mutation::AddRating { .. } => "add_rating",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_pair_lock_is_direction_free() {
        assert_eq!(LockKey::pending_pair("b", "a"), LockKey::pending_pair("a", "b"));
        assert_eq!(LockKey::pending_pair("a", "b").to_string(), "pending_pairs/a:b");
        assert_ne!(LockKey::pending_pair("a_b", "c"), LockKey::pending_pair("a", "b_c"));
    }

    #[test]
    fn test_video_hash_lock_path() {
        let key = LockKey::video_hash("abc");
        assert_eq!(key.collection(), "video_hashes");
        assert_eq!(key.id(), "h:abc");
    }

    #[test]
    fn test_video_hash_lock_id_has_no_path_separator() {
        let key = LockKey::video_hash("sha256/../x");
        assert!(!key.id().contains('/'));
        assert_ne!(LockKey::video_hash("."), LockKey::video_hash("%2E"));
    }
}
