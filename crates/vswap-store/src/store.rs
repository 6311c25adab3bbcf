//! The `MarketStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vswap_models::{
    Exchange, ExchangeId, Notification, Plan, PlanTier, Rating, User, Video, VideoId, VideoReport,
};

use crate::error::StoreResult;
use crate::mutation::{LockKey, Mutation};

/// Opaque record version (Firestore `updateTime`, or a counter in memory).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(pub String);

impl Version {
    pub fn new(v: impl Into<String>) -> Self {
        Self(v.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: Version,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: Version) -> Self {
        Self { value, version }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Persistence contract of the exchange and quota core.
///
/// Reads are plain queries; every write goes through [`MarketStore::commit`],
/// which applies a list of mutations atomically or not at all.
#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Cheap round-trip used by the readiness check.
    async fn ping(&self) -> StoreResult<()>;

    /// Apply all mutations atomically.
    ///
    /// Fails with `Conflict` when a must-not-exist record exists, `Contention`
    /// when a version precondition no longer holds and `NotFound` when a
    /// must-exist record is missing. Nothing is written on failure.
    async fn commit(&self, mutations: Vec<Mutation>) -> StoreResult<()>;

    // Users and plans

    async fn get_user(&self, uid: &str) -> StoreResult<Option<Versioned<User>>>;

    async fn get_plan(&self, tier: PlanTier) -> StoreResult<Option<Plan>>;

    async fn put_plan(&self, plan: &Plan) -> StoreResult<()>;

    // Videos

    async fn get_video(&self, id: &VideoId) -> StoreResult<Option<Versioned<Video>>>;

    /// Videos whose current owner is `uid`.
    async fn list_owned_videos(&self, uid: &str) -> StoreResult<Vec<Video>>;

    async fn find_video_by_hash(&self, hash: &str) -> StoreResult<Option<Video>>;

    // Exchanges

    async fn get_exchange(&self, id: &ExchangeId) -> StoreResult<Option<Versioned<Exchange>>>;

    /// Exchanges where `uid` is initiator or responder, newest first.
    async fn list_exchanges_for_user(&self, uid: &str) -> StoreResult<Vec<Exchange>>;

    /// Pending exchanges between `a` and `b`, in either direction.
    async fn find_pending_between(&self, a: &str, b: &str) -> StoreResult<Vec<Exchange>>;

    /// The pending exchange `initiator` opened against `video`, if any.
    async fn find_pending_by_target(
        &self,
        initiator: &str,
        video: &VideoId,
    ) -> StoreResult<Option<Versioned<Exchange>>>;

    /// Pending exchanges targeting `video` as the responder video.
    async fn list_pending_for_video(&self, video: &VideoId) -> StoreResult<Vec<Versioned<Exchange>>>;

    /// Exchanges initiated by `uid` with `start <= requested_date < end`, any status.
    async fn count_initiated_between(
        &self,
        uid: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<u32>;

    /// Holder recorded on a lock, if the lock is held.
    async fn lock_holder(&self, key: &LockKey) -> StoreResult<Option<String>>;

    // Ratings

    async fn get_rating(&self, id: &str) -> StoreResult<Option<Rating>>;

    async fn list_ratings_for_video(&self, video: &VideoId) -> StoreResult<Vec<Rating>>;

    /// Ratings that count toward `uid`: naming them as rated user, or on a
    /// video they originally uploaded. Excludes ratings `uid` wrote.
    async fn list_ratings_attributed_to(&self, uid: &str) -> StoreResult<Vec<Rating>>;

    // Side effects

    async fn insert_notification(&self, notification: &Notification) -> StoreResult<()>;

    /// Most recent notifications for `uid`, newest first.
    async fn list_notifications(&self, uid: &str, limit: usize) -> StoreResult<Vec<Notification>>;

    async fn insert_report(&self, report: &VideoReport) -> StoreResult<()>;
}
