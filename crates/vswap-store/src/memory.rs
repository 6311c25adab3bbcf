//! In-memory `MarketStore`.
//!
//! Every table sits behind one `RwLock`. A commit stages its mutations on a
//! copy of the tables and swaps the copy in only if all of them apply, so
//! readers never observe a partial commit.

use std::collections::HashMap;
use std::hash::Hash;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use vswap_models::{
    Exchange, ExchangeId, ExchangeStatus, Notification, Plan, PlanTier, Rating, User, Video, VideoId,
    VideoReport,
};

use crate::error::{StoreError, StoreResult};
use crate::mutation::{LockKey, Mutation, Precondition, RatingTarget};
use crate::store::{MarketStore, Version, Versioned};

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    version: u64,
}

impl<T: Clone> Entry<T> {
    fn versioned(&self) -> Versioned<T> {
        Versioned::new(self.value.clone(), Version::new(self.version.to_string()))
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    clock: u64,
    users: HashMap<String, Entry<User>>,
    videos: HashMap<VideoId, Entry<Video>>,
    exchanges: HashMap<ExchangeId, Entry<Exchange>>,
    ratings: HashMap<String, Rating>,
    locks: HashMap<LockKey, String>,
    plans: HashMap<PlanTier, Plan>,
    notifications: Vec<Notification>,
    reports: Vec<VideoReport>,
}

impl Tables {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn apply(&mut self, mutation: Mutation) -> StoreResult<()> {
        match mutation {
            Mutation::PutUser { user, precondition } => {
                check(&self.users, &user.uid, &precondition, "users")?;
                let version = self.tick();
                self.users.insert(user.uid.clone(), Entry { value: user, version });
            }
            Mutation::DeleteUser { uid, precondition } => {
                check(&self.users, &uid, &precondition, "users")?;
                self.users.remove(&uid);
            }
            Mutation::PutVideo { video, precondition } => {
                check(&self.videos, &video.id, &precondition, "videos")?;
                let version = self.tick();
                self.videos.insert(video.id.clone(), Entry { value: video, version });
            }
            Mutation::DeleteVideo { id, precondition } => {
                check(&self.videos, &id, &precondition, "videos")?;
                self.videos.remove(&id);
            }
            Mutation::PutExchange {
                exchange,
                precondition,
            } => {
                check(&self.exchanges, &exchange.id, &precondition, "exchanges")?;
                let version = self.tick();
                self.exchanges.insert(
                    exchange.id.clone(),
                    Entry {
                        value: exchange,
                        version,
                    },
                );
            }
            Mutation::DeleteExchange { id, precondition } => {
                check(&self.exchanges, &id, &precondition, "exchanges")?;
                self.exchanges.remove(&id);
            }
            Mutation::AcquireLock { key, holder } => {
                if self.locks.contains_key(&key) {
                    return Err(StoreError::Conflict(key.to_string()));
                }
                self.locks.insert(key, holder);
            }
            Mutation::ReleaseLock { key } => {
                self.locks.remove(&key);
            }
            Mutation::InsertRating { rating } => {
                let id = rating.id();
                if self.ratings.contains_key(&id) {
                    return Err(StoreError::Conflict(format!("ratings/{}", id)));
                }
                self.ratings.insert(id, rating);
            }
            Mutation::AddRating { target, value } => {
                let version = self.tick();
                match target {
                    RatingTarget::User(uid) => {
                        let entry = self
                            .users
                            .get_mut(&uid)
                            .ok_or_else(|| StoreError::NotFound(format!("users/{}", uid)))?;
                        entry.value.rating = entry.value.rating.with_rating(value);
                        entry.version = version;
                    }
                    RatingTarget::Video(id) => {
                        let entry = self
                            .videos
                            .get_mut(&id)
                            .ok_or_else(|| StoreError::NotFound(format!("videos/{}", id)))?;
                        entry.value.rating = entry.value.rating.with_rating(value);
                        entry.version = version;
                    }
                }
            }
        }
        Ok(())
    }
}

fn check<K, T>(
    table: &HashMap<K, Entry<T>>,
    key: &K,
    precondition: &Precondition,
    collection: &str,
) -> StoreResult<()>
where
    K: Eq + Hash + std::fmt::Display,
{
    let current = table.get(key);
    match (precondition, current) {
        (Precondition::None, _) => Ok(()),
        (Precondition::MustNotExist, Some(_)) => {
            Err(StoreError::Conflict(format!("{}/{}", collection, key)))
        }
        (Precondition::MustNotExist, None) => Ok(()),
        (Precondition::MustExist, None) => {
            Err(StoreError::NotFound(format!("{}/{}", collection, key)))
        }
        (Precondition::MustExist, Some(_)) => Ok(()),
        (Precondition::Version(expected), Some(entry)) if expected.as_str() == entry.version.to_string() => {
            Ok(())
        }
        (Precondition::Version(expected), _) => Err(StoreError::Contention(format!(
            "{}/{} is no longer at version {}",
            collection, key, expected
        ))),
    }
}

/// `MarketStore` backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarketStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        let _tables = self.tables.read().await;
        Ok(())
    }

    async fn commit(&self, mutations: Vec<Mutation>) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        let count = mutations.len();

        for mutation in mutations {
            let kind = mutation.kind();
            if let Err(e) = staged.apply(mutation) {
                debug!(mutation = kind, error = %e, "Commit rejected");
                return Err(e);
            }
        }

        *tables = staged;
        debug!(mutations = count, "Commit applied");
        Ok(())
    }

    async fn get_user(&self, uid: &str) -> StoreResult<Option<Versioned<User>>> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(uid).map(Entry::versioned))
    }

    async fn get_plan(&self, tier: PlanTier) -> StoreResult<Option<Plan>> {
        let tables = self.tables.read().await;
        Ok(tables.plans.get(&tier).cloned())
    }

    async fn put_plan(&self, plan: &Plan) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.plans.insert(plan.name, plan.clone());
        Ok(())
    }

    async fn get_video(&self, id: &VideoId) -> StoreResult<Option<Versioned<Video>>> {
        let tables = self.tables.read().await;
        Ok(tables.videos.get(id).map(Entry::versioned))
    }

    async fn list_owned_videos(&self, uid: &str) -> StoreResult<Vec<Video>> {
        let tables = self.tables.read().await;
        let mut videos: Vec<Video> = tables
            .videos
            .values()
            .filter(|e| e.value.owner == uid)
            .map(|e| e.value.clone())
            .collect();
        videos.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(videos)
    }

    async fn find_video_by_hash(&self, hash: &str) -> StoreResult<Option<Video>> {
        let tables = self.tables.read().await;
        Ok(tables
            .videos
            .values()
            .find(|e| e.value.hash == hash)
            .map(|e| e.value.clone()))
    }

    async fn get_exchange(&self, id: &ExchangeId) -> StoreResult<Option<Versioned<Exchange>>> {
        let tables = self.tables.read().await;
        Ok(tables.exchanges.get(id).map(Entry::versioned))
    }

    async fn list_exchanges_for_user(&self, uid: &str) -> StoreResult<Vec<Exchange>> {
        let tables = self.tables.read().await;
        let mut exchanges: Vec<Exchange> = tables
            .exchanges
            .values()
            .filter(|e| e.value.initiator == uid || e.value.responder == uid)
            .map(|e| e.value.clone())
            .collect();
        exchanges.sort_by(|a, b| b.requested_date.cmp(&a.requested_date));
        Ok(exchanges)
    }

    async fn find_pending_between(&self, a: &str, b: &str) -> StoreResult<Vec<Exchange>> {
        let tables = self.tables.read().await;
        Ok(tables
            .exchanges
            .values()
            .map(|e| &e.value)
            .filter(|ex| ex.status == ExchangeStatus::Pending)
            .filter(|ex| {
                (ex.initiator == a && ex.responder == b) || (ex.initiator == b && ex.responder == a)
            })
            .cloned()
            .collect())
    }

    async fn find_pending_by_target(
        &self,
        initiator: &str,
        video: &VideoId,
    ) -> StoreResult<Option<Versioned<Exchange>>> {
        let tables = self.tables.read().await;
        Ok(tables
            .exchanges
            .values()
            .find(|e| {
                e.value.status == ExchangeStatus::Pending
                    && e.value.initiator == initiator
                    && &e.value.responder_video == video
            })
            .map(Entry::versioned))
    }

    async fn list_pending_for_video(&self, video: &VideoId) -> StoreResult<Vec<Versioned<Exchange>>> {
        let tables = self.tables.read().await;
        Ok(tables
            .exchanges
            .values()
            .filter(|e| e.value.status == ExchangeStatus::Pending && &e.value.responder_video == video)
            .map(Entry::versioned)
            .collect())
    }

    async fn count_initiated_between(
        &self,
        uid: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<u32> {
        let tables = self.tables.read().await;
        let count = tables
            .exchanges
            .values()
            .filter(|e| {
                e.value.initiator == uid
                    && e.value.requested_date >= start
                    && e.value.requested_date < end
            })
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn lock_holder(&self, key: &LockKey) -> StoreResult<Option<String>> {
        let tables = self.tables.read().await;
        Ok(tables.locks.get(key).cloned())
    }

    async fn get_rating(&self, id: &str) -> StoreResult<Option<Rating>> {
        let tables = self.tables.read().await;
        Ok(tables.ratings.get(id).cloned())
    }

    async fn list_ratings_for_video(&self, video: &VideoId) -> StoreResult<Vec<Rating>> {
        let tables = self.tables.read().await;
        Ok(tables
            .ratings
            .values()
            .filter(|r| &r.video == video)
            .cloned()
            .collect())
    }

    async fn list_ratings_attributed_to(&self, uid: &str) -> StoreResult<Vec<Rating>> {
        let tables = self.tables.read().await;
        Ok(tables
            .ratings
            .values()
            .filter(|r| r.is_attributed_to(uid))
            .cloned()
            .collect())
    }

    async fn insert_notification(&self, notification: &Notification) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.notifications.push(notification.clone());
        Ok(())
    }

    async fn list_notifications(&self, uid: &str, limit: usize) -> StoreResult<Vec<Notification>> {
        let tables = self.tables.read().await;
        let mut notifications: Vec<Notification> = tables
            .notifications
            .iter()
            .filter(|n| n.user == uid)
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        notifications.truncate(limit);
        Ok(notifications)
    }

    async fn insert_report(&self, report: &VideoReport) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.reports.push(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(uid: &str) -> User {
        User::new(uid, None, Utc::now())
    }

    async fn store_with_users(uids: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        let mutations = uids
            .iter()
            .map(|uid| Mutation::put_user(user(uid), Precondition::MustNotExist))
            .collect();
        store.commit(mutations).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_commit_is_all_or_nothing() {
        let store = store_with_users(&["alice"]).await;

        let result = store
            .commit(vec![
                Mutation::put_user(user("bob"), Precondition::MustNotExist),
                Mutation::put_user(user("alice"), Precondition::MustNotExist),
            ])
            .await;

        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert!(store.get_user("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_version_precondition_detects_concurrent_write() {
        let store = store_with_users(&["alice"]).await;
        let read = store.get_user("alice").await.unwrap().unwrap();

        let mut first = read.value.clone();
        first.email = Some("a@example.com".into());
        store
            .commit(vec![Mutation::put_user(first, Precondition::Version(read.version.clone()))])
            .await
            .unwrap();

        let stale = store
            .commit(vec![Mutation::put_user(
                read.value.clone(),
                Precondition::Version(read.version),
            )])
            .await;
        assert!(matches!(stale, Err(StoreError::Contention(_))));
        assert!(stale.unwrap_err().is_contention());
    }

    #[tokio::test]
    async fn test_delete_user_checks_version() {
        let store = store_with_users(&["alice"]).await;
        let read = store.get_user("alice").await.unwrap().unwrap();

        let mut touched = read.value.clone();
        touched.email = Some("a@example.com".into());
        store
            .commit(vec![Mutation::put_user(touched, Precondition::Version(read.version.clone()))])
            .await
            .unwrap();

        let stale = store
            .commit(vec![Mutation::DeleteUser {
                uid: "alice".into(),
                precondition: Precondition::Version(read.version),
            }])
            .await;
        assert!(matches!(stale, Err(StoreError::Contention(_))));

        let fresh = store.get_user("alice").await.unwrap().unwrap();
        store
            .commit(vec![Mutation::DeleteUser {
                uid: "alice".into(),
                precondition: Precondition::Version(fresh.version),
            }])
            .await
            .unwrap();
        assert!(store.get_user("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_released() {
        let store = MemoryStore::new();
        let key = LockKey::pending_pair("a", "b");

        store
            .commit(vec![Mutation::AcquireLock {
                key: key.clone(),
                holder: "ex1".into(),
            }])
            .await
            .unwrap();
        let second = store
            .commit(vec![Mutation::AcquireLock {
                key: LockKey::pending_pair("b", "a"),
                holder: "ex2".into(),
            }])
            .await;
        assert!(matches!(second, Err(StoreError::Conflict(_))));
        assert_eq!(store.lock_holder(&key).await.unwrap().as_deref(), Some("ex1"));

        store
            .commit(vec![Mutation::ReleaseLock { key: key.clone() }])
            .await
            .unwrap();
        assert!(store.lock_holder(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_rating_leaves_aggregates_untouched() {
        let store = store_with_users(&["alice", "bob"]).await;
        let rating = Rating {
            exchange_id: ExchangeId::from_string("ex1"),
            rating_user: "alice".into(),
            rated_user: "bob".into(),
            video: VideoId::from_string("v1"),
            video_uploader: "bob".into(),
            rating: 4,
            comment: None,
            created_at: Utc::now(),
        };
        let commit = || {
            vec![
                Mutation::InsertRating {
                    rating: rating.clone(),
                },
                Mutation::AddRating {
                    target: RatingTarget::User("bob".into()),
                    value: 4.0,
                },
            ]
        };

        store.commit(commit()).await.unwrap();
        let second = store.commit(commit()).await;
        assert!(matches!(second, Err(StoreError::Conflict(_))));

        let bob = store.get_user("bob").await.unwrap().unwrap().value;
        assert_eq!(bob.rating.count, 1);
        assert_eq!(bob.rating.sum, 4.0);
    }

    #[tokio::test]
    async fn test_add_rating_requires_target() {
        let store = MemoryStore::new();
        let result = store
            .commit(vec![Mutation::AddRating {
                target: RatingTarget::Video(VideoId::from_string("missing")),
                value: 3.0,
            }])
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_owned_videos_follow_current_owner() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let kept = Video::uploaded("alice", "kept", 10, "h1", now);
        let mut traded = Video::uploaded("alice", "traded", 20, "h2", now);
        traded.hand_over_to("bob");

        store
            .commit(vec![
                Mutation::put_video(kept.clone(), Precondition::MustNotExist),
                Mutation::put_video(traded.clone(), Precondition::MustNotExist),
            ])
            .await
            .unwrap();

        let alice = store.list_owned_videos("alice").await.unwrap();
        assert_eq!(alice, vec![kept]);
        let bob = store.list_owned_videos("bob").await.unwrap();
        assert_eq!(bob, vec![traded]);
        assert!(store.find_video_by_hash("h2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_count_initiated_uses_half_open_window() {
        let store = MemoryStore::new();
        let start = Utc::now() - Duration::days(10);
        let end = start + Duration::days(30);

        let at_start = Exchange::request("alice", "bob", VideoId::from_string("v1"), start);
        let before = Exchange::request("alice", "bob", VideoId::from_string("v2"), start - Duration::seconds(1));
        let at_end = Exchange::request("alice", "bob", VideoId::from_string("v3"), end);
        let other = Exchange::request("bob", "alice", VideoId::from_string("v4"), start);

        store
            .commit(
                [at_start, before, at_end, other]
                    .into_iter()
                    .map(|e| Mutation::put_exchange(e, Precondition::MustNotExist))
                    .collect(),
            )
            .await
            .unwrap();

        assert_eq!(store.count_initiated_between("alice", start, end).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pending_lookups() {
        let store = MemoryStore::new();
        let target = VideoId::from_string("v2");
        let pending = Exchange::request("alice", "bob", target.clone(), Utc::now());
        let mut rejected = Exchange::request("carol", "bob", target.clone(), Utc::now());
        rejected.status = ExchangeStatus::Rejected;

        store
            .commit(vec![
                Mutation::put_exchange(pending.clone(), Precondition::MustNotExist),
                Mutation::put_exchange(rejected, Precondition::MustNotExist),
            ])
            .await
            .unwrap();

        assert_eq!(store.find_pending_between("bob", "alice").await.unwrap(), vec![pending.clone()]);
        assert!(store.find_pending_between("bob", "carol").await.unwrap().is_empty());
        let by_target = store.find_pending_by_target("alice", &target).await.unwrap().unwrap();
        assert_eq!(by_target.value.id, pending.id);
        assert_eq!(store.list_pending_for_video(&target).await.unwrap().len(), 1);
        assert_eq!(store.list_exchanges_for_user("bob").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_notifications_newest_first_with_limit() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for i in 0..3 {
            let n = Notification::new(
                "alice",
                vswap_models::NotificationKind::ExchangeRequested,
                now + Duration::seconds(i),
            );
            store.insert_notification(&n).await.unwrap();
        }

        let listed = store.list_notifications("alice", 2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].created_at > listed[1].created_at);
        assert!(store.list_notifications("bob", 10).await.unwrap().is_empty());
    }
}
