//! Firestore-backed `MarketStore`.
//!
//! Every commit becomes one Firestore `commit` call, so a batch of mutations
//! applies atomically. Document versions are Firestore update times.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use vswap_models::{
    Exchange, ExchangeId, ExchangeStatus, Notification, Plan, PlanTier, Rating, User, Video,
    VideoId, VideoReport,
};
use vswap_store::{
    LockKey, MarketStore, Mutation, Precondition, RatingTarget, StoreError, StoreResult, Version,
    Versioned,
};

use crate::client::FirestoreClient;
use crate::convert::{
    document_to_exchange, document_to_lock_holder, document_to_notification, document_to_plan,
    document_to_rating, document_to_user, document_to_video, exchange_to_fields, lock_to_fields,
    notification_to_fields, plan_to_fields, rating_to_fields, report_to_fields, user_to_fields,
    video_to_fields,
};
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::{self, Document, FieldTransform, Filter, StructuredQuery, ToFirestoreValue, Write};

/// Collection names.
pub mod collections {
    pub const USERS: &str = "users";
    pub const VIDEOS: &str = "videos";
    pub const EXCHANGES: &str = "exchanges";
    pub const RATINGS: &str = "ratings";
    pub const PLANS: &str = "plans";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const REPORTS: &str = "reports";
}

/// Firestore implementation of `MarketStore`.
#[derive(Clone)]
pub struct FirestoreStore {
    client: FirestoreClient,
}

impl FirestoreStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &FirestoreClient {
        &self.client
    }

    fn precondition(pre: &Precondition) -> Option<types::Precondition> {
        match pre {
            Precondition::None => None,
            Precondition::MustNotExist => Some(types::Precondition::exists(false)),
            Precondition::MustExist => Some(types::Precondition::exists(true)),
            Precondition::Version(v) => Some(types::Precondition::update_time(v.as_str())),
        }
    }

    fn set(
        &self,
        collection: &str,
        id: &str,
        fields: HashMap<String, types::Value>,
        pre: Option<types::Precondition>,
    ) -> Write {
        Write::set(
            Document::named(self.client.full_document_name(collection, id), fields),
            pre,
        )
    }

    fn to_write(&self, mutation: Mutation) -> Write {
        let now = Utc::now();
        match mutation {
            Mutation::PutUser { user, precondition } => self.set(
                collections::USERS,
                &user.uid,
                user_to_fields(&user),
                Self::precondition(&precondition),
            ),
            Mutation::PutVideo { video, precondition } => self.set(
                collections::VIDEOS,
                video.id.as_str(),
                video_to_fields(&video),
                Self::precondition(&precondition),
            ),
            Mutation::DeleteUser { uid, precondition } => Write::delete(
                self.client.full_document_name(collections::USERS, &uid),
                Self::precondition(&precondition),
            ),
            Mutation::DeleteVideo { id, precondition } => Write::delete(
                self.client.full_document_name(collections::VIDEOS, id.as_str()),
                Self::precondition(&precondition),
            ),
            Mutation::PutExchange {
                exchange,
                precondition,
            } => self.set(
                collections::EXCHANGES,
                exchange.id.as_str(),
                exchange_to_fields(&exchange),
                Self::precondition(&precondition),
            ),
            Mutation::DeleteExchange { id, precondition } => Write::delete(
                self.client.full_document_name(collections::EXCHANGES, id.as_str()),
                Self::precondition(&precondition),
            ),
            Mutation::AcquireLock { key, holder } => self.set(
                key.collection(),
                key.id(),
                lock_to_fields(&holder, now),
                Some(types::Precondition::exists(false)),
            ),
            Mutation::ReleaseLock { key } => {
                Write::delete(self.client.full_document_name(key.collection(), key.id()), None)
            }
            Mutation::InsertRating { rating } => self.set(
                collections::RATINGS,
                &rating.id(),
                rating_to_fields(&rating),
                Some(types::Precondition::exists(false)),
            ),
            Mutation::AddRating { target, value } => {
                let name = match &target {
                    RatingTarget::User(uid) => self.client.full_document_name(collections::USERS, uid),
                    RatingTarget::Video(id) => {
                        self.client.full_document_name(collections::VIDEOS, id.as_str())
                    }
                };
                Write::transform(
                    name,
                    vec![
                        FieldTransform::increment("rating.sum", value.to_firestore_value()),
                        FieldTransform::increment("rating.count", 1u32.to_firestore_value()),
                    ],
                )
            }
        }
    }

    fn versioned<T>(
        doc: &Document,
        decode: fn(&Document) -> FirestoreResult<T>,
    ) -> FirestoreResult<Versioned<T>> {
        let version = doc.update_time.clone().ok_or_else(|| {
            FirestoreError::InvalidResponse("document has no update time".to_string())
        })?;
        Ok(Versioned::new(decode(doc)?, Version::new(version)))
    }

    async fn query(&self, query: StructuredQuery) -> StoreResult<Vec<Document>> {
        Ok(self.client.run_query("", query).await?)
    }

    async fn query_exchanges(&self, filter: Filter) -> StoreResult<Vec<Versioned<Exchange>>> {
        let docs = self
            .query(StructuredQuery::collection(collections::EXCHANGES).filter(filter))
            .await?;
        docs.iter()
            .map(|d| Self::versioned(d, document_to_exchange).map_err(StoreError::from))
            .collect()
    }

    async fn query_ratings(&self, field: &str, value: types::Value) -> StoreResult<Vec<Rating>> {
        let docs = self
            .query(
                StructuredQuery::collection(collections::RATINGS)
                    .filter(Filter::field(field, "EQUAL", value)),
            )
            .await?;
        docs.iter()
            .map(|d| document_to_rating(d).map_err(StoreError::from))
            .collect()
    }
}

fn eq(field: &str, value: &str) -> Filter {
    Filter::field(field, "EQUAL", value.to_firestore_value())
}

fn pending() -> Filter {
    eq("status", ExchangeStatus::Pending.as_str())
}

#[async_trait]
impl MarketStore for FirestoreStore {
    async fn ping(&self) -> StoreResult<()> {
        self.client
            .get_document(collections::PLANS, PlanTier::Basic.as_str())
            .await?;
        Ok(())
    }

    async fn commit(&self, mutations: Vec<Mutation>) -> StoreResult<()> {
        let kinds: Vec<&'static str> = mutations.iter().map(Mutation::kind).collect();
        let writes: Vec<Write> = mutations.into_iter().map(|m| self.to_write(m)).collect();

        match self.client.commit(writes).await {
            Ok(_) => Ok(()),
            Err(e) => {
                debug!(mutations = ?kinds, error = %e, "Firestore commit rejected");
                Err(e.into())
            }
        }
    }

    async fn get_user(&self, uid: &str) -> StoreResult<Option<Versioned<User>>> {
        let doc = self.client.get_document(collections::USERS, uid).await?;
        Ok(doc
            .map(|d| Self::versioned(&d, document_to_user))
            .transpose()?)
    }

    async fn get_plan(&self, tier: PlanTier) -> StoreResult<Option<Plan>> {
        let doc = self.client.get_document(collections::PLANS, tier.as_str()).await?;
        Ok(doc.map(|d| document_to_plan(&d)).transpose()?)
    }

    async fn put_plan(&self, plan: &Plan) -> StoreResult<()> {
        let write = self.set(collections::PLANS, plan.name.as_str(), plan_to_fields(plan), None);
        self.client.commit(vec![write]).await?;
        Ok(())
    }

    async fn get_video(&self, id: &VideoId) -> StoreResult<Option<Versioned<Video>>> {
        let doc = self.client.get_document(collections::VIDEOS, id.as_str()).await?;
        Ok(doc
            .map(|d| Self::versioned(&d, document_to_video))
            .transpose()?)
    }

    async fn list_owned_videos(&self, uid: &str) -> StoreResult<Vec<Video>> {
        let docs = self
            .query(StructuredQuery::collection(collections::VIDEOS).filter(eq("owner", uid)))
            .await?;
        let mut videos = docs
            .iter()
            .map(document_to_video)
            .collect::<FirestoreResult<Vec<_>>>()?;
        videos.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(videos)
    }

    async fn find_video_by_hash(&self, hash: &str) -> StoreResult<Option<Video>> {
        let docs = self
            .query(
                StructuredQuery::collection(collections::VIDEOS)
                    .filter(eq("hash", hash))
                    .limit(1),
            )
            .await?;
        Ok(docs.first().map(document_to_video).transpose()?)
    }

    async fn get_exchange(&self, id: &ExchangeId) -> StoreResult<Option<Versioned<Exchange>>> {
        let doc = self
            .client
            .get_document(collections::EXCHANGES, id.as_str())
            .await?;
        Ok(doc
            .map(|d| Self::versioned(&d, document_to_exchange))
            .transpose()?)
    }

    async fn list_exchanges_for_user(&self, uid: &str) -> StoreResult<Vec<Exchange>> {
        // Firestore has no OR over different fields here; run one query per role
        let mut by_id: HashMap<ExchangeId, Exchange> = HashMap::new();
        for role in ["initiator", "responder"] {
            for ex in self.query_exchanges(eq(role, uid)).await? {
                by_id.insert(ex.value.id.clone(), ex.value);
            }
        }

        let mut exchanges: Vec<Exchange> = by_id.into_values().collect();
        exchanges.sort_by(|a, b| b.requested_date.cmp(&a.requested_date));
        Ok(exchanges)
    }

    async fn find_pending_between(&self, a: &str, b: &str) -> StoreResult<Vec<Exchange>> {
        let mut found = Vec::new();
        for (initiator, responder) in [(a, b), (b, a)] {
            let filter = Filter::and(vec![
                eq("initiator", initiator),
                eq("responder", responder),
                pending(),
            ]);
            found.extend(self.query_exchanges(filter).await?.into_iter().map(Versioned::into_inner));
            if a == b {
                break;
            }
        }
        Ok(found)
    }

    async fn find_pending_by_target(
        &self,
        initiator: &str,
        video: &VideoId,
    ) -> StoreResult<Option<Versioned<Exchange>>> {
        let filter = Filter::and(vec![
            eq("initiator", initiator),
            eq("responder_video", video.as_str()),
            pending(),
        ]);
        Ok(self.query_exchanges(filter).await?.into_iter().next())
    }

    async fn list_pending_for_video(&self, video: &VideoId) -> StoreResult<Vec<Versioned<Exchange>>> {
        let filter = Filter::and(vec![eq("responder_video", video.as_str()), pending()]);
        self.query_exchanges(filter).await
    }

    async fn count_initiated_between(
        &self,
        uid: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<u32> {
        let query = StructuredQuery::collection(collections::EXCHANGES).filter(Filter::and(vec![
            eq("initiator", uid),
            Filter::field(
                "requested_date",
                "GREATER_THAN_OR_EQUAL",
                start.to_firestore_value(),
            ),
            Filter::field("requested_date", "LESS_THAN", end.to_firestore_value()),
        ]));
        let count = self.client.count("", query).await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn lock_holder(&self, key: &LockKey) -> StoreResult<Option<String>> {
        let doc = self.client.get_document(key.collection(), key.id()).await?;
        Ok(doc.map(|d| document_to_lock_holder(&d)).transpose()?)
    }

    async fn get_rating(&self, id: &str) -> StoreResult<Option<Rating>> {
        let doc = self.client.get_document(collections::RATINGS, id).await?;
        Ok(doc.map(|d| document_to_rating(&d)).transpose()?)
    }

    async fn list_ratings_for_video(&self, video: &VideoId) -> StoreResult<Vec<Rating>> {
        self.query_ratings("video", video.as_str().to_firestore_value())
            .await
    }

    async fn list_ratings_attributed_to(&self, uid: &str) -> StoreResult<Vec<Rating>> {
        let mut by_id: HashMap<String, Rating> = HashMap::new();
        for field in ["rated_user", "video_uploader"] {
            for rating in self.query_ratings(field, uid.to_firestore_value()).await? {
                if rating.is_attributed_to(uid) {
                    by_id.insert(rating.id(), rating);
                }
            }
        }
        Ok(by_id.into_values().collect())
    }

    async fn insert_notification(&self, notification: &Notification) -> StoreResult<()> {
        let write = self.set(
            collections::NOTIFICATIONS,
            &notification.id,
            notification_to_fields(notification),
            Some(types::Precondition::exists(false)),
        );
        self.client.commit(vec![write]).await?;
        Ok(())
    }

    async fn list_notifications(&self, uid: &str, limit: usize) -> StoreResult<Vec<Notification>> {
        let query = StructuredQuery::collection(collections::NOTIFICATIONS)
            .filter(eq("user", uid))
            .order_by("created_at", "DESCENDING")
            .limit(i32::try_from(limit).unwrap_or(i32::MAX));
        let docs = self.query(query).await?;
        Ok(docs
            .iter()
            .map(document_to_notification)
            .collect::<FirestoreResult<Vec<_>>>()?)
    }

    async fn insert_report(&self, report: &VideoReport) -> StoreResult<()> {
        let write = self.set(
            collections::REPORTS,
            &report.id,
            report_to_fields(report),
            Some(types::Precondition::exists(false)),
        );
        self.client.commit(vec![write]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FirestoreConfig;
    use crate::retry::RetryConfig;
    use std::time::Duration;

    async fn store() -> FirestoreStore {
        let client = FirestoreClient::new(FirestoreConfig {
            project_id: "demo".to_string(),
            database_id: "(default)".to_string(),
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            retry: RetryConfig::default(),
            emulator_host: Some("localhost:8080".to_string()),
        })
        .await
        .unwrap();
        FirestoreStore::new(client)
    }

    #[tokio::test]
    async fn test_lock_acquire_maps_to_must_not_exist() {
        let store = store().await;
        let write = store.to_write(Mutation::AcquireLock {
            key: LockKey::pending_pair("b", "a"),
            holder: "ex1".into(),
        });

        let doc = write.update.unwrap();
        assert!(doc.name.unwrap().ends_with("/documents/pending_pairs/a:b"));
        assert_eq!(write.current_document, Some(types::Precondition::exists(false)));
    }

    #[tokio::test]
    async fn test_version_precondition_uses_update_time() {
        let store = store().await;
        let user = User::new("u1", None, Utc::now());
        let write = store.to_write(Mutation::put_user(
            user,
            Precondition::Version(Version::new("2025-03-01T10:00:00.123456Z")),
        ));
        assert_eq!(
            write.current_document,
            Some(types::Precondition::update_time("2025-03-01T10:00:00.123456Z"))
        );
    }

    #[tokio::test]
    async fn test_add_rating_is_an_increment_transform() {
        let store = store().await;
        let write = store.to_write(Mutation::AddRating {
            target: RatingTarget::Video(VideoId::from_string("v1")),
            value: 4.0,
        });
        let json = serde_json::to_value(&write).unwrap();

        assert!(json["update"]["name"].as_str().unwrap().ends_with("/videos/v1"));
        assert_eq!(json["updateTransforms"][0]["fieldPath"], "rating.sum");
        assert_eq!(json["updateTransforms"][0]["increment"]["doubleValue"], 4.0);
        assert_eq!(json["updateTransforms"][1]["increment"]["integerValue"], "1");
        // A deleted target fails the commit instead of leaving a stub document
        assert_eq!(json["currentDocument"]["exists"], true);
    }

    #[tokio::test]
    async fn test_release_lock_is_unconditional_delete() {
        let store = store().await;
        let write = store.to_write(Mutation::ReleaseLock {
            key: LockKey::video_hash("h1"),
        });
        assert!(write.delete.unwrap().ends_with("/video_hashes/h:h1"));
        assert!(write.current_document.is_none());
    }

    #[tokio::test]
    async fn test_delete_user_keeps_version_precondition() {
        let store = store().await;
        let write = store.to_write(Mutation::DeleteUser {
            uid: "u1".into(),
            precondition: Precondition::Version(Version::new("2025-03-01T10:00:00Z")),
        });
        assert!(write.delete.unwrap().ends_with("/documents/users/u1"));
        assert_eq!(
            write.current_document,
            Some(types::Precondition::update_time("2025-03-01T10:00:00Z"))
        );
    }
}
