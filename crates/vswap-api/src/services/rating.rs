//! Rating submission and rating aggregates.
//!
//! A rating is inserted together with increments of every aggregate it counts
//! toward, in one commit: the rated video, the rated party and the video's
//! original uploader. The insert is must-not-exist under the id
//! `exchangeId_ratingUser`, which makes a second rating by the same user on
//! the same exchange fail without touching any aggregate.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use vswap_models::{
    ExchangeId, ExchangeStatus, Notification, NotificationKind, Rating, RatingAggregate, VideoId,
    MAX_RATING, MIN_RATING,
};
use vswap_store::{MarketStore, Mutation, RatingTarget, StoreError};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::services::notification::NotificationService;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitRating {
    #[validate(range(min = 1, max = 5, message = "rating must be between 1 and 5"))]
    pub rating: u8,
    #[validate(length(max = 500, message = "comment must be at most 500 characters"))]
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Clone)]
pub struct RatingService {
    store: Arc<dyn MarketStore>,
    notifications: NotificationService,
}

impl RatingService {
    pub fn new(store: Arc<dyn MarketStore>, notifications: NotificationService) -> Self {
        Self { store, notifications }
    }

    /// Rate the counterparty of an accepted exchange and the video received from them.
    pub async fn submit(&self, uid: &str, exchange_id: &ExchangeId, request: &SubmitRating) -> ApiResult<Rating> {
        if !(MIN_RATING..=MAX_RATING).contains(&request.rating) {
            return Err(ApiError::validation(format!(
                "rating must be between {} and {}",
                MIN_RATING, MAX_RATING
            )));
        }

        let exchange = self
            .store
            .get_exchange(exchange_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Exchange {} not found", exchange_id)))?
            .into_inner();

        let rated_user = exchange
            .counterparty(uid)
            .ok_or_else(|| ApiError::forbidden("Only the initiator or responder can rate this exchange"))?
            .to_string();
        if exchange.status != ExchangeStatus::Accepted {
            return Err(ApiError::state_conflict(format!(
                "Exchange is {}; only accepted exchanges can be rated",
                exchange.status
            )));
        }

        let video_id = exchange
            .video_received_by(uid)
            .cloned()
            .ok_or_else(|| ApiError::internal(format!("Accepted exchange {} has no received video", exchange.id)))?;
        let video = self
            .store
            .get_video(&video_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Video {} not found", video_id)))?
            .into_inner();
        let video_uploader = video
            .original_uploader()
            .ok_or_else(|| ApiError::internal(format!("Video {} has no ownership history", video.id)))?
            .to_string();

        let rating = Rating {
            exchange_id: exchange.id.clone(),
            rating_user: uid.to_string(),
            rated_user,
            video: video.id.clone(),
            video_uploader,
            rating: request.rating,
            comment: request
                .comment
                .as_ref()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            created_at: Utc::now(),
        };

        let value = rating.value();
        let mut mutations = vec![
            Mutation::InsertRating {
                rating: rating.clone(),
            },
            Mutation::AddRating {
                target: RatingTarget::Video(video.id.clone()),
                value,
            },
        ];
        for user in rating.attributed_users() {
            // Deleted accounts keep their ratings but have no aggregate to update
            if self.store.get_user(&user).await?.is_some() {
                mutations.push(Mutation::AddRating {
                    target: RatingTarget::User(user),
                    value,
                });
            }
        }

        match self.store.commit(mutations).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                return Err(ApiError::conflict("You have already rated this exchange"));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            exchange_id = %rating.exchange_id,
            rating_user = %rating.rating_user,
            rated_user = %rating.rated_user,
            video_id = %rating.video,
            "Rating recorded"
        );
        metrics::record_rating();
        self.notifications
            .notify(
                Notification::new(&rating.rated_user, NotificationKind::RatingReceived, Utc::now())
                    .with_exchange(rating.exchange_id.clone())
                    .with_video(rating.video.clone()),
            )
            .await;

        Ok(rating)
    }

    /// Aggregate recomputed from every rating attributed to `uid`.
    pub async fn recompute_user_rating(&self, uid: &str) -> ApiResult<RatingAggregate> {
        let ratings = self.store.list_ratings_attributed_to(uid).await?;
        Ok(RatingAggregate::from_values(ratings.iter().map(Rating::value)))
    }

    /// Aggregate recomputed from every rating left on `video`.
    pub async fn recompute_video_rating(&self, video: &VideoId) -> ApiResult<RatingAggregate> {
        let ratings = self.store.list_ratings_for_video(video).await?;
        Ok(RatingAggregate::from_values(ratings.iter().map(Rating::value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::Fixture;
    use crate::services::{CreateExchange, RespondToExchange};
    use vswap_models::{Exchange, Video};

    struct Swapped {
        fx: Fixture,
        exchange: Exchange,
        /// Uploaded by alice, now bob's.
        a: Video,
        /// Uploaded by bob, now alice's.
        b: Video,
    }

    async fn swapped() -> Swapped {
        let fx = Fixture::new();
        fx.user("alice").await;
        fx.user("bob").await;
        let a = fx.upload("alice", "Alpine lake").await;
        let b = fx.upload("bob", "Harbor at dusk").await;

        let exchange = fx
            .exchanges
            .create(
                "alice",
                &CreateExchange {
                    responder: "bob".to_string(),
                    responder_video: b.id.to_string(),
                },
            )
            .await
            .unwrap();
        let exchange = fx
            .exchanges
            .respond(
                "bob",
                &exchange.id,
                &RespondToExchange {
                    status: "accepted".to_string(),
                    initiator_video: Some(a.id.to_string()),
                },
            )
            .await
            .unwrap();

        Swapped { fx, exchange, a, b }
    }

    fn stars(rating: u8) -> SubmitRating {
        SubmitRating {
            rating,
            comment: Some("  great clip ".to_string()),
        }
    }

    #[tokio::test]
    async fn test_rating_updates_video_and_user_aggregates() {
        let s = swapped().await;
        let rating = s.fx.ratings.submit("alice", &s.exchange.id, &stars(4)).await.unwrap();

        assert_eq!(rating.rated_user, "bob");
        assert_eq!(rating.video, s.b.id);
        assert_eq!(rating.video_uploader, "bob");
        assert_eq!(rating.comment.as_deref(), Some("great clip"));

        let video = s.fx.stored_video(&s.b).await;
        assert_eq!(video.rating.count, 1);
        assert!((video.rating.sum - 4.0).abs() < f64::EPSILON);

        // Rated user and uploader are the same person: counted once
        let bob = s.fx.stored_user("bob").await;
        assert_eq!(bob.rating.count, 1);
        assert_eq!(s.fx.stored_user("alice").await.rating.count, 0);

        let view = s.fx.exchanges.get("alice", &s.exchange.id).await.unwrap();
        assert!(view.has_rated);
        let notes = s.fx.store.list_notifications("bob", 10).await.unwrap();
        assert_eq!(notes[0].kind, NotificationKind::RatingReceived);
    }

    #[tokio::test]
    async fn test_second_rating_is_rejected_without_side_effects() {
        let s = swapped().await;
        s.fx.ratings.submit("bob", &s.exchange.id, &stars(5)).await.unwrap();

        let err = s.fx.ratings.submit("bob", &s.exchange.id, &stars(1)).await.unwrap_err();
        assert_eq!(err.code(), "conflict");

        let video = s.fx.stored_video(&s.a).await;
        assert_eq!(video.rating.count, 1);
        assert!((video.rating.sum - 5.0).abs() < f64::EPSILON);
        assert_eq!(s.fx.stored_user("alice").await.rating.count, 1);
    }

    #[tokio::test]
    async fn test_both_parties_may_rate_once() {
        let s = swapped().await;
        s.fx.ratings.submit("alice", &s.exchange.id, &stars(3)).await.unwrap();
        s.fx.ratings.submit("bob", &s.exchange.id, &stars(5)).await.unwrap();

        assert_eq!(s.fx.ratings.recompute_user_rating("alice").await.unwrap().count, 1);
        assert_eq!(s.fx.ratings.recompute_user_rating("bob").await.unwrap().count, 1);
        let b = s.fx.ratings.recompute_video_rating(&s.b.id).await.unwrap();
        assert!((b.value() - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_rating_requires_party_and_accepted_exchange() {
        let s = swapped().await;
        s.fx.user("carol").await;

        let err = s.fx.ratings.submit("carol", &s.exchange.id, &stars(4)).await.unwrap_err();
        assert_eq!(err.code(), "forbidden");

        let err = s.fx.ratings.submit("alice", &s.exchange.id, &stars(0)).await.unwrap_err();
        assert_eq!(err.code(), "validation");
        let err = s.fx.ratings.submit("alice", &s.exchange.id, &stars(6)).await.unwrap_err();
        assert_eq!(err.code(), "validation");

        let missing = ExchangeId::from_string("missing");
        let err = s.fx.ratings.submit("alice", &missing, &stars(4)).await.unwrap_err();
        assert_eq!(err.code(), "not_found");

        let c = s.fx.upload("carol", "Desert road").await;
        let pending = s
            .fx
            .exchanges
            .create(
                "alice",
                &CreateExchange {
                    responder: "carol".to_string(),
                    responder_video: c.id.to_string(),
                },
            )
            .await
            .unwrap();
        let err = s.fx.ratings.submit("alice", &pending.id, &stars(4)).await.unwrap_err();
        assert_eq!(err.code(), "state_conflict");
    }

    #[tokio::test]
    async fn test_rating_credits_original_uploader_after_resale() {
        let s = swapped().await;
        s.fx.user("carol").await;
        let c = s.fx.upload("carol", "Desert road").await;

        // Bob passes alice's original video on to carol
        let second = s
            .fx
            .exchanges
            .create(
                "carol",
                &CreateExchange {
                    responder: "bob".to_string(),
                    responder_video: s.a.id.to_string(),
                },
            )
            .await
            .unwrap();
        s.fx
            .exchanges
            .respond(
                "bob",
                &second.id,
                &RespondToExchange {
                    status: "accepted".to_string(),
                    initiator_video: Some(c.id.to_string()),
                },
            )
            .await
            .unwrap();

        let rating = s.fx.ratings.submit("carol", &second.id, &stars(5)).await.unwrap();
        assert_eq!(rating.rated_user, "bob");
        assert_eq!(rating.video_uploader, "alice");
        assert_eq!(s.fx.stored_user("bob").await.rating.count, 1);
        assert_eq!(s.fx.stored_user("alice").await.rating.count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ratings_on_one_video_match_recompute() {
        let s = swapped().await;
        s.fx.user("carol").await;
        let c = s.fx.upload("carol", "Desert road").await;

        // Carol takes alice's original video from bob, so bob and carol both received it
        let second = s
            .fx
            .exchanges
            .create(
                "carol",
                &CreateExchange {
                    responder: "bob".to_string(),
                    responder_video: s.a.id.to_string(),
                },
            )
            .await
            .unwrap();
        s.fx
            .exchanges
            .respond(
                "bob",
                &second.id,
                &RespondToExchange {
                    status: "accepted".to_string(),
                    initiator_video: Some(c.id.to_string()),
                },
            )
            .await
            .unwrap();

        let by_bob = {
            let ratings = s.fx.ratings.clone();
            let id = s.exchange.id.clone();
            tokio::spawn(async move { ratings.submit("bob", &id, &stars(2)).await })
        };
        let by_carol = {
            let ratings = s.fx.ratings.clone();
            let id = second.id.clone();
            tokio::spawn(async move { ratings.submit("carol", &id, &stars(5)).await })
        };
        let (by_bob, by_carol) = tokio::join!(by_bob, by_carol);
        assert_eq!(by_bob.unwrap().unwrap().video, s.a.id);
        assert_eq!(by_carol.unwrap().unwrap().video, s.a.id);

        let stored = s.fx.stored_video(&s.a).await.rating;
        let recomputed = s.fx.ratings.recompute_video_rating(&s.a.id).await.unwrap();
        assert_eq!(stored.count, 2);
        assert_eq!(stored.count, recomputed.count);
        assert!((stored.sum - recomputed.sum).abs() < f64::EPSILON);

        // Alice uploaded the video and is credited by both
        let alice = s.fx.stored_user("alice").await.rating;
        let recomputed = s.fx.ratings.recompute_user_rating("alice").await.unwrap();
        assert_eq!(alice.count, 2);
        assert!((alice.sum - recomputed.sum).abs() < f64::EPSILON);
    }
}
