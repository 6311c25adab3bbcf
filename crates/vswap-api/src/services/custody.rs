//! Chain-of-custody audit and repair.
//!
//! Exchanges move ownership atomically, so a healthy store always satisfies:
//! every video in a user's library has that user at the end of its history,
//! every video whose history ends with the user is in their library, the
//! denormalized `owner` field matches the history, and the stored rating
//! aggregate equals the one recomputed from ratings. The audit reports
//! deviations; the repair rewrites the user and video records to match the
//! ownership histories, which are the source of truth.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use vswap_models::{RatingAggregate, User, Video, VideoId};
use vswap_store::{MarketStore, Mutation, Precondition, Versioned};

use crate::error::{ApiError, ApiResult};
use crate::services::rating::RatingService;
use crate::services::retry_on_contention;

/// Outcome of a custody audit for one user.
#[derive(Debug, Clone, Serialize)]
pub struct CustodyReport {
    pub uid: String,
    pub library_size: usize,
    pub owned_count: usize,
    /// Owned by the user but missing from their library.
    pub unlisted: Vec<VideoId>,
    /// In the library but currently owned by someone else.
    pub not_owned: Vec<VideoId>,
    /// In the library but no longer in the catalog.
    pub dangling: Vec<VideoId>,
    /// Videos whose `owner` field disagrees with their history.
    pub inconsistent_owner: Vec<VideoId>,
    pub stored_rating: RatingAggregate,
    pub recomputed_rating: RatingAggregate,
    pub rating_drift: bool,
    pub is_consistent: bool,
}

#[derive(Clone)]
pub struct CustodyService {
    store: Arc<dyn MarketStore>,
    ratings: RatingService,
}

/// Everything the audit and the repair look at, read once.
struct Snapshot {
    user: Versioned<User>,
    /// Videos whose `owner` field names the user, with their versions.
    indexed: Vec<Versioned<Video>>,
    /// Library entries, `None` when the catalog no longer has them.
    library: Vec<(VideoId, Option<Versioned<Video>>)>,
    recomputed_rating: RatingAggregate,
}

impl Snapshot {
    /// Every known video that names the user in `owner` or sits in their library.
    fn videos(&self) -> impl Iterator<Item = &Versioned<Video>> {
        self.indexed
            .iter()
            .chain(self.library.iter().filter_map(|(_, v)| v.as_ref()))
    }

    fn report(&self) -> CustodyReport {
        let user = &self.user.value;
        let uid = user.uid.as_str();

        let unlisted: Vec<VideoId> = self
            .indexed
            .iter()
            .map(|v| &v.value)
            .filter(|v| v.is_owned_by(uid) && !user.has_video(&v.id))
            .map(|v| v.id.clone())
            .collect();
        let not_owned = self
            .library
            .iter()
            .filter_map(|(_, v)| v.as_ref())
            .filter(|v| !v.value.is_owned_by(uid))
            .map(|v| v.value.id.clone())
            .collect();
        let dangling = self
            .library
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(id, _)| id.clone())
            .collect();
        let inconsistent_owner: BTreeSet<VideoId> = self
            .videos()
            .filter(|v| !v.value.owner_is_consistent())
            .map(|v| v.value.id.clone())
            .collect();

        let stored = user.rating;
        let recomputed = self.recomputed_rating;
        let rating_drift = stored.count != recomputed.count || (stored.sum - recomputed.sum).abs() > 1e-9;

        let mut report = CustodyReport {
            uid: uid.to_string(),
            library_size: user.videos.len(),
            owned_count: self
                .videos()
                .filter(|v| v.value.is_owned_by(uid))
                .map(|v| &v.value.id)
                .collect::<BTreeSet<_>>()
                .len(),
            unlisted,
            not_owned,
            dangling,
            inconsistent_owner: inconsistent_owner.into_iter().collect(),
            stored_rating: stored,
            recomputed_rating: recomputed,
            rating_drift,
            is_consistent: false,
        };
        report.is_consistent = report.unlisted.is_empty()
            && report.not_owned.is_empty()
            && report.dangling.is_empty()
            && report.inconsistent_owner.is_empty()
            && !report.rating_drift;
        report
    }
}

impl CustodyService {
    pub fn new(store: Arc<dyn MarketStore>, ratings: RatingService) -> Self {
        Self { store, ratings }
    }

    async fn snapshot(&self, uid: &str) -> ApiResult<Snapshot> {
        let user = self
            .store
            .get_user(uid)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("User {} not found", uid)))?;

        let mut indexed = Vec::new();
        for video in self.store.list_owned_videos(uid).await? {
            if let Some(v) = self.store.get_video(&video.id).await? {
                indexed.push(v);
            }
        }

        let mut library = Vec::with_capacity(user.value.videos.len());
        for id in &user.value.videos {
            library.push((id.clone(), self.store.get_video(id).await?));
        }

        let recomputed_rating = self.ratings.recompute_user_rating(uid).await?;

        Ok(Snapshot {
            user,
            indexed,
            library,
            recomputed_rating,
        })
    }

    pub async fn audit(&self, uid: &str) -> ApiResult<CustodyReport> {
        let report = self.snapshot(uid).await?.report();
        if !report.is_consistent {
            warn!(
                user_id = %uid,
                unlisted = report.unlisted.len(),
                not_owned = report.not_owned.len(),
                dangling = report.dangling.len(),
                inconsistent_owner = report.inconsistent_owner.len(),
                rating_drift = report.rating_drift,
                "Custody audit found inconsistencies"
            );
        }
        Ok(report)
    }

    /// Rewrite `uid`'s library, rating and the touched videos' `owner` fields
    /// to agree with the ownership histories. Returns the audit after repair.
    pub async fn repair(&self, uid: &str) -> ApiResult<CustodyReport> {
        let fixed = retry_on_contention("repair_custody", move || async move {
            let snapshot = self.snapshot(uid).await?;
            let before = snapshot.report();
            if before.is_consistent {
                return Ok(0usize);
            }

            let mut mutations = Vec::new();
            let mut seen = BTreeSet::new();
            for v in snapshot.videos() {
                if !v.value.owner_is_consistent() && seen.insert(v.value.id.clone()) {
                    let mut video = v.value.clone();
                    if let Some(owner) = video.current_owner() {
                        video.owner = owner.to_string();
                    }
                    mutations.push(Mutation::put_video(video, Precondition::Version(v.version.clone())));
                }
            }

            let Snapshot {
                user: Versioned { value: mut user, version },
                recomputed_rating,
                ..
            } = snapshot;
            user.videos.retain(|id| !before.not_owned.contains(id) && !before.dangling.contains(id));
            for id in &before.unlisted {
                user.add_video(id.clone());
            }
            user.rating = recomputed_rating;
            user.updated_at = Utc::now();
            mutations.push(Mutation::put_user(user, Precondition::Version(version)));

            let count = mutations.len();
            self.store.commit(mutations).await?;
            Ok(count)
        })
        .await?;

        if fixed > 0 {
            info!(user_id = %uid, records = fixed, "Custody repaired");
        }
        self.audit(uid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::Fixture;
    use crate::services::{CreateExchange, RespondToExchange, SubmitRating};

    #[tokio::test]
    async fn test_healthy_market_audits_clean() {
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
        fx.exchanges
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
        fx.ratings
            .submit(
                "alice",
                &exchange.id,
                &SubmitRating {
                    rating: 4,
                    comment: None,
                },
            )
            .await
            .unwrap();

        for uid in ["alice", "bob"] {
            let report = fx.custody.audit(uid).await.unwrap();
            assert!(report.is_consistent, "{:?}", report);
            assert_eq!(report.owned_count, 1);
        }
    }

    #[tokio::test]
    async fn test_repair_realigns_library_owner_and_rating() {
        let fx = Fixture::new();
        fx.user("alice").await;
        fx.user("bob").await;
        let kept = fx.upload("alice", "Kept").await;

        // A video alice owns that never reached her library
        let unlisted = Video::uploaded("alice", "Unlisted", 10, "hash-unlisted", Utc::now());
        // A video whose owner field lags behind its history
        let mut stale = Video::uploaded("bob", "Stale", 10, "hash-stale", Utc::now());
        stale.users.push("alice".to_string());
        let ghost = VideoId::from_string("ghost");

        let Versioned { value: mut alice, version } = fx.store.get_user("alice").await.unwrap().unwrap();
        alice.add_video(ghost.clone());
        alice.add_video(stale.id.clone());
        alice.rating = RatingAggregate::from_values([5.0]);
        fx.store
            .commit(vec![
                Mutation::put_video(unlisted.clone(), Precondition::MustNotExist),
                Mutation::put_video(stale.clone(), Precondition::MustNotExist),
                Mutation::put_user(alice, Precondition::Version(version)),
            ])
            .await
            .unwrap();

        let report = fx.custody.audit("alice").await.unwrap();
        assert!(!report.is_consistent);
        assert_eq!(report.unlisted, vec![unlisted.id.clone()]);
        assert_eq!(report.dangling, vec![ghost]);
        assert_eq!(report.inconsistent_owner, vec![stale.id.clone()]);
        assert!(report.rating_drift);

        let repaired = fx.custody.repair("alice").await.unwrap();
        assert!(repaired.is_consistent, "{:?}", repaired);
        assert_eq!(repaired.owned_count, 3);

        let alice = fx.stored_user("alice").await;
        assert_eq!(alice.videos, vec![kept.id.clone(), stale.id.clone(), unlisted.id.clone()]);
        assert_eq!(alice.rating, RatingAggregate::default());
        assert_eq!(fx.stored_video(&stale).await.owner, "alice");

        // Bob's view of the stale video now agrees too
        assert!(fx.custody.audit("bob").await.unwrap().is_consistent);
    }

    #[tokio::test]
    async fn test_audit_unknown_user_is_not_found() {
        let fx = Fixture::new();
        let err = fx.custody.audit("nobody").await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
