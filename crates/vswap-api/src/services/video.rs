//! Video catalog operations: upload, deletion, sensitivity and reports.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use vswap_models::{
    Exchange, ExchangeId, LibraryUsage, ModerationFrame, ModerationVerdict, Notification, NotificationKind,
    Video, VideoId, VideoReport,
};
use vswap_store::{LockKey, MarketStore, Mutation, Precondition, StoreError, Versioned};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::services::notification::NotificationService;
use crate::services::quota::QuotaService;
use crate::services::subscription::SubscriptionService;
use crate::services::{retry_on_contention, UserWrites};

/// Metadata of an uploaded video. The media itself lives with the storage provider.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UploadVideo {
    #[validate(length(min = 1, max = 200, message = "title must be 1 to 200 characters"))]
    pub title: String,
    #[validate(range(min = 1, message = "size must be positive"))]
    pub size: u64,
    #[validate(length(min = 8, max = 128, message = "hash must be 8 to 128 characters"))]
    pub hash: String,
    #[validate(length(max = 64))]
    #[serde(default)]
    pub category: Option<String>,
    #[validate(length(max = 20, message = "at most 20 keywords"))]
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Result of applying a moderation verdict.
#[derive(Debug, Clone, Serialize)]
pub struct ModerationOutcome {
    pub video: VideoId,
    #[serde(flatten)]
    pub verdict: ModerationVerdict,
    /// True when this verdict flipped the video to sensitive.
    pub flagged: bool,
}

const DUPLICATE_CONTENT: &str = "A video with the same content already exists";

#[derive(Clone)]
pub struct VideoService {
    store: Arc<dyn MarketStore>,
    subscriptions: SubscriptionService,
    quotas: QuotaService,
    notifications: NotificationService,
    moderation_threshold: f64,
}

impl VideoService {
    pub fn new(
        store: Arc<dyn MarketStore>,
        subscriptions: SubscriptionService,
        quotas: QuotaService,
        notifications: NotificationService,
        moderation_threshold: f64,
    ) -> Self {
        Self {
            store,
            subscriptions,
            quotas,
            notifications,
            moderation_threshold,
        }
    }

    async fn load(&self, id: &VideoId) -> ApiResult<Versioned<Video>> {
        self.store
            .get_video(id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Video {} not found", id)))
    }

    /// Add a video to `uid`'s library after every plan quota passes.
    pub async fn upload(&self, uid: &str, request: &UploadVideo) -> ApiResult<Video> {
        let video = retry_on_contention("upload_video", move || async move {
            self.try_upload(uid, request).await
        })
        .await?;

        info!(user_id = %uid, video_id = %video.id, size = video.size, "Video uploaded");
        metrics::record_video_uploaded();
        Ok(video)
    }

    async fn try_upload(&self, uid: &str, request: &UploadVideo) -> ApiResult<Video> {
        let owner = self
            .store
            .get_user(uid)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("User {} not found", uid)))?;
        let resolved = self.subscriptions.resolve(&owner.value).await?;

        let title = request.title.trim();
        if self.store.find_video_by_hash(&request.hash).await?.is_some() {
            return Err(ApiError::conflict(DUPLICATE_CONTENT));
        }
        let owned = self.quotas.owned_videos(uid).await?;
        if owned.iter().any(|v| v.title.eq_ignore_ascii_case(title)) {
            return Err(ApiError::conflict(format!(
                "You already have a video titled '{}'",
                title
            )));
        }

        let usage = LibraryUsage::of_owner(uid, &owned);
        self.quotas.check_upload(uid, &resolved.plan, &usage, request.size)?;

        let now = Utc::now();
        let mut video = Video::uploaded(uid, title, request.size, &request.hash, now);
        video.category = request.category.clone().filter(|c| !c.trim().is_empty());
        video.keywords = request
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        let Versioned { value: mut user, version } = owner;
        user.add_video(video.id.clone());
        user.updated_at = now;

        let mutations = vec![
            Mutation::put_video(video.clone(), Precondition::MustNotExist),
            Mutation::AcquireLock {
                key: LockKey::video_hash(&video.hash),
                holder: video.id.to_string(),
            },
            Mutation::put_user(user, Precondition::Version(version)),
        ];

        match self.store.commit(mutations).await {
            Ok(()) => Ok(video),
            Err(StoreError::Conflict(_)) => Err(ApiError::conflict(DUPLICATE_CONTENT)),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a video owned by `uid`.
    ///
    /// Pending exchanges targeting the video are deleted in the same commit and
    /// their initiators notified. Returns how many exchanges were cancelled.
    pub async fn delete(&self, uid: &str, id: &VideoId) -> ApiResult<usize> {
        let cancelled = retry_on_contention("delete_video", move || async move {
            self.try_delete(uid, id).await
        })
        .await?;

        info!(user_id = %uid, video_id = %id, cancelled = cancelled.len(), "Video deleted");
        for (initiator, exchange_id) in &cancelled {
            metrics::record_exchange("cancelled");
            self.notifications
                .notify(
                    Notification::new(initiator, NotificationKind::ExchangeCancelled, Utc::now())
                        .with_exchange(exchange_id.clone())
                        .with_video(id.clone()),
                )
                .await;
        }
        Ok(cancelled.len())
    }

    async fn try_delete(
        &self,
        uid: &str,
        id: &VideoId,
    ) -> ApiResult<Vec<(String, ExchangeId)>> {
        let video = self.load(id).await?;
        if !video.value.is_owned_by(uid) {
            return Err(ApiError::forbidden("Only the current owner can delete this video"));
        }

        let mut users = UserWrites::default();
        let staged = stage_video_removal(self.store.as_ref(), &video, &mut users).await?;
        let mut mutations = staged.mutations;
        mutations.extend(users.into_mutations(Utc::now()));
        self.store.commit(mutations).await?;

        Ok(staged
            .cancelled
            .into_iter()
            .map(|exchange| (exchange.initiator, exchange.id))
            .collect())
    }

    /// Owner sets or clears the sensitive-content flag.
    pub async fn set_sensitivity(&self, uid: &str, id: &VideoId, sensitive: bool) -> ApiResult<Video> {
        retry_on_contention("set_sensitivity", move || async move {
            let current = self.load(id).await?;
            if !current.value.is_owned_by(uid) {
                return Err(ApiError::forbidden(
                    "Only the current owner can change this video's sensitivity",
                ));
            }
            if current.value.is_sensitive_content == sensitive {
                return Ok(current.value);
            }

            let mut video = current.value;
            video.is_sensitive_content = sensitive;
            self.store
                .commit(vec![Mutation::put_video(
                    video.clone(),
                    Precondition::Version(current.version),
                )])
                .await?;
            Ok(video)
        })
        .await
    }

    /// File a report against a video.
    pub async fn report(&self, uid: &str, id: &VideoId, reason: &str) -> ApiResult<VideoReport> {
        let video = self.load(id).await?.into_inner();
        let report = VideoReport::new(video.id, uid, reason.trim(), Utc::now());
        self.store.insert_report(&report).await?;
        info!(video_id = %id, reporter = %uid, "Video reported");
        Ok(report)
    }

    /// Apply a moderation callback.
    ///
    /// A sensitive verdict flags the video and notifies its owner. A clean
    /// verdict never clears a flag that is already set.
    pub async fn apply_moderation(&self, id: &VideoId, frames: &[ModerationFrame]) -> ApiResult<ModerationOutcome> {
        let verdict = ModerationVerdict::evaluate(frames, self.moderation_threshold);

        let flagged = if verdict.is_sensitive {
            retry_on_contention("apply_moderation", move || async move {
                let current = self.load(id).await?;
                if current.value.is_sensitive_content {
                    return Ok(None);
                }
                let mut video = current.value;
                video.is_sensitive_content = true;
                let owner = video.owner.clone();
                self.store
                    .commit(vec![Mutation::put_video(video, Precondition::Version(current.version))])
                    .await?;
                Ok(Some(owner))
            })
            .await?
        } else {
            // Still confirm the video exists so the provider learns about stale ids
            self.load(id).await?;
            None
        };

        if let Some(owner) = &flagged {
            warn!(
                video_id = %id,
                category = verdict.category.as_deref().unwrap_or("unknown"),
                score = verdict.max_score,
                "Video flagged as sensitive"
            );
            self.notifications
                .notify(
                    Notification::new(owner, NotificationKind::VideoFlagged, Utc::now()).with_video(id.clone()),
                )
                .await;
        }

        Ok(ModerationOutcome {
            video: id.clone(),
            verdict,
            flagged: flagged.is_some(),
        })
    }
}

/// A video deletion staged for one commit.
pub(crate) struct VideoRemoval {
    pub mutations: Vec<Mutation>,
    /// Pending exchanges that targeted the video.
    pub cancelled: Vec<Exchange>,
}

/// Stage deleting `video` with its hash lock and every pending exchange that
/// targets it.
///
/// The owner and the parties of cancelled exchanges are loaded into `users`
/// with their library and exchange lists updated. The caller turns `users`
/// into writes.
pub(crate) async fn stage_video_removal(
    store: &dyn MarketStore,
    video: &Versioned<Video>,
    users: &mut UserWrites,
) -> ApiResult<VideoRemoval> {
    let id = &video.value.id;
    let owner = video.value.owner.as_str();
    if users.load(store, owner).await? {
        if let Some(user) = users.get_mut(owner) {
            user.remove_video(id);
        }
    }

    let mut mutations = vec![
        Mutation::DeleteVideo {
            id: id.clone(),
            precondition: Precondition::Version(video.version.clone()),
        },
        Mutation::ReleaseLock {
            key: LockKey::video_hash(&video.value.hash),
        },
    ];

    let mut cancelled = Vec::new();
    for pending in store.list_pending_for_video(id).await? {
        let exchange = pending.value;
        for party in [&exchange.initiator, &exchange.responder] {
            if users.load(store, party).await? {
                if let Some(user) = users.get_mut(party) {
                    user.remove_exchange(&exchange.id);
                }
            }
        }
        mutations.push(Mutation::DeleteExchange {
            id: exchange.id.clone(),
            precondition: Precondition::Version(pending.version),
        });
        mutations.push(Mutation::ReleaseLock {
            key: LockKey::pending_pair(&exchange.initiator, &exchange.responder),
        });
        cancelled.push(exchange);
    }

    Ok(VideoRemoval { mutations, cancelled })
}
