//! Exchange lifecycle: request, view, accept/reject and withdrawal.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use vswap_models::{
    Exchange, ExchangeDecision, ExchangeId, ExchangeRole, ExchangeStatus, Notification,
    NotificationKind, Rating, TransitionError, VideoId,
};
use vswap_store::{LockKey, MarketStore, Mutation, Precondition, StoreError, Versioned};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::services::notification::NotificationService;
use crate::services::quota::QuotaService;
use crate::services::subscription::SubscriptionService;
use crate::services::transfer::{plan_swap, SwapParties};
use crate::services::{retry_on_contention, UserWrites};

/// Request to open an exchange against another user's video.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateExchange {
    #[validate(length(min = 1, max = 128, message = "responder is required"))]
    pub responder: String,
    #[validate(length(min = 1, max = 128, message = "responder_video is required"))]
    pub responder_video: String,
}

/// Responder decision. `status` is `accepted` or `rejected`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RespondToExchange {
    #[validate(length(min = 1, message = "status is required"))]
    pub status: String,
    /// Video the responder takes from the initiator's library. Required to accept.
    #[serde(default)]
    pub initiator_video: Option<String>,
}

/// An exchange as seen by one of its parties.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeView {
    #[serde(flatten)]
    pub exchange: Exchange,
    pub role: ExchangeRole,
    /// Whether the caller already rated this exchange. Always false unless accepted.
    pub has_rated: bool,
}

const PENDING_PAIR_CONFLICT: &str =
    "A pending exchange already exists between you and this user";

#[derive(Clone)]
pub struct ExchangeService {
    store: Arc<dyn MarketStore>,
    subscriptions: SubscriptionService,
    quotas: QuotaService,
    notifications: NotificationService,
}

impl ExchangeService {
    pub fn new(
        store: Arc<dyn MarketStore>,
        subscriptions: SubscriptionService,
        quotas: QuotaService,
        notifications: NotificationService,
    ) -> Self {
        Self {
            store,
            subscriptions,
            quotas,
            notifications,
        }
    }

    async fn load_exchange(&self, id: &ExchangeId) -> ApiResult<Versioned<Exchange>> {
        self.store
            .get_exchange(id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Exchange {} not found", id)))
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Open a pending exchange from `initiator` against `request.responder_video`.
    pub async fn create(&self, initiator: &str, request: &CreateExchange) -> ApiResult<Exchange> {
        let responder = request.responder.as_str();
        let responder_video = VideoId::from_string(request.responder_video.as_str());
        let target = &responder_video;

        if initiator == responder {
            return Err(ApiError::validation("You cannot request an exchange with yourself"));
        }

        let exchange = retry_on_contention("create_exchange", move || async move {
            self.try_create(initiator, responder, target).await
        })
        .await?;

        info!(
            exchange_id = %exchange.id,
            initiator = %exchange.initiator,
            responder = %exchange.responder,
            "Exchange requested"
        );
        metrics::record_exchange("created");
        self.notifications
            .notify(
                Notification::new(&exchange.responder, NotificationKind::ExchangeRequested, Utc::now())
                    .with_exchange(exchange.id.clone())
                    .with_video(exchange.responder_video.clone()),
            )
            .await;

        Ok(exchange)
    }

    async fn try_create(&self, initiator: &str, responder: &str, target: &VideoId) -> ApiResult<Exchange> {
        let mut users = UserWrites::default();
        if !users.load(self.store.as_ref(), initiator).await? {
            return Err(ApiError::not_found(format!("User {} not found", initiator)));
        }
        if !users.load(self.store.as_ref(), responder).await? {
            return Err(ApiError::not_found(format!("User {} not found", responder)));
        }

        if self.quotas.owned_videos(initiator).await?.is_empty() {
            return Err(ApiError::validation(
                "You need at least one video in your library to request an exchange",
            ));
        }

        if !self.store.find_pending_between(initiator, responder).await?.is_empty() {
            return Err(ApiError::conflict(PENDING_PAIR_CONFLICT));
        }

        let initiator_user = users
            .get(initiator)
            .ok_or_else(|| ApiError::internal("Initiator not loaded"))?;
        let resolved = self.subscriptions.resolve(initiator_user).await?;
        self.quotas.check_exchange(initiator, &resolved.plan).await?;

        let video = self
            .store
            .get_video(target)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Video {} not found", target)))?;
        if !video.value.is_owned_by(responder) {
            return Err(ApiError::validation(format!(
                "Video {} is not in {}'s library",
                target, responder
            )));
        }

        let now = Utc::now();
        let exchange = Exchange::request(initiator, responder, target.clone(), now);
        for uid in [initiator, responder] {
            if let Some(user) = users.get_mut(uid) {
                user.add_exchange(exchange.id.clone());
            }
        }

        let mut mutations = vec![
            Mutation::put_exchange(exchange.clone(), Precondition::MustNotExist),
            Mutation::AcquireLock {
                key: LockKey::pending_pair(initiator, responder),
                holder: exchange.id.to_string(),
            },
        ];
        mutations.extend(users.into_mutations(now));

        match self.store.commit(mutations).await {
            Ok(()) => Ok(exchange),
            // The pair lock was taken by a concurrent request
            Err(StoreError::Conflict(_)) => Err(ApiError::conflict(PENDING_PAIR_CONFLICT)),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Read
    // =========================================================================

    async fn view(&self, uid: &str, exchange: Exchange) -> ApiResult<ExchangeView> {
        let role = exchange.role_of(uid).ok_or_else(|| {
            ApiError::forbidden("Only the initiator or responder can view this exchange")
        })?;

        let has_rated = exchange.status == ExchangeStatus::Accepted
            && self
                .store
                .get_rating(&Rating::id_for(&exchange.id, uid))
                .await?
                .is_some();

        Ok(ExchangeView {
            exchange,
            role,
            has_rated,
        })
    }

    pub async fn get(&self, uid: &str, id: &ExchangeId) -> ApiResult<ExchangeView> {
        let exchange = self.load_exchange(id).await?.into_inner();
        self.view(uid, exchange).await
    }

    /// Exchanges `uid` is a party to, newest first.
    pub async fn list(&self, uid: &str) -> ApiResult<Vec<ExchangeView>> {
        let exchanges = self.store.list_exchanges_for_user(uid).await?;
        let mut views = Vec::with_capacity(exchanges.len());
        for exchange in exchanges {
            views.push(self.view(uid, exchange).await?);
        }
        Ok(views)
    }

    // =========================================================================
    // Respond
    // =========================================================================

    /// Accept or reject a pending exchange. Only the responder may decide.
    pub async fn respond(&self, uid: &str, id: &ExchangeId, request: &RespondToExchange) -> ApiResult<Exchange> {
        let exchange = retry_on_contention("respond_exchange", move || async move {
            self.try_respond(uid, id, request).await
        })
        .await?;

        let (outcome, kind) = match exchange.status {
            ExchangeStatus::Accepted => ("accepted", NotificationKind::ExchangeAccepted),
            _ => ("rejected", NotificationKind::ExchangeRejected),
        };
        info!(exchange_id = %exchange.id, responder = %uid, outcome, "Exchange decided");
        metrics::record_exchange(outcome);
        self.notifications
            .notify(
                Notification::new(&exchange.initiator, kind, Utc::now())
                    .with_exchange(exchange.id.clone()),
            )
            .await;

        Ok(exchange)
    }

    async fn try_respond(&self, uid: &str, id: &ExchangeId, request: &RespondToExchange) -> ApiResult<Exchange> {
        let current = self.load_exchange(id).await?;

        // Terminal exchanges refuse every action, whoever asks
        if !current.value.is_pending() {
            return Err(TransitionError::NotPending {
                current: current.value.status,
                action: "accepted or rejected",
            }
            .into());
        }
        if current.value.role_of(uid) != Some(ExchangeRole::Responder) {
            return Err(ApiError::forbidden(
                "Only the responder can accept or reject this exchange",
            ));
        }

        let decision = ExchangeDecision::parse(
            &request.status,
            request.initiator_video.as_deref().map(VideoId::from_string),
        )?;

        let now = Utc::now();
        let mut decided = current.value.clone();
        decided.decide(decision.clone(), now)?;

        let mutations = match decision {
            ExchangeDecision::Reject => vec![
                Mutation::put_exchange(decided.clone(), Precondition::Version(current.version)),
                Mutation::ReleaseLock {
                    key: LockKey::pending_pair(&decided.initiator, &decided.responder),
                },
            ],
            ExchangeDecision::Accept { initiator_video } => {
                let initiator_video = self
                    .store
                    .get_video(&initiator_video)
                    .await?
                    .ok_or_else(|| ApiError::not_found(format!("Video {} not found", initiator_video)))?;
                let responder_video = self
                    .store
                    .get_video(&decided.responder_video)
                    .await?
                    .ok_or_else(|| {
                        ApiError::not_found(format!("Video {} not found", decided.responder_video))
                    })?;
                let initiator = self
                    .store
                    .get_user(&decided.initiator)
                    .await?
                    .ok_or_else(|| ApiError::not_found(format!("User {} not found", decided.initiator)))?;
                let responder = self
                    .store
                    .get_user(&decided.responder)
                    .await?
                    .ok_or_else(|| ApiError::not_found(format!("User {} not found", decided.responder)))?;

                plan_swap(
                    SwapParties {
                        exchange: Versioned::new(decided.clone(), current.version),
                        initiator,
                        responder,
                        initiator_video,
                        responder_video,
                    },
                    now,
                )?
            }
        };

        self.store.commit(mutations).await?;
        Ok(decided)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Withdraw a pending exchange. Only the initiator may do this.
    pub async fn delete(&self, uid: &str, id: &ExchangeId) -> ApiResult<()> {
        let exchange = retry_on_contention("delete_exchange", move || async move {
            self.try_delete(uid, id).await
        })
        .await?;

        info!(exchange_id = %exchange.id, initiator = %uid, "Exchange withdrawn");
        metrics::record_exchange("deleted");
        self.notifications
            .notify(
                Notification::new(&exchange.responder, NotificationKind::ExchangeCancelled, Utc::now())
                    .with_exchange(exchange.id.clone())
                    .with_video(exchange.responder_video.clone()),
            )
            .await;
        Ok(())
    }

    /// Withdraw the pending exchange `uid` opened against `video`.
    pub async fn delete_by_video(&self, uid: &str, video: &VideoId) -> ApiResult<ExchangeId> {
        let pending = self
            .store
            .find_pending_by_target(uid, video)
            .await?
            .ok_or_else(|| {
                ApiError::not_found(format!("No pending exchange of yours targets video {}", video))
            })?;
        let id = pending.value.id;
        self.delete(uid, &id).await?;
        Ok(id)
    }

    async fn try_delete(&self, uid: &str, id: &ExchangeId) -> ApiResult<Exchange> {
        let current = self.load_exchange(id).await?;
        current.value.ensure_deletable()?;
        if current.value.role_of(uid) != Some(ExchangeRole::Initiator) {
            return Err(ApiError::forbidden(
                "Only the initiator can delete a pending exchange",
            ));
        }

        let exchange = current.value;
        let mut users = UserWrites::default();
        for party in [&exchange.initiator, &exchange.responder] {
            if users.load(self.store.as_ref(), party).await? {
                if let Some(user) = users.get_mut(party) {
                    user.remove_exchange(&exchange.id);
                }
            }
        }

        let mut mutations = vec![
            Mutation::DeleteExchange {
                id: exchange.id.clone(),
                precondition: Precondition::Version(current.version),
            },
            Mutation::ReleaseLock {
                key: LockKey::pending_pair(&exchange.initiator, &exchange.responder),
            },
        ];
        mutations.extend(users.into_mutations(Utc::now()));
        self.store.commit(mutations).await?;

        Ok(exchange)
    }
}
