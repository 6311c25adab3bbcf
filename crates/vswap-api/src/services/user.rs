//! User provisioning, lookup and account deletion.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use vswap_models::{Exchange, Notification, NotificationKind, User};
use vswap_store::{LockKey, MarketStore, Mutation, Precondition, StoreError, Versioned};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::services::notification::NotificationService;
use crate::services::video::stage_video_removal;
use crate::services::{retry_on_contention, UserWrites};

/// What deleting an account removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountRemoval {
    pub videos: usize,
    pub exchanges: usize,
}

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn MarketStore>,
    notifications: NotificationService,
}

impl UserService {
    pub fn new(store: Arc<dyn MarketStore>, notifications: NotificationService) -> Self {
        Self { store, notifications }
    }

    /// Load the caller's record, creating it on the basic plan on first use.
    pub async fn ensure_user(&self, auth: &AuthUser) -> ApiResult<Versioned<User>> {
        if let Some(user) = self.store.get_user(&auth.uid).await? {
            return Ok(user);
        }

        let user = User::new(&auth.uid, auth.email.clone(), Utc::now());
        match self
            .store
            .commit(vec![Mutation::put_user(user, Precondition::MustNotExist)])
            .await
        {
            Ok(()) => info!(user_id = %auth.uid, "Provisioned user"),
            // A concurrent request created it first
            Err(StoreError::Conflict(_)) => {}
            Err(e) => return Err(e.into()),
        }

        self.store
            .get_user(&auth.uid)
            .await?
            .ok_or_else(|| ApiError::internal(format!("User {} vanished after provisioning", auth.uid)))
    }

    /// Load an existing user.
    pub async fn get(&self, uid: &str) -> ApiResult<Versioned<User>> {
        self.store
            .get_user(uid)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("User {} not found", uid)))
    }

    /// Delete `uid` with everything that belongs to or points at the account.
    ///
    /// Owned videos go through the same cascade as a single video deletion.
    /// Every exchange the user is party to is deleted, pending pair locks are
    /// released and counterparties lose the exchange from their lists. One
    /// commit covers all of it. Counterparties of cancelled pending exchanges
    /// are notified afterwards.
    pub async fn delete_account(&self, uid: &str) -> ApiResult<AccountRemoval> {
        let (removal, cancelled) = retry_on_contention("delete_account", move || async move {
            self.try_delete_account(uid).await
        })
        .await?;

        info!(
            user_id = %uid,
            videos = removal.videos,
            exchanges = removal.exchanges,
            "Account deleted"
        );

        let now = Utc::now();
        let notices: Vec<Notification> = cancelled
            .iter()
            .filter_map(|exchange| {
                let other = exchange.counterparty(uid)?;
                metrics::record_exchange("cancelled");
                Some(
                    Notification::new(other, NotificationKind::ExchangeCancelled, now)
                        .with_exchange(exchange.id.clone())
                        .with_video(exchange.responder_video.clone()),
                )
            })
            .collect();
        self.notifications.notify_all(notices).await;

        Ok(removal)
    }

    async fn try_delete_account(&self, uid: &str) -> ApiResult<(AccountRemoval, Vec<Exchange>)> {
        let store = self.store.as_ref();
        // Read before the listings, so anything linked to the account later fails the commit
        let account = self.get(uid).await?;

        let mut users = UserWrites::default();
        let mut mutations = Vec::new();
        let mut removed = HashSet::new();
        let mut cancelled = Vec::new();

        let owned = store.list_owned_videos(uid).await?;
        let mut videos = 0;
        for video in &owned {
            let Some(current) = store.get_video(&video.id).await? else {
                continue;
            };
            let staged = stage_video_removal(store, &current, &mut users).await?;
            mutations.extend(staged.mutations);
            for exchange in staged.cancelled {
                removed.insert(exchange.id.clone());
                cancelled.push(exchange);
            }
            videos += 1;
        }

        for listed in store.list_exchanges_for_user(uid).await? {
            if removed.contains(&listed.id) {
                continue;
            }
            let Some(current) = store.get_exchange(&listed.id).await? else {
                continue;
            };
            let exchange = current.value;
            for party in [&exchange.initiator, &exchange.responder] {
                if users.load(store, party).await? {
                    if let Some(user) = users.get_mut(party) {
                        user.remove_exchange(&exchange.id);
                    }
                }
            }
            mutations.push(Mutation::DeleteExchange {
                id: exchange.id.clone(),
                precondition: Precondition::Version(current.version),
            });
            removed.insert(exchange.id.clone());
            if exchange.is_pending() {
                mutations.push(Mutation::ReleaseLock {
                    key: LockKey::pending_pair(&exchange.initiator, &exchange.responder),
                });
                cancelled.push(exchange);
            }
        }

        users.forget(uid);
        mutations.push(Mutation::DeleteUser {
            uid: uid.to_string(),
            precondition: Precondition::Version(account.version),
        });
        mutations.extend(users.into_mutations(Utc::now()));
        self.store.commit(mutations).await?;

        let removal = AccountRemoval {
            videos,
            exchanges: removed.len(),
        };
        Ok((removal, cancelled))
    }
}
