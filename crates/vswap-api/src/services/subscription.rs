//! Subscription resolution, scheduled downgrade and cancellation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use vswap_billing::BillingProvider;
use vswap_models::{Notification, NotificationKind, Plan, PlanTier, SubscriptionRef, User};
use vswap_store::{MarketStore, Mutation, Precondition};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::services::notification::NotificationService;
use crate::services::retry_on_contention;

/// Effective subscription of a user.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedSubscription {
    pub plan: Plan,
    pub is_cancelled: bool,
    pub next_billing_date: Option<DateTime<Utc>>,
    /// True when this resolution moved the user to the basic plan.
    pub downgraded: bool,
}

#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn MarketStore>,
    billing: Arc<dyn BillingProvider>,
    notifications: NotificationService,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn MarketStore>,
        billing: Arc<dyn BillingProvider>,
        notifications: NotificationService,
    ) -> Self {
        Self {
            store,
            billing,
            notifications,
        }
    }

    /// Plan record for a tier, falling back to the built-in seed values.
    pub async fn plan_for(&self, tier: PlanTier) -> ApiResult<Plan> {
        Ok(self
            .store
            .get_plan(tier)
            .await?
            .unwrap_or_else(|| Plan::for_tier(tier)))
    }

    /// Write seed plans for tiers the store does not have yet. Returns how many were written.
    pub async fn seed_plans(&self) -> ApiResult<usize> {
        let mut seeded = 0;
        for tier in PlanTier::ALL {
            if self.store.get_plan(tier).await?.is_none() {
                self.store.put_plan(&Plan::for_tier(tier)).await?;
                seeded += 1;
            }
        }
        Ok(seeded)
    }

    /// Resolve the effective plan of `user`.
    ///
    /// A cancelled subscription whose paid period has run out is downgraded to
    /// basic as part of the read. Provider failures are returned, never
    /// replaced by an assumed plan.
    pub async fn resolve(&self, user: &User) -> ApiResult<ResolvedSubscription> {
        let Some(subscription_id) = user.subscription.subscription_id.as_deref() else {
            return Ok(ResolvedSubscription {
                plan: self.plan_for(user.subscription.plan).await?,
                is_cancelled: false,
                next_billing_date: None,
                downgraded: false,
            });
        };

        let state = self.billing.fetch_subscription(subscription_id).await?;
        let next_billing_date = state.next_billing_date();

        if state.is_expired_at(Utc::now()) {
            let downgraded = self.downgrade(&user.uid, subscription_id).await?;
            return Ok(ResolvedSubscription {
                plan: self.plan_for(PlanTier::Basic).await?,
                is_cancelled: true,
                next_billing_date,
                downgraded,
            });
        }

        Ok(ResolvedSubscription {
            plan: self.plan_for(user.subscription.plan).await?,
            is_cancelled: state.is_cancelled(),
            next_billing_date,
            downgraded: false,
        })
    }

    /// Move `uid` to basic and drop the billing handle, if it still holds `subscription_id`.
    async fn downgrade(&self, uid: &str, subscription_id: &str) -> ApiResult<bool> {
        let changed = retry_on_contention("downgrade_plan", move || async move {
            let Some(current) = self.store.get_user(uid).await? else {
                return Err(ApiError::not_found(format!("User {} not found", uid)));
            };
            if current.value.subscription.subscription_id.as_deref() != Some(subscription_id) {
                // Another request already downgraded or resubscribed
                return Ok(false);
            }

            let mut user = current.value;
            let previous = user.subscription.plan;
            user.subscription = SubscriptionRef::basic();
            user.updated_at = Utc::now();
            self.store
                .commit(vec![Mutation::put_user(user, Precondition::Version(current.version))])
                .await?;

            info!(user_id = %uid, from = %previous, "Subscription period ended, downgraded to basic");
            Ok(true)
        })
        .await?;

        if changed {
            metrics::record_plan_downgrade();
            self.notifications
                .notify(Notification::new(uid, NotificationKind::PlanDowngraded, Utc::now()))
                .await;
        }
        Ok(changed)
    }

    /// Cancel the user's recurring payment. The plan stays until the paid period ends.
    pub async fn cancel(&self, user: &User) -> ApiResult<ResolvedSubscription> {
        let Some(subscription_id) = user.subscription.subscription_id.as_deref() else {
            return Err(ApiError::validation("There is no active subscription to cancel"));
        };

        if let Err(e) = self.billing.cancel_subscription(subscription_id).await {
            warn!(user_id = %user.uid, error = %e, "Subscription cancellation failed");
            return Err(e.into());
        }
        info!(user_id = %user.uid, "Subscription cancelled");

        self.resolve(user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex;
    use vswap_billing::{BillingError, BillingResult, DisabledBilling};
    use vswap_models::{BillingState, BillingStatus};
    use vswap_store::MemoryStore;

    struct FixedBilling {
        state: Mutex<BillingState>,
    }

    #[async_trait]
    impl BillingProvider for FixedBilling {
        async fn fetch_subscription(&self, _id: &str) -> BillingResult<BillingState> {
            Ok(self.state.lock().unwrap().clone())
        }

        async fn cancel_subscription(&self, _id: &str) -> BillingResult<()> {
            self.state.lock().unwrap().status = BillingStatus::Cancelled;
            Ok(())
        }
    }

    struct DownBilling;

    #[async_trait]
    impl BillingProvider for DownBilling {
        async fn fetch_subscription(&self, _id: &str) -> BillingResult<BillingState> {
            Err(BillingError::Timeout(10))
        }

        async fn cancel_subscription(&self, _id: &str) -> BillingResult<()> {
            Err(BillingError::gateway(400, "cannot cancel"))
        }
    }

    async fn setup(
        billing: Arc<dyn BillingProvider>,
        plan: PlanTier,
        subscription_id: Option<&str>,
    ) -> (Arc<MemoryStore>, SubscriptionService, User) {
        let store = Arc::new(MemoryStore::new());
        let mut user = User::new("u1", None, Utc::now());
        user.subscription = SubscriptionRef {
            plan,
            subscription_id: subscription_id.map(str::to_string),
        };
        store
            .commit(vec![Mutation::put_user(user.clone(), Precondition::MustNotExist)])
            .await
            .unwrap();
        let service = SubscriptionService::new(
            store.clone(),
            billing,
            NotificationService::new(store.clone()),
        );
        (store, service, user)
    }

    fn billing(status: BillingStatus, created_days_ago: i64, next_in_days: Option<i64>) -> Arc<FixedBilling> {
        let now = Utc::now();
        Arc::new(FixedBilling {
            state: Mutex::new(BillingState {
                status,
                date_created: now - Duration::days(created_days_ago),
                next_payment_date: next_in_days.map(|d| now + Duration::days(d)),
            }),
        })
    }

    #[tokio::test]
    async fn test_unbilled_user_never_calls_provider() {
        let (_, service, user) = setup(Arc::new(DisabledBilling), PlanTier::Basic, None).await;
        let resolved = service.resolve(&user).await.unwrap();
        assert_eq!(resolved.plan.name, PlanTier::Basic);
        assert!(!resolved.is_cancelled);
        assert!(resolved.next_billing_date.is_none());
    }

    #[tokio::test]
    async fn test_active_subscription_keeps_plan() {
        let provider = billing(BillingStatus::Authorized, 40, Some(20));
        let (_, service, user) = setup(provider, PlanTier::Premium, Some("sub_1")).await;

        let resolved = service.resolve(&user).await.unwrap();
        assert_eq!(resolved.plan.name, PlanTier::Premium);
        assert!(!resolved.is_cancelled);
        assert!(resolved.next_billing_date.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_within_paid_period_keeps_plan() {
        let provider = billing(BillingStatus::Cancelled, 20, Some(10));
        let (store, service, user) = setup(provider, PlanTier::Advanced, Some("sub_1")).await;

        let resolved = service.resolve(&user).await.unwrap();
        assert_eq!(resolved.plan.name, PlanTier::Advanced);
        assert!(resolved.is_cancelled);
        assert!(!resolved.downgraded);

        let stored = store.get_user("u1").await.unwrap().unwrap().value;
        assert_eq!(stored.subscription.subscription_id.as_deref(), Some("sub_1"));
    }

    #[tokio::test]
    async fn test_expired_cancellation_downgrades_and_notifies() {
        let provider = billing(BillingStatus::Cancelled, 45, Some(-15));
        let (store, service, user) = setup(provider, PlanTier::Advanced, Some("sub_1")).await;

        let resolved = service.resolve(&user).await.unwrap();
        assert_eq!(resolved.plan.name, PlanTier::Basic);
        assert!(resolved.downgraded);

        let stored = store.get_user("u1").await.unwrap().unwrap().value;
        assert_eq!(stored.subscription, SubscriptionRef::basic());

        let notes = store.list_notifications("u1", 10).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, NotificationKind::PlanDowngraded);

        // A second resolve with the stale user record does not downgrade again
        let again = service.resolve(&user).await.unwrap();
        assert!(!again.downgraded);
        assert_eq!(store.list_notifications("u1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_is_not_guessed() {
        let (_, service, user) = setup(Arc::new(DownBilling), PlanTier::Premium, Some("sub_1")).await;
        let err = service.resolve(&user).await.unwrap_err();
        assert_eq!(err.code(), "service_unavailable");
    }

    #[tokio::test]
    async fn test_cancel_requires_handle_and_surfaces_gateway_errors() {
        let (_, service, user) = setup(Arc::new(DownBilling), PlanTier::Basic, None).await;
        assert_eq!(service.cancel(&user).await.unwrap_err().code(), "validation");

        let (_, service, user) = setup(Arc::new(DownBilling), PlanTier::Premium, Some("sub_1")).await;
        assert_eq!(service.cancel(&user).await.unwrap_err().code(), "payment_gateway");
    }

    #[tokio::test]
    async fn test_cancel_marks_subscription_cancelled() {
        let provider = billing(BillingStatus::Authorized, 10, Some(20));
        let (_, service, user) = setup(provider, PlanTier::Premium, Some("sub_1")).await;
        let resolved = service.cancel(&user).await.unwrap();
        assert!(resolved.is_cancelled);
        assert_eq!(resolved.plan.name, PlanTier::Premium);
    }

    #[tokio::test]
    async fn test_seed_plans_is_idempotent() {
        let (store, service, _) = setup(Arc::new(DisabledBilling), PlanTier::Basic, None).await;
        assert_eq!(service.seed_plans().await.unwrap(), 3);
        assert_eq!(service.seed_plans().await.unwrap(), 0);
        let premium = store.get_plan(PlanTier::Premium).await.unwrap().unwrap();
        assert!(premium.has_unlimited_exchanges());
    }
}
