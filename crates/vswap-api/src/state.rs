//! Application state.

use std::sync::Arc;

use tracing::{info, warn};

use vswap_billing::{BillingProvider, DisabledBilling, HttpBillingClient};
use vswap_firestore::{FirestoreClient, FirestoreStore};
use vswap_store::{MarketStore, MemoryStore};

use crate::auth::JwtVerifier;
use crate::config::{ApiConfig, StoreBackend};
use crate::services::{
    CustodyService, ExchangeService, NotificationService, QuotaService, RatingService, SubscriptionService,
    UserService, VideoService,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn MarketStore>,
    pub jwt: Arc<JwtVerifier>,
    pub users: UserService,
    pub subscriptions: SubscriptionService,
    pub quotas: QuotaService,
    pub videos: VideoService,
    pub exchanges: ExchangeService,
    pub ratings: RatingService,
    pub notifications: NotificationService,
    pub custody: CustodyService,
}

impl AppState {
    /// Wire the services over an already constructed store and billing provider.
    pub fn new(config: ApiConfig, store: Arc<dyn MarketStore>, billing: Arc<dyn BillingProvider>) -> Self {
        let jwt = Arc::new(JwtVerifier::new(&config.jwt_secret, config.jwt_issuer.as_deref()));

        let notifications = NotificationService::new(store.clone());
        let users = UserService::new(store.clone(), notifications.clone());
        let subscriptions = SubscriptionService::new(store.clone(), billing, notifications.clone());
        let quotas = QuotaService::new(store.clone());
        let ratings = RatingService::new(store.clone(), notifications.clone());
        let videos = VideoService::new(
            store.clone(),
            subscriptions.clone(),
            quotas.clone(),
            notifications.clone(),
            config.moderation_threshold,
        );
        let exchanges = ExchangeService::new(
            store.clone(),
            subscriptions.clone(),
            quotas.clone(),
            notifications.clone(),
        );
        let custody = CustodyService::new(store.clone(), ratings.clone());

        Self {
            config,
            store,
            jwt,
            users,
            subscriptions,
            quotas,
            videos,
            exchanges,
            ratings,
            notifications,
            custody,
        }
    }

    /// Build the store and billing client from the environment.
    pub async fn from_env(config: ApiConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn MarketStore> = match config.store_backend {
            StoreBackend::Memory => {
                warn!("Using in-memory store; data is lost on restart");
                Arc::new(MemoryStore::new())
            }
            StoreBackend::Firestore => {
                let client = FirestoreClient::from_env().await?;
                info!("Connected to Firestore");
                Arc::new(FirestoreStore::new(client))
            }
        };

        let billing: Arc<dyn BillingProvider> = match HttpBillingClient::from_env() {
            Ok(client) => Arc::new(client),
            Err(e) => {
                warn!(error = %e, "Billing provider not configured; paid subscriptions cannot be resolved");
                Arc::new(DisabledBilling)
            }
        };

        Ok(Self::new(config, store, billing))
    }
}
