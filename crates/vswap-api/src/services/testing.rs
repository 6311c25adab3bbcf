//! Service wiring over an in-memory store for unit tests.

use std::sync::Arc;

use chrono::Utc;

use vswap_billing::DisabledBilling;
use vswap_models::{User, Video};
use vswap_store::{MarketStore, MemoryStore, Mutation, Precondition};

use super::*;

pub(crate) struct Fixture {
    pub store: Arc<MemoryStore>,
    pub quotas: QuotaService,
    pub users: UserService,
    pub videos: VideoService,
    pub exchanges: ExchangeService,
    pub ratings: RatingService,
    pub custody: CustodyService,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let notifications = NotificationService::new(store.clone());
        let subscriptions = SubscriptionService::new(store.clone(), Arc::new(DisabledBilling), notifications.clone());
        let quotas = QuotaService::new(store.clone());
        let ratings = RatingService::new(store.clone(), notifications.clone());

        Self {
            users: UserService::new(store.clone(), notifications.clone()),
            videos: VideoService::new(
                store.clone(),
                subscriptions.clone(),
                quotas.clone(),
                notifications.clone(),
                0.5,
            ),
            exchanges: ExchangeService::new(store.clone(), subscriptions, quotas.clone(), notifications),
            custody: CustodyService::new(store.clone(), ratings.clone()),
            quotas,
            ratings,
            store,
        }
    }

    pub async fn user(&self, uid: &str) {
        self.store
            .commit(vec![Mutation::put_user(
                User::new(uid, Some(format!("{}@example.com", uid)), Utc::now()),
                Precondition::MustNotExist,
            )])
            .await
            .unwrap();
    }

    pub async fn upload(&self, uid: &str, title: &str) -> Video {
        self.videos
            .upload(
                uid,
                &UploadVideo {
                    title: title.to_string(),
                    size: 1024,
                    hash: format!("sha256-{}-{}", uid, title),
                    category: None,
                    keywords: Vec::new(),
                },
            )
            .await
            .unwrap()
    }

    pub async fn stored_user(&self, uid: &str) -> User {
        self.store.get_user(uid).await.unwrap().unwrap().value
    }

    pub async fn stored_video(&self, video: &Video) -> Video {
        self.store.get_video(&video.id).await.unwrap().unwrap().value
    }
}
