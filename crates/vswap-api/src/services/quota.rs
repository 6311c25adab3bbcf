//! Plan quota enforcement.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use vswap_models::quota::{check_exchange_count, evaluate_upload};
use vswap_models::{format_bytes, LibraryUsage, MonthWindow, Plan, PlanTier, QuotaViolation, Video};
use vswap_store::MarketStore;

use crate::error::ApiResult;
use crate::metrics;

/// Quota usage of one user against their effective plan.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaSummary {
    pub plan: PlanTier,
    /// Month the exchange counter covers, "YYYY-MM".
    pub month: String,
    pub storage_used: u64,
    pub storage_limit: u64,
    pub storage_used_formatted: String,
    pub storage_limit_formatted: String,
    pub library_count: u32,
    pub library_limit: u32,
    pub video_max_size: u64,
    pub video_max_size_formatted: String,
    pub exchanges_this_month: u32,
    /// 0 means unlimited.
    pub exchange_limit: u32,
    pub exchanges_unlimited: bool,
}

#[derive(Clone)]
pub struct QuotaService {
    store: Arc<dyn MarketStore>,
}

impl QuotaService {
    pub fn new(store: Arc<dyn MarketStore>) -> Self {
        Self { store }
    }

    /// Videos `uid` currently owns.
    pub async fn owned_videos(&self, uid: &str) -> ApiResult<Vec<Video>> {
        Ok(self.store.list_owned_videos(uid).await?)
    }

    /// Exchanges `uid` initiated in the current calendar month, any status.
    pub async fn exchanges_this_month(&self, uid: &str, window: &MonthWindow) -> ApiResult<u32> {
        Ok(self
            .store
            .count_initiated_between(uid, window.start, window.end)
            .await?)
    }

    pub async fn summary(&self, uid: &str, plan: &Plan) -> ApiResult<QuotaSummary> {
        let owned = self.owned_videos(uid).await?;
        let usage = LibraryUsage::of_owner(uid, &owned);
        let window = MonthWindow::current();
        let exchanges = self.exchanges_this_month(uid, &window).await?;

        Ok(QuotaSummary {
            plan: plan.name,
            month: window.key(),
            storage_used: usage.bytes,
            storage_limit: plan.library_storage,
            storage_used_formatted: format_bytes(usage.bytes),
            storage_limit_formatted: format_bytes(plan.library_storage),
            library_count: usage.videos,
            library_limit: plan.library_size,
            video_max_size: plan.video_max_size,
            video_max_size_formatted: format_bytes(plan.video_max_size),
            exchanges_this_month: exchanges,
            exchange_limit: plan.exchange_limit,
            exchanges_unlimited: plan.has_unlimited_exchanges(),
        })
    }

    /// Size, library count and storage checks for a new upload.
    pub fn check_upload(&self, uid: &str, plan: &Plan, usage: &LibraryUsage, size: u64) -> ApiResult<()> {
        evaluate_upload(plan, usage, size).map_err(|v| rejected(uid, v))?;
        Ok(())
    }

    /// Monthly exchange-request check for `uid`.
    pub async fn check_exchange(&self, uid: &str, plan: &Plan) -> ApiResult<()> {
        if plan.has_unlimited_exchanges() {
            return Ok(());
        }
        let used = self.exchanges_this_month(uid, &MonthWindow::current()).await?;
        check_exchange_count(plan, used).map_err(|v| rejected(uid, v))?;
        Ok(())
    }
}

fn rejected(uid: &str, violation: QuotaViolation) -> QuotaViolation {
    metrics::record_quota_rejection(violation.quota_name());
    info!(user_id = %uid, quota = violation.quota_name(), "Quota rejected request");
    violation
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use vswap_models::{Exchange, User, VideoId};
    use vswap_store::{MemoryStore, Mutation, Precondition};

    async fn store_with(videos: Vec<Video>, exchanges: Vec<Exchange>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let mut mutations = vec![Mutation::put_user(
            User::new("u1", None, Utc::now()),
            Precondition::MustNotExist,
        )];
        mutations.extend(videos.into_iter().map(|v| Mutation::put_video(v, Precondition::MustNotExist)));
        mutations.extend(
            exchanges
                .into_iter()
                .map(|e| Mutation::put_exchange(e, Precondition::MustNotExist)),
        );
        store.commit(mutations).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_summary_counts_only_current_ownership() {
        let now = Utc::now();
        let mine = Video::uploaded("u1", "a", 300, "h1", now);
        let mut traded = Video::uploaded("u1", "b", 500, "h2", now);
        traded.hand_over_to("u2");

        let store = store_with(vec![mine, traded], vec![]).await;
        let service = QuotaService::new(store);
        let summary = service.summary("u1", &Plan::for_tier(PlanTier::Basic)).await.unwrap();

        assert_eq!(summary.library_count, 1);
        assert_eq!(summary.storage_used, 300);
        assert_eq!(summary.exchange_limit, 5);
        assert!(!summary.exchanges_unlimited);
        assert_eq!(summary.storage_limit_formatted, "1.00 GB");
    }

    #[tokio::test]
    async fn test_exchange_limit_ignores_previous_month() {
        let window = MonthWindow::current();
        let mut exchanges: Vec<Exchange> = (0..4)
            .map(|_| Exchange::request("u1", "u2", VideoId::new(), window.start + Duration::hours(1)))
            .collect();
        exchanges.push(Exchange::request(
            "u1",
            "u2",
            VideoId::new(),
            window.start - Duration::days(3),
        ));

        let store = store_with(vec![], exchanges).await;
        let service = QuotaService::new(store.clone());
        let plan = Plan::for_tier(PlanTier::Basic);
        assert!(service.check_exchange("u1", &plan).await.is_ok());

        store
            .commit(vec![Mutation::put_exchange(
                Exchange::request("u1", "u3", VideoId::new(), window.start + Duration::hours(2)),
                Precondition::MustNotExist,
            )])
            .await
            .unwrap();
        let err = service.check_exchange("u1", &plan).await.unwrap_err();
        assert_eq!(err.code(), "conflict");
        assert!(err.to_string().contains("5 of 5"));

        // Premium is unlimited
        assert!(service
            .check_exchange("u1", &Plan::for_tier(PlanTier::Premium))
            .await
            .is_ok());
    }

    #[test]
    fn test_check_upload_reports_first_violation() {
        let service = QuotaService::new(Arc::new(MemoryStore::new()));
        let plan = Plan {
            library_size: 2,
            ..Plan::for_tier(PlanTier::Basic)
        };
        let full = LibraryUsage { videos: 2, bytes: 10 };
        let err = service.check_upload("u1", &plan, &full, 10).unwrap_err();
        assert!(err.to_string().contains("at most 2"));

        let roomy = LibraryUsage { videos: 1, bytes: 10 };
        assert!(service.check_upload("u1", &plan, &roomy, 10).is_ok());
    }
}
