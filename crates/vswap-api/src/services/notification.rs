//! Notification delivery.
//!
//! Notifications are side effects: a failed or slow write is logged and never
//! fails the operation that triggered it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use vswap_models::Notification;
use vswap_store::MarketStore;

use crate::error::ApiResult;

/// Upper bound for one notification write.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 100;

#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn MarketStore>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn MarketStore>) -> Self {
        Self { store }
    }

    pub async fn notify(&self, notification: Notification) {
        let kind = notification.kind.as_str();
        let user = notification.user.clone();

        match tokio::time::timeout(NOTIFY_TIMEOUT, self.store.insert_notification(&notification)).await {
            Ok(Ok(())) => debug!(user_id = %user, kind, "Notification stored"),
            Ok(Err(e)) => warn!(user_id = %user, kind, error = %e, "Failed to store notification"),
            Err(_) => warn!(user_id = %user, kind, "Timed out storing notification"),
        }
    }

    pub async fn notify_all(&self, notifications: impl IntoIterator<Item = Notification>) {
        for notification in notifications {
            self.notify(notification).await;
        }
    }

    /// Most recent notifications for `uid`. `limit` is clamped to `1..=100`.
    pub async fn list(&self, uid: &str, limit: Option<usize>) -> ApiResult<Vec<Notification>> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        Ok(self.store.list_notifications(uid, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use vswap_models::NotificationKind;
    use vswap_store::MemoryStore;

    #[tokio::test]
    async fn test_list_is_newest_first_and_clamped() {
        let service = NotificationService::new(Arc::new(MemoryStore::new()));
        let now = Utc::now();
        for i in 0..3 {
            service
                .notify(Notification::new(
                    "u1",
                    NotificationKind::ExchangeRequested,
                    now + ChronoDuration::seconds(i),
                ))
                .await;
        }
        service
            .notify(Notification::new("u2", NotificationKind::RatingReceived, now))
            .await;

        let all = service.list("u1", None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[0].created_at > all[2].created_at);

        let one = service.list("u1", Some(0)).await.unwrap();
        assert_eq!(one.len(), 1);
    }
}
