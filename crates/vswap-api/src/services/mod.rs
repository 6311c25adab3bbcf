//! Business logic services.
//!
//! Every multi-record change is one atomic store commit, preconditioned on the
//! versions of the records it was computed from. A commit that loses a race
//! comes back as `ApiError::Contention` and is recomputed from fresh reads by
//! [`retry_on_contention`].

pub mod custody;
pub mod exchange;
pub mod notification;
pub mod quota;
pub mod rating;
pub mod subscription;
pub mod transfer;
pub mod user;
pub mod video;

#[cfg(test)]
pub(crate) mod testing;

pub use custody::{CustodyReport, CustodyService};
pub use exchange::{CreateExchange, ExchangeService, ExchangeView, RespondToExchange};
pub use notification::NotificationService;
pub use quota::{QuotaService, QuotaSummary};
pub use rating::{RatingService, SubmitRating};
pub use subscription::{ResolvedSubscription, SubscriptionService};
pub use user::{AccountRemoval, UserService};
pub use video::{ModerationOutcome, UploadVideo, VideoService};

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use vswap_models::User;
use vswap_store::{MarketStore, Mutation, Precondition, Versioned};

use crate::error::{ApiError, ApiResult};
use crate::metrics;

/// Maximum attempts for an optimistic commit.
const MAX_CONTENTION_RETRIES: u32 = 5;

/// Base delay for linear backoff between attempts (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 50;

/// Run `attempt` until it succeeds, fails with something other than
/// contention, or the attempts are used up.
pub(crate) async fn retry_on_contention<T, F, Fut>(operation: &'static str, mut attempt: F) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let mut last_error = None;

    for n in 0..MAX_CONTENTION_RETRIES {
        match attempt().await {
            Err(e) if e.is_contention() => {
                debug!(operation, attempt = n + 1, error = %e, "Commit lost a race, retrying");
                metrics::record_contention_retry(operation);
                last_error = Some(e);
                tokio::time::sleep(Duration::from_millis(RETRY_BASE_DELAY_MS * (n as u64 + 1))).await;
            }
            other => return other,
        }
    }

    warn!(
        operation,
        retries = MAX_CONTENTION_RETRIES,
        error = ?last_error,
        "Commit failed after retries"
    );
    Err(ApiError::ServiceUnavailable(format!(
        "Could not complete {} due to concurrent updates. Please try again.",
        operation.replace('_', " ")
    )))
}

/// Users touched by one commit, each written back once under the version it was read at.
#[derive(Default)]
pub(crate) struct UserWrites {
    users: HashMap<String, Versioned<User>>,
    order: Vec<String>,
}

impl UserWrites {
    /// Load `uid` into the set if it is not already there. Missing users are skipped.
    pub async fn load(&mut self, store: &dyn MarketStore, uid: &str) -> ApiResult<bool> {
        if self.users.contains_key(uid) {
            return Ok(true);
        }
        match store.get_user(uid).await? {
            Some(user) => {
                self.users.insert(uid.to_string(), user);
                self.order.push(uid.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn get(&self, uid: &str) -> Option<&User> {
        self.users.get(uid).map(|u| &u.value)
    }

    pub fn get_mut(&mut self, uid: &str) -> Option<&mut User> {
        self.users.get_mut(uid).map(|u| &mut u.value)
    }

    /// Drop `uid` from the set so no write is produced for it.
    pub fn forget(&mut self, uid: &str) {
        self.users.remove(uid);
        self.order.retain(|u| u != uid);
    }

    /// One versioned `PutUser` per loaded user, stamped with `updated_at`.
    pub fn into_mutations(mut self, at: chrono::DateTime<chrono::Utc>) -> Vec<Mutation> {
        self.order
            .iter()
            .filter_map(|uid| self.users.remove(uid))
            .map(|Versioned { mut value, version }| {
                value.updated_at = at;
                Mutation::put_user(value, Precondition::Version(version))
            })
            .collect()
    }
}
