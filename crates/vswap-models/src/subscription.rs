//! Subscription references and billing-provider state.

use chrono::{DateTime, Months, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::plan::PlanTier;

/// Subscription reference stored on a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SubscriptionRef {
    pub plan: PlanTier,
    /// External billing handle. `None` for users on the free plan.
    #[serde(default)]
    pub subscription_id: Option<String>,
}

impl SubscriptionRef {
    pub fn basic() -> Self {
        Self::default()
    }

    /// Whether a recurring charge is attached at the billing provider.
    pub fn is_billed(&self) -> bool {
        self.subscription_id.is_some()
    }
}

/// Status reported by the billing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BillingStatus {
    Authorized,
    Paused,
    Cancelled,
    Pending,
}

impl BillingStatus {
    /// Parse the provider's status string. Unknown values count as pending.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "authorized" | "active" => BillingStatus::Authorized,
            "paused" => BillingStatus::Paused,
            "cancelled" | "canceled" => BillingStatus::Cancelled,
            _ => BillingStatus::Pending,
        }
    }
}

/// Snapshot of a recurring-payment subscription at the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BillingState {
    pub status: BillingStatus,
    pub date_created: DateTime<Utc>,
    #[serde(default)]
    pub next_payment_date: Option<DateTime<Utc>>,
}

impl BillingState {
    pub fn is_cancelled(&self) -> bool {
        self.status == BillingStatus::Cancelled
    }

    /// Next billing date as shown to the user.
    ///
    /// A subscription created today has not been charged yet and the provider
    /// reports today as the next payment date; the real next charge is one
    /// calendar month later.
    pub fn next_billing_date(&self) -> Option<DateTime<Utc>> {
        let next = self.next_payment_date?;
        if next.date_naive() == self.date_created.date_naive() {
            Some(next.checked_add_months(Months::new(1)).unwrap_or(next))
        } else {
            Some(next)
        }
    }

    /// Whether a cancelled subscription's paid period is over at `now`.
    ///
    /// A cancelled subscription with no next payment date has no paid period left.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if !self.is_cancelled() {
            return false;
        }
        match self.next_billing_date() {
            Some(next) => next < now,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_next_billing_date_same_day_advances_one_month() {
        let state = BillingState {
            status: BillingStatus::Authorized,
            date_created: at(2025, 1, 31, 9),
            next_payment_date: Some(at(2025, 1, 31, 18)),
        };
        // chrono clamps to the last day of February
        assert_eq!(state.next_billing_date(), Some(at(2025, 2, 28, 18)));
    }

    #[test]
    fn test_next_billing_date_other_day_unchanged() {
        let state = BillingState {
            status: BillingStatus::Authorized,
            date_created: at(2025, 1, 10, 9),
            next_payment_date: Some(at(2025, 2, 10, 9)),
        };
        assert_eq!(state.next_billing_date(), Some(at(2025, 2, 10, 9)));
    }

    #[test]
    fn test_active_subscription_never_expires() {
        let state = BillingState {
            status: BillingStatus::Authorized,
            date_created: at(2024, 1, 10, 9),
            next_payment_date: Some(at(2024, 2, 10, 9)),
        };
        assert!(!state.is_expired_at(at(2025, 1, 1, 0)));
    }

    #[test]
    fn test_cancelled_subscription_expires_after_period() {
        let state = BillingState {
            status: BillingStatus::Cancelled,
            date_created: at(2025, 1, 10, 9),
            next_payment_date: Some(at(2025, 2, 10, 9)),
        };
        assert!(!state.is_expired_at(at(2025, 2, 1, 0)));
        assert!(state.is_expired_at(at(2025, 2, 11, 0)));
    }

    #[test]
    fn test_cancelled_without_next_date_is_expired() {
        let state = BillingState {
            status: BillingStatus::Cancelled,
            date_created: at(2025, 1, 10, 9),
            next_payment_date: None,
        };
        assert!(state.is_expired_at(at(2025, 1, 10, 10)));
    }

    #[test]
    fn test_billing_status_parse() {
        assert_eq!(BillingStatus::parse("cancelled"), BillingStatus::Cancelled);
        assert_eq!(BillingStatus::parse("CANCELED"), BillingStatus::Cancelled);
        assert_eq!(BillingStatus::parse("authorized"), BillingStatus::Authorized);
        assert_eq!(BillingStatus::parse("weird"), BillingStatus::Pending);
    }
}
