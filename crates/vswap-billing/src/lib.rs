//! Billing provider client.
//!
//! Fetches and cancels recurring-payment subscriptions by their opaque id.
//! Every call is bounded by a timeout; provider failures keep their HTTP
//! status so callers can tell a declined payment from an outage.

pub mod client;
pub mod config;
pub mod error;

pub use client::{BillingProvider, DisabledBilling, HttpBillingClient};
pub use config::BillingConfig;
pub use error::{BillingError, BillingResult};
