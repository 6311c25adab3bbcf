//! REST client for the recurring-payment provider.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use metrics::{counter, histogram};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use vswap_models::{BillingState, BillingStatus};

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};

/// Subscription operations the backend needs from the billing provider.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Current state of the subscription with the given handle.
    async fn fetch_subscription(&self, subscription_id: &str) -> BillingResult<BillingState>;

    /// Stop future charges. The paid period is left to run out.
    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<()>;
}

/// Provider representation of a recurring-payment agreement.
#[derive(Debug, Deserialize)]
struct PreapprovalResponse {
    status: String,
    date_created: DateTime<FixedOffset>,
    #[serde(default)]
    next_payment_date: Option<DateTime<FixedOffset>>,
}

impl From<PreapprovalResponse> for BillingState {
    fn from(p: PreapprovalResponse) -> Self {
        BillingState {
            status: BillingStatus::parse(&p.status),
            date_created: p.date_created.with_timezone(&Utc),
            next_payment_date: p.next_payment_date.map(|d| d.with_timezone(&Utc)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// `BillingProvider` over the provider's preapproval REST API.
#[derive(Clone)]
pub struct HttpBillingClient {
    http: Client,
    config: BillingConfig,
}

impl HttpBillingClient {
    pub fn new(config: BillingConfig) -> BillingResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("vswap-billing/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BillingError::unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> BillingResult<Self> {
        Self::new(BillingConfig::from_env()?)
    }

    fn preapproval_url(&self, subscription_id: &str) -> String {
        format!(
            "{}/preapproval/{}",
            self.config.api_url,
            urlencoding::encode(subscription_id)
        )
    }

    /// Run a provider call under the configured deadline.
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> BillingResult<T>
    where
        F: std::future::Future<Output = BillingResult<T>>,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.config.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BillingError::Timeout(self.config.timeout.as_secs())),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(BillingError::Gateway { .. }) => "gateway_error",
            Err(BillingError::Timeout(_)) => "timeout",
            Err(_) => "error",
        };
        counter!("billing_requests_total", "operation" => operation, "outcome" => outcome)
            .increment(1);
        histogram!("billing_latency_seconds", "operation" => operation)
            .record(start.elapsed().as_secs_f64());

        if let Err(e) = &result {
            warn!(operation, error = %e, "Billing provider call failed");
        }
        result
    }

    async fn error_from(response: Response) -> BillingError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ProviderErrorBody>(&body)
            .ok()
            .and_then(|b| b.message.or(b.error))
            .unwrap_or(body);

        if status >= 500 {
            BillingError::unavailable(format!("provider returned {}: {}", status, message))
        } else {
            BillingError::gateway(status, message)
        }
    }
}

#[async_trait]
impl BillingProvider for HttpBillingClient {
    async fn fetch_subscription(&self, subscription_id: &str) -> BillingResult<BillingState> {
        let url = self.preapproval_url(subscription_id);
        self.bounded("fetch_subscription", async {
            let response = self
                .http
                .get(&url)
                .bearer_auth(&self.config.access_token)
                .send()
                .await?;

            match response.status() {
                StatusCode::OK => {
                    let body: PreapprovalResponse = response.json().await?;
                    debug!(subscription_id, status = %body.status, "Fetched subscription");
                    Ok(body.into())
                }
                _ => Err(Self::error_from(response).await),
            }
        })
        .await
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<()> {
        let url = self.preapproval_url(subscription_id);
        self.bounded("cancel_subscription", async {
            let response = self
                .http
                .put(&url)
                .bearer_auth(&self.config.access_token)
                .json(&json!({ "status": "cancelled" }))
                .send()
                .await?;

            if response.status().is_success() {
                info!(subscription_id, "Subscription cancelled at provider");
                Ok(())
            } else {
                Err(Self::error_from(response).await)
            }
        })
        .await
    }
}

/// Provider used when no billing credentials are configured.
///
/// Users without a billing handle never reach it; anyone with one gets a
/// `NotConfigured` error instead of an assumed plan.
#[derive(Debug, Clone, Default)]
pub struct DisabledBilling;

#[async_trait]
impl BillingProvider for DisabledBilling {
    async fn fetch_subscription(&self, _subscription_id: &str) -> BillingResult<BillingState> {
        Err(BillingError::NotConfigured("billing provider is disabled".into()))
    }

    async fn cancel_subscription(&self, _subscription_id: &str) -> BillingResult<()> {
        Err(BillingError::NotConfigured("billing provider is disabled".into()))
    }
}
