//! Billing client configuration.

use std::time::Duration;

use crate::error::{BillingError, BillingResult};

const DEFAULT_API_URL: &str = "https://api.mercadopago.com";
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Billing provider configuration.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Provider REST root, without trailing slash.
    pub api_url: String,
    /// Bearer token for the provider API.
    pub access_token: String,
    /// Upper bound for any single provider call.
    pub timeout: Duration,
}

impl BillingConfig {
    /// Load from environment variables.
    pub fn from_env() -> BillingResult<Self> {
        let access_token = std::env::var("BILLING_ACCESS_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BillingError::NotConfigured("BILLING_ACCESS_TOKEN must be set".into()))?;

        let timeout_secs = std::env::var("BILLING_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Ok(Self {
            api_url: std::env::var("BILLING_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            access_token,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear() {
        std::env::remove_var("BILLING_ACCESS_TOKEN");
        std::env::remove_var("BILLING_API_URL");
        std::env::remove_var("BILLING_TIMEOUT_SECS");
    }

    #[test]
    #[serial]
    fn test_requires_access_token() {
        clear();
        assert!(matches!(
            BillingConfig::from_env(),
            Err(BillingError::NotConfigured(_))
        ));
    }

    #[test]
    #[serial]
    fn test_defaults_and_overrides() {
        clear();
        std::env::set_var("BILLING_ACCESS_TOKEN", "tok");
        let config = BillingConfig::from_env().unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.timeout, Duration::from_secs(10));

        std::env::set_var("BILLING_API_URL", "http://localhost:9000/");
        std::env::set_var("BILLING_TIMEOUT_SECS", "3");
        let config = BillingConfig::from_env().unwrap();
        assert_eq!(config.api_url, "http://localhost:9000");
        assert_eq!(config.timeout, Duration::from_secs(3));
        clear();
    }
}
