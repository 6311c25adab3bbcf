//! Billing error types.

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Billing provider unavailable: {0}")]
    Unavailable(String),

    #[error("Billing provider did not answer within {0} seconds")]
    Timeout(u64),

    #[error("Billing provider returned {status}: {message}")]
    Gateway { status: u16, message: String },

    #[error("Invalid billing provider response: {0}")]
    InvalidResponse(String),

    #[error("Billing is not configured: {0}")]
    NotConfigured(String),
}

impl BillingError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn gateway(status: u16, message: impl Into<String>) -> Self {
        Self::Gateway {
            status,
            message: message.into(),
        }
    }

    /// Status code the provider answered with, for gateway errors.
    pub fn gateway_status(&self) -> Option<u16> {
        match self {
            Self::Gateway { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Unavailable(format!("request timed out: {}", e));
        }
        if e.is_decode() {
            return Self::InvalidResponse(e.to_string());
        }
        Self::Unavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_status() {
        assert_eq!(BillingError::gateway(402, "declined").gateway_status(), Some(402));
        assert_eq!(BillingError::Timeout(10).gateway_status(), None);
        assert_eq!(
            BillingError::gateway(400, "bad card").to_string(),
            "Billing provider returned 400: bad card"
        );
    }
}
