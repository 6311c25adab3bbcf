//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use vswap_billing::BillingError;
use vswap_models::{QuotaViolation, TransitionError};
use vswap_store::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    StateConflict(String),

    /// A versioned write lost a race. Services retry these before they reach a client.
    #[error("Concurrent modification: {0}")]
    Contention(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Rate limit exceeded, retry shortly")]
    RateLimited,

    #[error("Payment gateway error ({status}): {message}")]
    PaymentGateway { status: u16, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn state_conflict(msg: impl Into<String>) -> Self {
        Self::StateConflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_contention(&self) -> bool {
        matches!(self, ApiError::Contention(_))
    }

    /// Machine-readable category.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Validation(_) => "validation",
            ApiError::Conflict(_) | ApiError::Contention(_) => "conflict",
            ApiError::StateConflict(_) => "state_conflict",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::RateLimited => "rate_limited",
            ApiError::PaymentGateway { .. } => "payment_gateway",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) | ApiError::StateConflict(_) | ApiError::Contention(_) => {
                StatusCode::CONFLICT
            }
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            // Provider client errors (declined card, unknown subscription) keep their status
            ApiError::PaymentGateway { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::Conflict(what) => ApiError::Conflict(format!("{} already exists", what)),
            StoreError::Contention(what) => ApiError::Contention(what),
            StoreError::Backend(msg) => ApiError::Internal(format!("Store error: {}", msg)),
        }
    }
}

impl From<QuotaViolation> for ApiError {
    fn from(v: QuotaViolation) -> Self {
        ApiError::Conflict(v.to_string())
    }
}

impl From<TransitionError> for ApiError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::NotPending { .. } => ApiError::StateConflict(e.to_string()),
            TransitionError::InvalidStatus(_) | TransitionError::MissingInitiatorVideo => {
                ApiError::Validation(e.to_string())
            }
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::Gateway { status, message } => ApiError::PaymentGateway { status, message },
            other => ApiError::ServiceUnavailable(format!("Billing provider: {}", other)),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let reasons: Vec<String> = errs
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                format!("{}: {}", field, reasons.join(", "))
            })
            .collect();
        messages.sort();
        ApiError::Validation(messages.join("; "))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_gateway: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_status: Option<u16>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = match &self {
            ApiError::Internal(_) => {
                error!(error = %self, "Unhandled internal error");
                if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" {
                    "An internal error occurred".to_string()
                } else {
                    self.to_string()
                }
            }
            ApiError::PaymentGateway { message, .. } => message.clone(),
            _ => self.to_string(),
        };

        let (payment_gateway, provider_status) = match &self {
            ApiError::PaymentGateway { status, .. } => (Some(true), Some(*status)),
            _ => (None, None),
        };

        let body = ErrorResponse {
            detail,
            code: self.code(),
            payment_gateway,
            provider_status,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vswap_models::{ExchangeStatus, PlanTier};

    #[test]
    fn test_store_errors_map_to_categories() {
        assert_eq!(ApiError::from(StoreError::NotFound("users/x".into())).code(), "not_found");
        assert_eq!(ApiError::from(StoreError::Conflict("ratings/x".into())).code(), "conflict");
        assert!(ApiError::from(StoreError::Contention("users/x".into())).is_contention());
        assert_eq!(
            ApiError::from(StoreError::backend("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_non_pending_transition_is_state_conflict() {
        let err = ApiError::from(TransitionError::NotPending {
            current: ExchangeStatus::Accepted,
            action: "rejected",
        });
        assert_eq!(err.code(), "state_conflict");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_quota_violation_names_the_quota() {
        let err = ApiError::from(QuotaViolation::ExchangeLimitReached {
            plan: PlanTier::Basic,
            used: 5,
            limit: 5,
        });
        assert_eq!(err.code(), "conflict");
        assert!(err.to_string().contains("basic"));
    }

    #[test]
    fn test_payment_gateway_keeps_client_status() {
        let declined = ApiError::from(BillingError::gateway(402, "card declined"));
        assert_eq!(declined.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(declined.code(), "payment_gateway");

        let odd = ApiError::PaymentGateway {
            status: 302,
            message: "moved".into(),
        };
        assert_eq!(odd.status_code(), StatusCode::BAD_GATEWAY);

        let timeout = ApiError::from(BillingError::Timeout(10));
        assert_eq!(timeout.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
