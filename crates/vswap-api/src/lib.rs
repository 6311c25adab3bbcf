//! Axum HTTP API server for the video exchange market.
//!
//! This crate provides:
//! - Exchange lifecycle, ownership transfer and rating services
//! - Plan quotas resolved against the billing provider
//! - HS256 bearer-token authentication
//! - Rate limiting, security headers and Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
