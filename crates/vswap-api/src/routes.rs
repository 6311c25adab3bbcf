//! API routes.

use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::handlers::account::delete_account;
use crate::handlers::admin::{audit_custody, repair_custody};
use crate::handlers::exchanges::{
    create_exchange, delete_exchange, delete_exchange_by_video, get_exchange, list_exchanges, rate_exchange,
    respond_to_exchange,
};
use crate::handlers::moderation::moderation_callback;
use crate::handlers::notifications::list_notifications;
use crate::handlers::quota::get_quota;
use crate::handlers::subscription::{cancel_subscription, get_subscription};
use crate::handlers::videos::{delete_video, report_video, set_video_sensitivity, upload_video};
use crate::handlers::{health, ready};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, rate_limit_middleware, request_id, request_logging, security_headers, IpRateLimiter};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let video_routes = Router::new()
        .route("/videos", post(upload_video))
        .route("/videos/:video_id", delete(delete_video))
        .route("/videos/:video_id/sensitivity", patch(set_video_sensitivity))
        .route("/videos/:video_id/report", post(report_video));

    let exchange_routes = Router::new()
        .route("/exchanges", get(list_exchanges).post(create_exchange))
        .route("/exchanges/:exchange_id", get(get_exchange).delete(delete_exchange))
        .route("/exchanges/:exchange_id/respond", post(respond_to_exchange))
        .route("/exchanges/:exchange_id/rating", post(rate_exchange))
        // Withdraw by target video
        .route("/exchanges/by-video/:video_id", delete(delete_exchange_by_video));

    let account_routes = Router::new()
        .route("/account", delete(delete_account))
        .route("/quota", get(get_quota))
        .route("/subscription", get(get_subscription))
        .route("/subscription/cancel", post(cancel_subscription))
        .route("/notifications", get(list_notifications));

    // Provider callback, authenticated by shared secret instead of a JWT
    let moderation_routes = Router::new().route("/moderation/callback", post(moderation_callback));

    let admin_routes = Router::new()
        .route("/admin/custody/:uid", get(audit_custody))
        .route("/admin/custody/:uid/repair", post(repair_custody));

    let rate_limiter = IpRateLimiter::new(state.config.rate_limit_rps, state.config.rate_limit_burst);

    let api_routes = Router::new()
        .merge(video_routes)
        .merge(exchange_routes)
        .merge(account_routes)
        .merge(moderation_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit_middleware));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.config.request_timeout,
        ))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_logging))
        .layer(middleware::from_fn(request_id))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
