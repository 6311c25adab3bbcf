//! Liveness and readiness checks.

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::config::StoreBackend;
use crate::state::AppState;

/// Process is up. Never touches the store.
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[derive(Serialize)]
struct StoreCheck {
    backend: &'static str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Ready once the market store answers a ping; 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> Response {
    let backend = match state.config.store_backend {
        StoreBackend::Firestore => "firestore",
        StoreBackend::Memory => "memory",
    };

    let started = Instant::now();
    let store_check = match state.store.ping().await {
        Ok(()) => StoreCheck {
            backend,
            status: "ok",
            latency_ms: Some(started.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => StoreCheck {
            backend,
            status: "error",
            latency_ms: None,
            error: Some(e.to_string()),
        },
    };

    let (code, status) = if store_check.error.is_none() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (code, Json(json!({ "status": status, "checks": { "store": store_check } }))).into_response()
}
