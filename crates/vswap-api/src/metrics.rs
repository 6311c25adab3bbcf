//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder. The handle renders `/metrics`.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "vswap_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vswap_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vswap_http_requests_in_flight";

    // Domain metrics
    pub const EXCHANGES_TOTAL: &str = "vswap_exchanges_total";
    pub const QUOTA_REJECTIONS_TOTAL: &str = "vswap_quota_rejections_total";
    pub const RATINGS_TOTAL: &str = "vswap_ratings_total";
    pub const PLAN_DOWNGRADES_TOTAL: &str = "vswap_plan_downgrades_total";
    pub const STORE_CONTENTION_RETRIES_TOTAL: &str = "vswap_store_contention_retries_total";
    pub const VIDEOS_UPLOADED_TOTAL: &str = "vswap_videos_uploaded_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "vswap_rate_limit_hits_total";
}

/// Record an HTTP request against its route template.
pub fn record_http_request(method: &str, route: String, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("route", route),
        ("status", status.to_string()),
    ];
    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record an exchange lifecycle event (`created`, `accepted`, `rejected`, `deleted`).
pub fn record_exchange(outcome: &'static str) {
    counter!(names::EXCHANGES_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a request refused by a plan quota.
pub fn record_quota_rejection(quota: &'static str) {
    counter!(names::QUOTA_REJECTIONS_TOTAL, "quota" => quota).increment(1);
}

pub fn record_rating() {
    counter!(names::RATINGS_TOTAL).increment(1);
}

pub fn record_plan_downgrade() {
    counter!(names::PLAN_DOWNGRADES_TOTAL).increment(1);
}

pub fn record_video_uploaded() {
    counter!(names::VIDEOS_UPLOADED_TOTAL).increment(1);
}

/// Record a versioned write that lost a race and is being retried.
pub fn record_contention_retry(operation: &'static str) {
    counter!(names::STORE_CONTENTION_RETRIES_TOTAL, "operation" => operation).increment(1);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Path segments that are followed by an identifier.
const ID_PARENTS: &[&str] = &["videos", "exchanges", "by-video", "custody"];

/// Sanitize path for metrics labels (replace IDs with placeholders).
fn sanitize_path(path: &str) -> String {
    let mut out = Vec::new();
    let mut previous = "";
    for segment in path.split('/') {
        if ID_PARENTS.contains(&previous) && !segment.is_empty() && segment != "by-video" {
            out.push(":id");
        } else {
            out.push(segment);
        }
        previous = segment;
    }
    out.join("/")
}

/// Holds one slot of the in-flight gauge. Released on drop, so requests cut
/// off by the timeout layer are not left counted.
struct InFlight;

impl InFlight {
    fn enter() -> Self {
        gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
        InFlight
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);
    }
}

pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().clone();
    // Unmatched paths still carry ids, so fold them the same way
    let route = match request.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_owned(),
        None => sanitize_path(request.uri().path()),
    };

    let _slot = InFlight::enter();
    let started = Instant::now();
    let response = next.run(request).await;

    record_http_request(
        method.as_str(),
        route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}
