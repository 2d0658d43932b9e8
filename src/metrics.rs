//! Prometheus metrics for nkv.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides an axum middleware for HTTP RED
//! metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "nkv_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "nkv_http_request_duration_seconds";

/// Nodes added (or revived) in the membership table (counter).
pub const MESH_NODES_JOINED_TOTAL: &str = "nkv_mesh_nodes_joined_total";

/// Nodes marked down (counter).
pub const MESH_NODES_DOWN_TOTAL: &str = "nkv_mesh_nodes_down_total";

/// Nodes currently believed live, the local node included (gauge).
pub const MESH_LIVE_NODES: &str = "nkv_mesh_live_nodes";

/// Completed gossip rounds (counter).
pub const GOSSIP_ROUNDS_TOTAL: &str = "nkv_gossip_rounds_total";

/// Failed pings (counter). Labels: kind.
pub const GOSSIP_PING_FAILURES_TOTAL: &str = "nkv_gossip_ping_failures_total";

/// Replica calls issued (counter). Labels: outcome.
pub const REPLICATION_CALLS_TOTAL: &str = "nkv_replication_calls_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times. Returns a reference to the global handle.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(MESH_NODES_JOINED_TOTAL, "Nodes joined to the membership table");
    describe_counter!(MESH_NODES_DOWN_TOTAL, "Nodes marked down");
    describe_gauge!(MESH_LIVE_NODES, "Nodes currently believed live");
    describe_counter!(GOSSIP_ROUNDS_TOTAL, "Completed gossip rounds");
    describe_counter!(GOSSIP_PING_FAILURES_TOTAL, "Failed gossip pings by kind");
    describe_counter!(REPLICATION_CALLS_TOTAL, "Replica calls by outcome");
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation to avoid feedback loops.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path, "status" => status)
        .increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Routes that keep their own label; everything else is `/{unknown}`.
const KNOWN_PATHS: &[&str] = &[
    "/set",
    "/get",
    "/rm",
    "/clear",
    "/is",
    "/getKeys",
    "/getValues",
    "/getAll",
    "/healthcheck",
    "/status",
    "/ping",
    "/openapi.json",
];

/// Normalize a request path to a bounded label set.
fn normalize_path(path: &str) -> &'static str {
    KNOWN_PATHS
        .iter()
        .find(|known| **known == path)
        .copied()
        .unwrap_or("/{unknown}")
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("content-type", "text/plain; version=0.0.4")],
            "metrics recorder not installed\n".to_string(),
        ),
    }
}
