//! Prometheus scrape endpoint for stock and reconciliation metrics.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics: renders batch, mirror, intent and reconciliation counters
/// recorded by the daemon's global recorder.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_TEXT)],
        handle.render(),
    )
}
