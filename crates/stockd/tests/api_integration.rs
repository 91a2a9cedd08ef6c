//! HTTP surface of the stock daemon, driven without a socket.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use intent_ledger::{
    InMemoryIntentLedger, IntentLedger, IntentReason, LedgerError, RequestKey, StockChange,
    StockIntentRecord,
};
use metrics_exporter_prometheus::PrometheusHandle;
use stockd::routes::health::HealthState;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup<L: IntentLedger + 'static>(ledger: L) -> axum::Router {
    let state = Arc::new(HealthState {
        ledger: Arc::new(ledger),
    });
    stockd::create_app(state, get_metrics_handle())
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

/// Ledger whose every call fails, as if the database were down.
struct UnreachableLedger;

fn down() -> LedgerError {
    LedgerError::Unavailable("connection refused".to_string())
}

#[async_trait]
impl IntentLedger for UnreachableLedger {
    async fn save_intent(
        &self,
        _request_key: &RequestKey,
        _reason: IntentReason,
        _content: &[StockChange],
    ) -> intent_ledger::Result<()> {
        Err(down())
    }

    async fn find_overdue_unexecuted(
        &self,
        _reason: IntentReason,
    ) -> intent_ledger::Result<Vec<StockIntentRecord>> {
        Err(down())
    }

    async fn mark_executed(&self, _request_key: &RequestKey) -> intent_ledger::Result<bool> {
        Err(down())
    }

    async fn record_replay_key(
        &self,
        _request_key: &RequestKey,
        _replay_key: &RequestKey,
    ) -> intent_ledger::Result<bool> {
        Err(down())
    }

    async fn find(
        &self,
        _request_key: &RequestKey,
    ) -> intent_ledger::Result<Option<StockIntentRecord>> {
        Err(down())
    }

    async fn count_unexecuted(&self, _reason: IntentReason) -> intent_ledger::Result<u64> {
        Err(down())
    }

    async fn purge_executed_before(&self, _cutoff: DateTime<Utc>) -> intent_ledger::Result<u64> {
        Err(down())
    }
}

#[tokio::test]
async fn test_health_check_reports_empty_backlog() {
    let (status, body) = get(setup(InMemoryIntentLedger::new()), "/health").await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["pending_intents"], 0);
}

#[tokio::test]
async fn test_health_check_counts_pending_intents() {
    let ledger = InMemoryIntentLedger::new();
    ledger
        .save_intent(
            &RequestKey::generate(),
            IntentReason::StockChange,
            &[StockChange::new(1, -2)],
        )
        .await
        .unwrap();

    let (status, body) = get(setup(ledger), "/health").await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["pending_intents"], 1);
}

#[tokio::test]
async fn test_health_check_degrades_without_ledger() {
    let (status, body) = get(setup(UnreachableLedger), "/health").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "degraded");
    assert!(json["pending_intents"].is_null());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup(InMemoryIntentLedger::new());
    let _ = get(app.clone(), "/health").await;

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[axum::http::header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain; version=0.0.4"));
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("stock_intents_pending"));
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let (status, _) = get(setup(InMemoryIntentLedger::new()), "/orders").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
