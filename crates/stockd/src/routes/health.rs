//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use intent_ledger::{IntentLedger, IntentReason};
use serde::Serialize;

/// Shared state for the health endpoint.
pub struct HealthState<L: IntentLedger> {
    pub ledger: Arc<L>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Intents still waiting for reconciliation; absent if the ledger is unreachable.
    pub pending_intents: Option<u64>,
}

/// GET /health: reports ledger reachability and backlog.
pub async fn check<L: IntentLedger + 'static>(
    State(state): State<Arc<HealthState<L>>>,
) -> (StatusCode, Json<HealthResponse>) {
    match state.ledger.count_unexecuted(IntentReason::StockChange).await {
        Ok(pending) => {
            metrics::gauge!("stock_intents_pending").set(pending as f64);
            (
                StatusCode::OK,
                Json(HealthResponse {
                    status: "ok",
                    pending_intents: Some(pending),
                }),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "health check could not read the ledger");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    pending_intents: None,
                }),
            )
        }
    }
}
