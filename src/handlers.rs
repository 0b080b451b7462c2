//! HTTP request handlers for the gateway's external surface. Each handler
//! is a thin adapter over the core pipeline (queue/batch/executor/metrics/
//! control) — validation, then a single call into the component that owns
//! the decision.

use crate::queue::{QueuedTransfer, TransferRequest, DEFAULT_PRIORITY};
use crate::response::{
    BountyStatusResponse, BulkItemResult, BulkTransferResponse, DirectTransferResponse,
    HealthResponse, StatusResponse, TransferAccepted,
};
use crate::state::AppState;
use crate::validation::validate_transfer_request;
use crate::GatewayError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

const MAX_BULK_TRANSFERS: usize = 1000;

/// `POST /transfer` — validate, enqueue, return immediately.
pub async fn transfer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<TransferAccepted>, GatewayError> {
    validate_transfer_request(&req.receiver_id, &req.amount, req.memo.as_deref())?;
    let queue_id = state.queue.enqueue(req, DEFAULT_PRIORITY)?;
    state.metrics.record_enqueued();
    Ok(Json(TransferAccepted { success: true, queue_id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkTransferBody {
    pub transfers: Vec<TransferRequest>,
    #[serde(default)]
    pub priority: Option<f32>,
    /// Accepted for client-side correlation; the gateway does not group
    /// transfers by this value.
    #[serde(default)]
    pub batch_id: Option<String>,
}

/// `POST /bulk-transfer` — up to 1000 transfers, each validated and
/// enqueued independently; a single bad item never rejects the rest.
pub async fn bulk_transfer(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BulkTransferBody>,
) -> Result<Json<BulkTransferResponse>, GatewayError> {
    if body.transfers.len() > MAX_BULK_TRANSFERS {
        return Err(GatewayError::Validation(format!(
            "bulk-transfer accepts at most {MAX_BULK_TRANSFERS} items, got {}",
            body.transfers.len()
        )));
    }
    let _ = body.batch_id;
    let priority = body.priority.unwrap_or(DEFAULT_PRIORITY);

    let mut results = Vec::with_capacity(body.transfers.len());
    for req in body.transfers {
        let outcome = validate_transfer_request(&req.receiver_id, &req.amount, req.memo.as_deref())
            .and_then(|()| state.queue.enqueue(req, priority));

        match outcome {
            Ok(queue_id) => {
                state.metrics.record_enqueued();
                results.push(BulkItemResult::Accepted { queue_id });
            }
            Err(e) => results.push(BulkItemResult::Rejected { error: e.kind().to_string() }),
        }
    }

    Ok(Json(BulkTransferResponse { results }))
}

/// `POST /direct-transfer` — bypasses the batch collector but is still
/// routed through the transfer executor; best-effort latency, no SLA.
pub async fn direct_transfer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<DirectTransferResponse>, GatewayError> {
    validate_transfer_request(&req.receiver_id, &req.amount, req.memo.as_deref())?;

    let transfer = QueuedTransfer {
        id: Uuid::new_v4(),
        request: req,
        enqueued_seq: 0,
        priority: DEFAULT_PRIORITY,
        retry_count: 0,
    };

    let key_hint = state.next_direct_key_hint();
    let outcome = state.executor.execute_transfer(&transfer, key_hint).await;

    match outcome.transaction_hash {
        Some(transaction_hash) => Ok(Json(DirectTransferResponse { transaction_hash })),
        None => Err(outcome.error.unwrap_or(GatewayError::Transient("direct transfer failed".into()))),
    }
}

/// `GET /health` — CP's composed health check.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let healthy = state.control.is_healthy();
    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(HealthResponse { healthy, details: state.control.details() }),
    )
}

/// `GET /metrics` — Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// `GET /status` — lifecycle state, queue depth, and monotonic totals.
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatusResponse {
        state: state.control.state().to_string(),
        queue_depth: state.queue.len(),
        totals: state.metrics.snapshot(),
    })
}

/// `GET /bounty-status` — TPS and sustained-compliance verdict.
pub async fn bounty_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(BountyStatusResponse {
        current_tps: state.metrics.current_tps(),
        sustained: state.metrics.sustained_100_tps_10min(),
        achieved: state.metrics.is_compliant(),
    })
}
