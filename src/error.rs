//! Error taxonomy for the dispatch gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// The gateway's error taxonomy. Every transfer-facing failure maps to one
/// of these kinds; `Config` and `Rpc` cover failures below the per-transfer
/// level (startup, connectivity) and never reach a client directly.
#[derive(Debug)]
pub enum GatewayError {
    /// Ingress queue at capacity.
    QueueFull,
    /// Request failed the account-id/amount/memo validation contract.
    /// Permanent.
    Validation(String),
    /// No active, healthy key available in the registry.
    NoKeys,
    /// Chain reported a nonce mismatch; a refresh has been scheduled.
    NonceDrift(String),
    /// Network/timeout/5xx from the RPC; no in-core retry.
    Transient(String),
    /// Chain rejected the transaction itself (signature, gas, format).
    InvalidTx(String),
    /// The FT contract's `ft_transfer` panicked.
    ContractError(String),
    /// Control plane has entered Draining; no new work is accepted.
    ShuttingDown,
    /// Configuration is invalid or missing a required value.
    Config(String),
    /// RPC transport failure outside the per-transfer path (e.g. startup).
    Rpc(String),
}

impl GatewayError {
    /// The taxonomy tag surfaced to clients in the error response envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::QueueFull => "QUEUE_FULL",
            Self::Validation(_) => "VALIDATION",
            Self::NoKeys => "NO_KEYS",
            Self::NonceDrift(_) => "NONCE_DRIFT",
            Self::Transient(_) => "TRANSIENT",
            Self::InvalidTx(_) => "INVALID_TX",
            Self::ContractError(_) => "CONTRACT_ERROR",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Config(_) => "CONFIG",
            Self::Rpc(_) => "RPC",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NoKeys => StatusCode::SERVICE_UNAVAILABLE,
            Self::NonceDrift(_) => StatusCode::BAD_GATEWAY,
            Self::Transient(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidTx(_) => StatusCode::BAD_REQUEST,
            Self::ContractError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Rpc(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn details(&self) -> String {
        match self {
            Self::QueueFull => "ingress queue is at capacity, retry shortly".into(),
            Self::Validation(msg) => msg.clone(),
            Self::NoKeys => "no active, healthy signing key is available".into(),
            Self::NonceDrift(msg) => msg.clone(),
            Self::Transient(msg) => msg.clone(),
            Self::InvalidTx(msg) => msg.clone(),
            Self::ContractError(msg) => msg.clone(),
            Self::ShuttingDown => "gateway is draining, not accepting new work".into(),
            Self::Config(msg) => msg.clone(),
            Self::Rpc(msg) => msg.clone(),
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.details())
    }
}

impl std::error::Error for GatewayError {}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "success": false,
            "error": self.kind(),
            "details": self.details(),
            "processingTime": 0,
            "timestamp": now_millis(),
        });
        (status, Json(body)).into_response()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
