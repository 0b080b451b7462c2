//! HTTP response shapes for the gateway's external surface.

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAccepted {
    pub success: bool,
    pub queue_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(untagged, rename_all = "camelCase")]
pub enum BulkItemResult {
    Accepted { queue_id: Uuid },
    Rejected { error: String },
}

#[derive(Debug, Serialize)]
pub struct BulkTransferResponse {
    pub results: Vec<BulkItemResult>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectTransferResponse {
    pub transaction_hash: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub details: crate::control::HealthDetails,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub state: String,
    pub queue_depth: usize,
    pub totals: crate::metrics::MetricsSnapshot,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BountyStatusResponse {
    pub current_tps: f64,
    pub sustained: bool,
    pub achieved: bool,
}
