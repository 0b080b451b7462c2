//! FT-transfer dispatch gateway: ingress queue → adaptive batch collector →
//! bounded concurrent executor, signed and submitted against a single NEAR
//! master account and fungible-token contract.

pub mod batch;
pub mod config;
pub mod control;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod key_registry;
pub mod metrics;
pub mod middleware;
pub mod nonce;
pub mod queue;
pub mod response;
pub mod rpc;
pub mod signer;
pub mod state;
pub mod validation;

pub use config::AppConfig as Config;
pub use error::GatewayError;
pub use state::AppState;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Hard ceiling on an HTTP request's total lifetime, distinct from the
/// per-RPC-call timeout enforced inside the RPC client itself.
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(35);

/// Bounded so oversized bulk-transfer bodies can't pin memory.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the axum router over the gateway's HTTP surface. A thin shell:
/// routing, CORS, body-size limiting, a second concurrency ceiling on the
/// write endpoints independent of the executor's own semaphore,
/// request-id correlation, and a tracing span per request.
pub fn create_router(state: Arc<AppState>) -> Router {
    let writes = Router::new()
        .route("/transfer", post(handlers::transfer))
        .route("/bulk-transfer", post(handlers::bulk_transfer))
        .route("/direct-transfer", post(handlers::direct_transfer))
        .layer(ConcurrencyLimitLayer::new(state.config.queue_concurrency));

    let reads = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/status", get(handlers::status))
        .route("/bounty-status", get(handlers::bounty_status));

    Router::new()
        .merge(writes)
        .merge(reads)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(HTTP_REQUEST_TIMEOUT))
        .layer(axum::middleware::from_fn(middleware::inject_request_id))
        .with_state(state)
}
