//! A small connection pool over the chain's JSON-RPC endpoint, with
//! primary/fallback circuit-breaker failover. Defined as a trait so the
//! rest of the pipeline can be driven by a cooperative stub in tests
//! without a live NEAR RPC endpoint.

use async_trait::async_trait;
use near_crypto::PublicKey;
use near_jsonrpc_client::methods;
use near_jsonrpc_client::JsonRpcClient;
use near_primitives::hash::CryptoHash;
use near_primitives::transaction::SignedTransaction;
use near_primitives::types::{AccountId, BlockReference, Finality};
use near_primitives::views::{AccessKeyView, FinalExecutionOutcomeView};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::GatewayError;

/// Outcome of a successful `submit`.
pub struct SubmitOutcome {
    pub hash: CryptoHash,
    pub outcome: FinalExecutionOutcomeView,
}

/// The behavioral contract the RPC layer exposes to the rest of the
/// pipeline.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn submit(&self, signed_tx: SignedTransaction) -> Result<SubmitOutcome, GatewayError>;
    async fn query_access_key(
        &self,
        account_id: &AccountId,
        public_key: &PublicKey,
    ) -> Result<AccessKeyView, GatewayError>;
    async fn get_recent_block_hash(&self) -> Result<CryptoHash, GatewayError>;
    async fn view_function(
        &self,
        contract_id: &AccountId,
        method: &str,
        args: Vec<u8>,
    ) -> Result<Value, GatewayError>;
    /// Quick connectivity check used by CP's health composition.
    async fn health_check(&self) -> Result<&'static str, GatewayError>;
    /// URL currently serving traffic: primary, or the fallback while the
    /// circuit breaker is open.
    fn active_url(&self) -> &str;
    /// Cumulative primary→fallback circuit-breaker trips.
    fn failover_count(&self) -> u64;
}

const BLOCK_HASH_TTL: Duration = Duration::from_secs(1);
const CIRCUIT_BREAKER_THRESHOLD: u64 = 5;
const CIRCUIT_BREAKER_WINDOW_MS: u64 = 30_000;

struct CircuitState {
    failures: u64,
    last_failure_ms: u64,
    open: bool,
}

/// Real RC implementation: a pool of `JsonRpcClient` handles, round-robin
/// selected per call, primary/fallback failover via a circuit breaker.
pub struct RpcClient {
    pool: Vec<JsonRpcClient>,
    next: AtomicU64,
    fallback: JsonRpcClient,
    primary_url: String,
    fallback_url: String,
    circuit: Mutex<CircuitState>,
    total_failovers: AtomicU64,
    cached_block_hash: RwLock<Option<(CryptoHash, Instant)>>,
}

impl RpcClient {
    pub fn new(primary_url: &str, fallback_url: &str, pool_size: usize) -> Self {
        info!(primary = primary_url, fallback = fallback_url, pool_size, "RPC client initialized");
        let pool = (0..pool_size.max(1))
            .map(|_| JsonRpcClient::connect(primary_url))
            .collect();
        Self {
            pool,
            next: AtomicU64::new(0),
            fallback: JsonRpcClient::connect(fallback_url),
            primary_url: primary_url.to_string(),
            fallback_url: fallback_url.to_string(),
            circuit: Mutex::new(CircuitState {
                failures: 0,
                last_failure_ms: 0,
                open: false,
            }),
            total_failovers: AtomicU64::new(0),
            cached_block_hash: RwLock::new(None),
        }
    }

    /// Round-robin pick of a pooled primary connection, or the fallback
    /// client while the circuit is open.
    fn active(&self) -> &JsonRpcClient {
        if self.is_circuit_open() {
            return &self.fallback;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) as usize % self.pool.len();
        &self.pool[idx]
    }

    fn record_success(&self) {
        let mut circuit = self.circuit.lock().unwrap_or_else(|e| e.into_inner());
        if circuit.failures > 0 {
            info!(primary = %self.primary_url, "primary RPC recovered");
        }
        circuit.failures = 0;
        circuit.open = false;
    }

    fn record_failure(&self) {
        let mut circuit = self.circuit.lock().unwrap_or_else(|e| e.into_inner());
        circuit.failures += 1;
        circuit.last_failure_ms = now_ms();
        if circuit.failures >= CIRCUIT_BREAKER_THRESHOLD && !circuit.open {
            circuit.open = true;
            self.total_failovers.fetch_add(1, Ordering::Relaxed);
            warn!(
                failures = circuit.failures,
                fallback = %self.fallback_url,
                "circuit breaker opened, routing to fallback"
            );
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        let mut circuit = self.circuit.lock().unwrap_or_else(|e| e.into_inner());
        if !circuit.open {
            return false;
        }
        if now_ms() - circuit.last_failure_ms > CIRCUIT_BREAKER_WINDOW_MS {
            circuit.open = false;
            circuit.failures = 0;
            info!(primary = %self.primary_url, "circuit breaker half-open, retrying primary");
            return false;
        }
        true
    }

    async fn invalidate_block_hash_cache(&self) {
        *self.cached_block_hash.write().await = None;
    }
}

#[async_trait]
impl ChainRpc for RpcClient {
    async fn submit(&self, signed_tx: SignedTransaction) -> Result<SubmitOutcome, GatewayError> {
        let client = self.active();
        let req = methods::broadcast_tx_commit::RpcBroadcastTxCommitRequest {
            signed_transaction: signed_tx.clone(),
        };
        let result = match client.call(req).await {
            Ok(outcome) => {
                self.record_success();
                Ok(outcome)
            }
            Err(e) => {
                self.record_failure();
                warn!(error = %e, "primary broadcast_tx_commit failed, trying fallback");
                self.fallback
                    .call(methods::broadcast_tx_commit::RpcBroadcastTxCommitRequest {
                        signed_transaction: signed_tx,
                    })
                    .await
                    .map_err(|e2| classify_submit_error(&format!("{e}/{e2}")))
            }
        };

        if let Err(e) = &result {
            let msg = e.to_string();
            if msg.contains("Expired") || msg.contains("InvalidBlockHash") {
                self.invalidate_block_hash_cache().await;
            }
        }

        let outcome = result?;
        let hash = outcome.transaction_outcome.id;
        Ok(SubmitOutcome { hash, outcome })
    }

    async fn query_access_key(
        &self,
        account_id: &AccountId,
        public_key: &PublicKey,
    ) -> Result<AccessKeyView, GatewayError> {
        let make_request = || methods::query::RpcQueryRequest {
            block_reference: BlockReference::Finality(Finality::Final),
            request: near_primitives::views::QueryRequest::ViewAccessKey {
                account_id: account_id.clone(),
                public_key: public_key.clone(),
            },
        };

        let resp = match self.active().call(make_request()).await {
            Ok(r) => {
                self.record_success();
                r
            }
            Err(e) => {
                self.record_failure();
                self.fallback
                    .call(make_request())
                    .await
                    .map_err(|e2| GatewayError::Rpc(format!("access_key query failed: primary={e}, fallback={e2}")))?
            }
        };

        match resp.kind {
            near_jsonrpc_primitives::types::query::QueryResponseKind::AccessKey(ak) => Ok(ak),
            other => Err(GatewayError::Rpc(format!("unexpected query response: {other:?}"))),
        }
    }

    async fn get_recent_block_hash(&self) -> Result<CryptoHash, GatewayError> {
        if let Some((hash, when)) = *self.cached_block_hash.read().await {
            if when.elapsed() < BLOCK_HASH_TTL {
                return Ok(hash);
            }
        }

        let req = methods::block::RpcBlockRequest {
            block_reference: BlockReference::Finality(Finality::Final),
        };
        let block = match self.active().call(req.clone()).await {
            Ok(b) => {
                self.record_success();
                b
            }
            Err(e) => {
                self.record_failure();
                self.fallback
                    .call(req)
                    .await
                    .map_err(|e2| GatewayError::Rpc(format!("block query failed: primary={e}, fallback={e2}")))?
            }
        };

        let hash = block.header.hash;
        *self.cached_block_hash.write().await = Some((hash, Instant::now()));
        Ok(hash)
    }

    async fn view_function(
        &self,
        contract_id: &AccountId,
        method: &str,
        args: Vec<u8>,
    ) -> Result<Value, GatewayError> {
        let make_request = || methods::query::RpcQueryRequest {
            block_reference: BlockReference::Finality(Finality::Final),
            request: near_primitives::views::QueryRequest::CallFunction {
                account_id: contract_id.clone(),
                method_name: method.to_string(),
                args: near_primitives::types::FunctionArgs::from(args.clone()),
            },
        };

        let resp = self
            .active()
            .call(make_request())
            .await
            .map_err(|e| GatewayError::Rpc(format!("view_function failed: {e}")))?;

        match resp.kind {
            near_jsonrpc_primitives::types::query::QueryResponseKind::CallResult(result) => {
                serde_json::from_slice(&result.result)
                    .map_err(|e| GatewayError::Rpc(format!("view_function result decode failed: {e}")))
            }
            other => Err(GatewayError::Rpc(format!("unexpected query response: {other:?}"))),
        }
    }

    async fn health_check(&self) -> Result<&'static str, GatewayError> {
        let req = methods::block::RpcBlockRequest {
            block_reference: BlockReference::Finality(Finality::Final),
        };
        match self.pool[0].call(req.clone()).await {
            Ok(_) => Ok("ok"),
            Err(_) => match self.fallback.call(req).await {
                Ok(_) => Ok("degraded"),
                Err(e) => Err(GatewayError::Rpc(format!("both RPCs unreachable: {e}"))),
            },
        }
    }

    fn active_url(&self) -> &str {
        if self.is_circuit_open() {
            &self.fallback_url
        } else {
            &self.primary_url
        }
    }

    fn failover_count(&self) -> u64 {
        self.total_failovers.load(Ordering::Relaxed)
    }
}

fn classify_submit_error(err: &str) -> GatewayError {
    if err.contains("InvalidNonce") {
        GatewayError::NonceDrift(err.to_string())
    } else if err.contains("InvalidSignature") || err.contains("InvalidTransaction") {
        GatewayError::InvalidTx(err.to_string())
    } else if err.contains("FunctionCallError") || err.contains("panicked") {
        GatewayError::ContractError(err.to_string())
    } else {
        GatewayError::Transient(err.to_string())
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A cooperative in-memory RPC stub for tests: accepts submissions
/// unconditionally (optionally with injected latency), serves
/// monotonically-assigned nonces per key, and can be told to reject the
/// next N submissions with a given error to exercise drift-recovery paths.
#[cfg(test)]
pub mod stub {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;
    use tokio::time::sleep;

    pub struct StubRpc {
        chain_nonces: AsyncMutex<HashMap<String, u64>>,
        latency: Duration,
        reject_next: AsyncMutex<Vec<String>>,
        submit_count: AtomicU64,
    }

    impl StubRpc {
        pub fn new(latency: Duration) -> Self {
            Self {
                chain_nonces: AsyncMutex::new(HashMap::new()),
                latency,
                reject_next: AsyncMutex::new(Vec::new()),
                submit_count: AtomicU64::new(0),
            }
        }

        pub fn cooperative() -> Arc<Self> {
            Arc::new(Self::new(Duration::from_millis(5)))
        }

        /// Set the on-chain nonce the stub will report for a key.
        pub async fn set_chain_nonce(&self, public_key: &PublicKey, nonce: u64) {
            self.chain_nonces
                .lock()
                .await
                .insert(public_key.to_string(), nonce);
        }

        /// Queue an error (by substring, e.g. "InvalidNonce") for the next
        /// submission.
        pub async fn reject_next_with(&self, err_substr: &str) {
            self.reject_next.lock().await.push(err_substr.to_string());
        }

        pub fn submit_count(&self) -> u64 {
            self.submit_count.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl ChainRpc for StubRpc {
        async fn submit(&self, signed_tx: SignedTransaction) -> Result<SubmitOutcome, GatewayError> {
            sleep(self.latency).await;
            self.submit_count.fetch_add(1, Ordering::Relaxed);

            if let Some(err) = self.reject_next.lock().await.pop() {
                return Err(classify_submit_error(&err));
            }

            let hash = signed_tx.get_hash();
            let outcome = FinalExecutionOutcomeView {
                status: near_primitives::views::FinalExecutionStatus::SuccessValue(vec![]),
                transaction: near_primitives::views::SignedTransactionView::from(signed_tx),
                transaction_outcome: near_primitives::views::ExecutionOutcomeWithIdView {
                    proof: vec![],
                    block_hash: CryptoHash::default(),
                    id: hash,
                    outcome: near_primitives::views::ExecutionOutcomeView {
                        logs: vec![],
                        receipt_ids: vec![],
                        gas_burnt: 0,
                        tokens_burnt: 0,
                        executor_id: "stub".parse().unwrap(),
                        status: near_primitives::views::ExecutionStatusView::SuccessValue(vec![]),
                        metadata: near_primitives::views::ExecutionMetadataView {
                            version: 1,
                            gas_profile: None,
                        },
                    },
                },
                receipts_outcome: vec![],
            };
            Ok(SubmitOutcome { hash, outcome })
        }

        async fn query_access_key(
            &self,
            _account_id: &AccountId,
            public_key: &PublicKey,
        ) -> Result<AccessKeyView, GatewayError> {
            let nonce = *self
                .chain_nonces
                .lock()
                .await
                .get(&public_key.to_string())
                .unwrap_or(&0);
            Ok(AccessKeyView {
                nonce,
                permission: near_primitives::views::AccessKeyPermissionView::FullAccess,
            })
        }

        async fn get_recent_block_hash(&self) -> Result<CryptoHash, GatewayError> {
            Ok(CryptoHash::default())
        }

        async fn view_function(
            &self,
            _contract_id: &AccountId,
            _method: &str,
            _args: Vec<u8>,
        ) -> Result<Value, GatewayError> {
            Ok(serde_json::json!({ "total_supply": "0" }))
        }

        async fn health_check(&self) -> Result<&'static str, GatewayError> {
            Ok("ok")
        }

        fn active_url(&self) -> &str {
            "stub://primary"
        }

        fn failover_count(&self) -> u64 {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::stub::StubRpc;
    use super::*;

    #[tokio::test]
    async fn stub_accepts_submissions_cooperatively() {
        let rpc = StubRpc::cooperative();
        let signer = near_crypto::InMemorySigner::from_random(
            "a.testnet".parse().unwrap(),
            near_crypto::KeyType::ED25519,
        );
        let tx = near_primitives::transaction::Transaction::V0(
            near_primitives::transaction::TransactionV0 {
                signer_id: "a.testnet".parse().unwrap(),
                public_key: signer.public_key(),
                nonce: 1,
                receiver_id: "b.testnet".parse().unwrap(),
                block_hash: CryptoHash::default(),
                actions: vec![],
            },
        )
        .sign(&signer);
        let outcome = rpc.submit(tx).await;
        assert!(outcome.is_ok());
        assert_eq!(rpc.submit_count(), 1);
    }

    #[tokio::test]
    async fn stub_rejects_when_queued() {
        let rpc = StubRpc::cooperative();
        rpc.reject_next_with("InvalidNonce(chainNonce=42)").await;
        let signer = near_crypto::InMemorySigner::from_random(
            "a.testnet".parse().unwrap(),
            near_crypto::KeyType::ED25519,
        );
        let tx = near_primitives::transaction::Transaction::V0(
            near_primitives::transaction::TransactionV0 {
                signer_id: "a.testnet".parse().unwrap(),
                public_key: signer.public_key(),
                nonce: 1,
                receiver_id: "b.testnet".parse().unwrap(),
                block_hash: CryptoHash::default(),
                actions: vec![],
            },
        )
        .sign(&signer);
        let result = rpc.submit(tx).await;
        assert!(matches!(result, Err(GatewayError::NonceDrift(_))));
    }
}
