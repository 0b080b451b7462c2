//! Transfer execution: the heart of the system. Consumes a batch, running
//! each transfer's key-acquire → nonce-allocate → sign → submit pipeline in
//! parallel up to a fixed-size semaphore.

use crate::batch::{BatchExecutor, BatchOutcome};
use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::key_registry::KeyRegistry;
use crate::metrics::Metrics;
use crate::nonce::NonceAllocator;
use crate::queue::QueuedTransfer;
use crate::rpc::ChainRpc;
use near_primitives::transaction::{Action, FunctionCallAction};
use near_primitives::types::AccountId;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, warn};

pub struct TransferExecutor {
    rpc: Arc<dyn ChainRpc>,
    keys: Arc<KeyRegistry>,
    nonces: Arc<NonceAllocator>,
    metrics: Arc<Metrics>,
    contract_id: AccountId,
    gas: near_gas::NearGas,
    deposit_yocto: u128,
    semaphore: Arc<Semaphore>,
}

/// Outcome of a single transfer's pipeline, used by `/direct-transfer` to
/// surface the result synchronously.
pub struct TransferOutcome {
    pub success: bool,
    pub transaction_hash: Option<String>,
    pub error: Option<GatewayError>,
}

impl TransferExecutor {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        keys: Arc<KeyRegistry>,
        nonces: Arc<NonceAllocator>,
        metrics: Arc<Metrics>,
        config: &AppConfig,
    ) -> Result<Self, GatewayError> {
        let contract_id: AccountId = config
            .contract_id
            .parse()
            .map_err(|_| GatewayError::Config("contractId is not a valid account id".into()))?;
        Ok(Self {
            rpc,
            keys,
            nonces,
            metrics,
            contract_id,
            gas: near_gas::NearGas::from_tgas(config.function_call_gas_tgas),
            deposit_yocto: config.attached_deposit_yocto()?,
            semaphore: Arc::new(Semaphore::new(config.max_parallel_transactions)),
        })
    }

    /// Run a single transfer to completion: acquire a key, allocate a nonce,
    /// build and sign the `ft_transfer` call, submit it, and report the
    /// outcome back to the key and nonce state.
    pub async fn execute_transfer(&self, transfer: &QueuedTransfer, key_hint: usize) -> TransferOutcome {
        let started = Instant::now();
        let result = self.run_pipeline(transfer, key_hint).await;
        let latency_us = started.elapsed().as_micros() as u64;

        match result {
            Ok(hash) => {
                self.metrics.record_transfer(true, latency_us);
                TransferOutcome { success: true, transaction_hash: Some(hash), error: None }
            }
            Err(e) => {
                self.metrics.record_transfer(false, latency_us);
                TransferOutcome { success: false, transaction_hash: None, error: Some(e) }
            }
        }
    }

    async fn run_pipeline(&self, transfer: &QueuedTransfer, key_hint: usize) -> Result<String, GatewayError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| GatewayError::ShuttingDown)?;

        let handle = self.keys.acquire(Some(key_hint))?;
        let public_key = handle.key.public_key();
        let account_id = self.keys.account_id().clone();

        let nonce = self.nonces.next(&public_key).await?;
        let block_hash = self.rpc.get_recent_block_hash().await?;

        let args = serde_json::json!({
            "receiver_id": transfer.request.receiver_id,
            "amount": transfer.request.amount,
            "memo": transfer.request.memo,
        });
        let args_bytes = serde_json::to_vec(&args)
            .map_err(|e| GatewayError::Validation(format!("failed to encode ft_transfer args: {e}")))?;

        let action = Action::FunctionCall(Box::new(FunctionCallAction {
            method_name: "ft_transfer".to_string(),
            args: args_bytes,
            gas: self.gas.as_gas(),
            deposit: self.deposit_yocto,
        }));

        let signer = handle.key.signer();
        let signed_tx = crate::signer::sign_transaction(
            &signer,
            nonce,
            &self.contract_id,
            block_hash,
            vec![action],
        );

        match self.rpc.submit(signed_tx).await {
            Ok(outcome) => {
                self.keys.mark_success(handle.index);
                self.nonces.release(&public_key, false).await;
                check_execution_outcome(&outcome.outcome)?;
                Ok(outcome.hash.to_string())
            }
            Err(e) => {
                self.keys.mark_failure(handle.index);
                let drifted = matches!(e, GatewayError::NonceDrift(_));
                self.nonces.release(&public_key, drifted).await;
                if drifted {
                    if let Err(resync_err) = self.nonces.resync(self.rpc.as_ref(), &public_key).await {
                        warn!(error = %resync_err, "nonce resync after drift failed");
                    }
                }
                Err(e)
            }
        }
    }
}

fn check_execution_outcome(
    outcome: &near_primitives::views::FinalExecutionOutcomeView,
) -> Result<(), GatewayError> {
    match &outcome.status {
        near_primitives::views::FinalExecutionStatus::SuccessValue(_) => Ok(()),
        near_primitives::views::FinalExecutionStatus::Failure(e) => {
            Err(GatewayError::ContractError(format!("{e:?}")))
        }
        other => Err(GatewayError::ContractError(format!("unexpected outcome: {other:?}"))),
    }
}

#[async_trait::async_trait]
impl BatchExecutor for TransferExecutor {
    async fn execute_batch(&self, batch: Vec<QueuedTransfer>) -> BatchOutcome {
        let started = Instant::now();
        let key_count = self.keys.key_count().max(1);

        let futures = batch
            .iter()
            .enumerate()
            .map(|(idx, transfer)| self.execute_transfer(transfer, idx % key_count));
        let outcomes = futures::future::join_all(futures).await;

        let successful = outcomes.iter().filter(|o| o.success).count() as u64;
        let failed = outcomes.len() as u64 - successful;
        if failed > 0 {
            error!(failed, successful, "batch completed with failures");
        }

        BatchOutcome {
            successful,
            failed,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TransferRequest;
    use crate::rpc::stub::StubRpc;
    use uuid::Uuid;

    async fn make_executor() -> (TransferExecutor, Arc<StubRpc>) {
        let rpc = StubRpc::cooperative();
        let account_id: AccountId = "gateway.testnet".parse().unwrap();
        let signer = near_crypto::InMemorySigner::from_random(account_id.clone(), near_crypto::KeyType::ED25519);
        rpc.set_chain_nonce(&signer.public_key(), 1).await;

        let registry = KeyRegistry::bootstrap(rpc.as_ref(), account_id.clone(), signer, &[])
            .await
            .unwrap();
        let keys = Arc::new(registry);
        let nonces = Arc::new(NonceAllocator::new(account_id));
        for key in keys.keys() {
            nonces.initialize(rpc.as_ref(), &key.public_key()).await.unwrap();
        }

        let metrics = Arc::new(Metrics::new());
        let mut config = AppConfig::default();
        config.master_private_key = "ed25519:11111111111111111111111111111111".into();
        config.contract_id = "ft.testnet".into();

        let executor = TransferExecutor::new(rpc.clone() as Arc<dyn ChainRpc>, keys, nonces, metrics, &config).unwrap();
        (executor, rpc)
    }

    fn transfer() -> QueuedTransfer {
        QueuedTransfer {
            id: Uuid::new_v4(),
            request: TransferRequest { receiver_id: "bob.testnet".into(), amount: "100".into(), memo: None },
            enqueued_seq: 0,
            priority: 1.0,
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn execute_transfer_succeeds_against_cooperative_stub() {
        let (executor, _rpc) = make_executor().await;
        let outcome = executor.execute_transfer(&transfer(), 0).await;
        assert!(outcome.success);
        assert!(outcome.transaction_hash.is_some());
    }

    #[tokio::test]
    async fn execute_transfer_reports_nonce_drift_failure() {
        let (executor, rpc) = make_executor().await;
        rpc.reject_next_with("InvalidNonce(chainNonce=99)").await;
        let outcome = executor.execute_transfer(&transfer(), 0).await;
        assert!(!outcome.success);
        assert!(matches!(outcome.error, Some(GatewayError::NonceDrift(_))));
    }

    #[tokio::test]
    async fn execute_batch_aggregates_outcomes() {
        let (executor, _rpc) = make_executor().await;
        let batch = vec![transfer(), transfer(), transfer()];
        let outcome = executor.execute_batch(batch).await;
        assert_eq!(outcome.successful, 3);
        assert_eq!(outcome.failed, 0);
    }
}
