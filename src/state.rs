//! Application state: the single root-owned container composing the RPC
//! client, key registry, nonce allocator, ingress queue, batch collector,
//! transfer executor, metrics, and control plane. Handlers borrow it by
//! reference; nothing is re-derived via global lookup.

use crate::batch::BatchCollector;
use crate::config::AppConfig;
use crate::control::ControlPlane;
use crate::executor::TransferExecutor;
use crate::key_registry::KeyRegistry;
use crate::metrics::Metrics;
use crate::nonce::NonceAllocator;
use crate::queue::IngressQueue;
use crate::rpc::{ChainRpc, RpcClient};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct AppState {
    pub config: AppConfig,
    pub rpc: Arc<dyn ChainRpc>,
    pub keys: Arc<KeyRegistry>,
    pub nonces: Arc<NonceAllocator>,
    pub queue: Arc<IngressQueue>,
    pub metrics: Arc<Metrics>,
    pub batch: Arc<BatchCollector>,
    pub executor: Arc<TransferExecutor>,
    pub control: Arc<ControlPlane>,
    /// Round-robin cursor for `/direct-transfer`'s key hint — it has no
    /// batch index to derive one from, so it keeps its own
    /// `keyIndex = cursor mod keyCount` counter.
    pub(crate) direct_key_cursor: AtomicUsize,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self, crate::GatewayError> {
        config.validate()?;

        let account_id: near_primitives::types::AccountId = config
            .master_account_id
            .parse()
            .map_err(|_| crate::GatewayError::Config("masterAccountId is not a valid account id".into()))?;

        let rpc: Arc<dyn ChainRpc> = Arc::new(RpcClient::new(
            &config.node_url,
            &config.fallback_node_url,
            config.rpc_pool_size,
        ));

        let master_signer = crate::signer::signer_from_secret(account_id.clone(), &config.master_private_key)?;

        let keys = Arc::new(
            KeyRegistry::bootstrap(rpc.as_ref(), account_id.clone(), master_signer, &config.additional_keys).await?,
        );

        let nonces = Arc::new(NonceAllocator::new(account_id.clone()));
        for key in keys.keys() {
            nonces.initialize(rpc.as_ref(), &key.public_key()).await?;
        }

        let immediate_flush_threshold = 2 * config.batch_size;
        let queue = Arc::new(IngressQueue::new(config.queue_cap, immediate_flush_threshold));

        let metrics = Arc::new(Metrics::new());

        let batch = Arc::new(BatchCollector::new(
            Arc::clone(&queue),
            Arc::clone(&metrics),
            config.batch_size,
            config.batch_interval_ms,
            config.max_concurrent_batches,
        ));

        let executor = Arc::new(TransferExecutor::new(
            Arc::clone(&rpc),
            Arc::clone(&keys),
            Arc::clone(&nonces),
            Arc::clone(&metrics),
            &config,
        )?);

        let contract_id: near_primitives::types::AccountId = config
            .contract_id
            .parse()
            .map_err(|_| crate::GatewayError::Config("contractId is not a valid account id".into()))?;

        let control = Arc::new(ControlPlane::new(
            Arc::clone(&rpc),
            Arc::clone(&keys),
            Arc::clone(&queue),
            Arc::clone(&batch),
            contract_id,
            std::time::Duration::from_secs(config.health_probe_grace_secs),
            config.shutdown_drain(),
        ));

        Ok(Self {
            config,
            rpc,
            keys,
            nonces,
            queue,
            metrics,
            batch,
            executor,
            control,
            direct_key_cursor: AtomicUsize::new(0),
        })
    }

    /// Next key hint for a direct (unbatched) transfer, round-robin over
    /// the registry's key count.
    pub fn next_direct_key_hint(&self) -> usize {
        let count = self.keys.key_count().max(1);
        self.direct_key_cursor.fetch_add(1, Ordering::Relaxed) % count
    }

    /// Spawn BC's tick loop as a background task, driven by `self.executor`.
    pub fn spawn_batch_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            let executor = Arc::clone(&state.executor) as Arc<dyn crate::batch::BatchExecutor>;
            state.batch.run(executor).await;
        })
    }
}
