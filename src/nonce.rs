//! Per-(accountId, publicKey) nonce state, initialized from the chain and
//! advanced locally to avoid a round-trip per transfer. Drift against the
//! chain's view is detected by a failed submission and repaired by
//! re-querying and taking the max.

use crate::rpc::ChainRpc;
use crate::GatewayError;
use near_crypto::PublicKey;
use near_primitives::types::{AccountId, Nonce};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::warn;

/// Per-key nonce counter. `current` holds the last nonce handed out; the
/// next allocation is `current + 1`.
struct KeyNonce {
    current: AtomicU64,
    in_flight: AtomicU64,
}

/// Tracks nonce state for every key in the registry, keyed by public key
/// string so it lines up 1:1 with `KeyRegistry`'s keys.
pub struct NonceAllocator {
    account_id: AccountId,
    nonces: RwLock<HashMap<String, KeyNonce>>,
}

impl NonceAllocator {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            nonces: RwLock::new(HashMap::new()),
        }
    }

    /// Seed a key's nonce from the chain. Called once per key during
    /// bootstrap, after `KeyRegistry` has confirmed the key is registered.
    pub async fn initialize(
        &self,
        rpc: &dyn ChainRpc,
        public_key: &PublicKey,
    ) -> Result<(), GatewayError> {
        let access_key = rpc.query_access_key(&self.account_id, public_key).await?;
        self.nonces.write().await.insert(
            public_key.to_string(),
            KeyNonce {
                current: AtomicU64::new(access_key.nonce),
                in_flight: AtomicU64::new(0),
            },
        );
        Ok(())
    }

    /// Allocate the next nonce for `public_key`. Fails if the key was never
    /// initialized (a programming error, not a runtime condition the caller
    /// should expect).
    pub async fn next(&self, public_key: &PublicKey) -> Result<Nonce, GatewayError> {
        let nonces = self.nonces.read().await;
        let entry = nonces.get(&public_key.to_string()).ok_or_else(|| {
            GatewayError::Transient(format!("nonce allocator has no entry for key {public_key}"))
        })?;
        entry.in_flight.fetch_add(1, Ordering::Relaxed);
        Ok(entry.current.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Report the outcome of a submission that used a nonce allocated by
    /// `next`. `drifted` marks a submission that the node rejected for a
    /// nonce mismatch; the caller is expected to follow up with [`resync`]
    /// to actually correct the local counter; this call only clears the
    /// in-flight bookkeeping and logs that drift was reported.
    pub async fn release(&self, public_key: &PublicKey, drifted: bool) {
        let nonces = self.nonces.read().await;
        let Some(entry) = nonces.get(&public_key.to_string()) else {
            return;
        };
        entry.in_flight.fetch_sub(1, Ordering::Relaxed);

        if drifted {
            warn!(key = %public_key, "nonce drift reported by submission, resync scheduled");
        }
    }

    /// Re-synchronize a key's nonce directly from the chain, for use after
    /// a nonce-drift error to repair the local counter against the node's
    /// authoritative view.
    pub async fn resync(&self, rpc: &dyn ChainRpc, public_key: &PublicKey) -> Result<(), GatewayError> {
        let access_key = rpc.query_access_key(&self.account_id, public_key).await?;
        let nonces = self.nonces.read().await;
        if let Some(entry) = nonces.get(&public_key.to_string()) {
            let _ = entry
                .current
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                    Some(cur.max(access_key.nonce))
                });
        }
        Ok(())
    }

    pub async fn in_flight(&self, public_key: &PublicKey) -> u64 {
        self.nonces
            .read()
            .await
            .get(&public_key.to_string())
            .map(|e| e.in_flight.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}
