//! The set of signing keys for the master account, health-tracked and
//! handed out by round-robin.
//!
//! A generated key has no value until registered on-chain as an access key
//! of the master account. Keys are loaded only if `RC.queryAccessKey`
//! confirms they are already registered; unregistered keys are logged and
//! excluded rather than assumed usable.

use crate::rpc::ChainRpc;
use crate::GatewayError;
use near_crypto::{PublicKey, Signer};
use near_primitives::types::AccountId;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

const ERROR_DEACTIVATE_THRESHOLD: u32 = 10;
const ROUND_ROBIN_HEALTHY_THRESHOLD: u32 = 5;

/// A single managed key. The signer sits behind a lock so an administrative
/// [`KeyRegistry::rotate`] can swap it in place without invalidating handles
/// already acquired by in-flight transfers (they hold an `Arc<ManagedKey>`,
/// not a copy of the signer).
pub struct ManagedKey {
    pub account_id: AccountId,
    signer: RwLock<Signer>,
    active: AtomicBool,
    usage_count: AtomicU64,
    last_used_at: AtomicU64,
    consecutive_errors: AtomicU32,
}

impl ManagedKey {
    fn new(account_id: AccountId, signer: Signer) -> Self {
        Self {
            account_id,
            signer: RwLock::new(signer),
            active: AtomicBool::new(true),
            usage_count: AtomicU64::new(0),
            last_used_at: AtomicU64::new(0),
            consecutive_errors: AtomicU32::new(0),
        }
    }

    /// A clone of the current signer, for use building and signing a
    /// transaction. Cheap: an in-memory secret key, not a remote call.
    pub fn signer(&self) -> Signer {
        self.signer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn public_key(&self) -> PublicKey {
        self.signer.read().unwrap_or_else(|e| e.into_inner()).public_key()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Relaxed)
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count.load(Ordering::Relaxed)
    }
}

/// Handle returned by [`KeyRegistry::acquire`]. Not RAII — callers report
/// the outcome explicitly via `mark_success`/`mark_failure`.
pub struct KeyHandle {
    pub index: usize,
    pub key: Arc<ManagedKey>,
}

/// The master account's pool of signing keys.
pub struct KeyRegistry {
    account_id: AccountId,
    keys: Vec<Arc<ManagedKey>>,
    next: AtomicU64,
}

impl KeyRegistry {
    fn new(account_id: AccountId, keys: Vec<Arc<ManagedKey>>) -> Self {
        info!(account = %account_id, keys = keys.len(), "key registry initialized");
        Self {
            account_id,
            keys,
            next: AtomicU64::new(0),
        }
    }

    /// Bootstrap from configuration: the master key always loads; each
    /// additional key is included only if it is already a registered
    /// access key of `account_id` on-chain.
    pub async fn bootstrap(
        rpc: &dyn ChainRpc,
        account_id: AccountId,
        master_signer: Signer,
        additional_secret_keys: &[String],
    ) -> Result<Self, GatewayError> {
        let mut keys = vec![Arc::new(ManagedKey::new(account_id.clone(), master_signer))];

        for secret in additional_secret_keys {
            let signer = crate::signer::signer_from_secret(account_id.clone(), secret)?;
            let public_key = signer.public_key();
            match rpc.query_access_key(&account_id, &public_key).await {
                Ok(_) => {
                    info!(key = %public_key, "additional key confirmed registered on-chain");
                    keys.push(Arc::new(ManagedKey::new(account_id.clone(), signer)));
                }
                Err(e) => {
                    warn!(key = %public_key, error = %e, "additional key not registered on-chain, excluding");
                }
            }
        }

        Ok(Self::new(account_id, keys))
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn active_count(&self) -> usize {
        self.keys.iter().filter(|k| k.is_active()).count()
    }

    /// Round-robin over active keys with `consecutiveErrors < 5`; falls
    /// back to any active key; fails `NO_KEYS` if none are active.
    pub fn acquire(&self, hint: Option<usize>) -> Result<KeyHandle, GatewayError> {
        let len = self.keys.len();
        if len == 0 {
            return Err(GatewayError::NoKeys);
        }

        let start = hint.unwrap_or_else(|| self.next.fetch_add(1, Ordering::Relaxed) as usize);

        for i in 0..len {
            let idx = (start + i) % len;
            let key = &self.keys[idx];
            if key.is_active() && key.consecutive_errors() < ROUND_ROBIN_HEALTHY_THRESHOLD {
                return Ok(KeyHandle {
                    index: idx,
                    key: Arc::clone(key),
                });
            }
        }

        for i in 0..len {
            let idx = (start + i) % len;
            let key = &self.keys[idx];
            if key.is_active() {
                return Ok(KeyHandle {
                    index: idx,
                    key: Arc::clone(key),
                });
            }
        }

        Err(GatewayError::NoKeys)
    }

    pub fn mark_success(&self, index: usize) {
        let Some(key) = self.keys.get(index) else {
            return;
        };
        key.usage_count.fetch_add(1, Ordering::Relaxed);
        key.last_used_at.store(now_secs(), Ordering::Relaxed);
        let _ = key
            .consecutive_errors
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |e| {
                Some(e.saturating_sub(1))
            });
    }

    pub fn mark_failure(&self, index: usize) {
        let Some(key) = self.keys.get(index) else {
            return;
        };
        let errors = key.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
        if errors > ERROR_DEACTIVATE_THRESHOLD {
            key.active.store(false, Ordering::Relaxed);
            warn!(index, errors, "key deactivated after exceeding error threshold");
        }
    }

    pub fn keys(&self) -> &[Arc<ManagedKey>] {
        &self.keys
    }

    /// Administrative key replacement: swap the signer at `index` for one
    /// already confirmed registered on-chain, reactivate it, and clear its
    /// error history. Not part of the per-transfer hot path — callers are
    /// responsible for seeding the nonce allocator for the new public key
    /// before routing traffic to it.
    pub fn rotate(&self, index: usize, new_signer: Signer) -> Result<(), GatewayError> {
        let key = self
            .keys
            .get(index)
            .ok_or_else(|| GatewayError::Config(format!("no key at index {index} to rotate")))?;
        *key.signer.write().unwrap_or_else(|e| e.into_inner()) = new_signer;
        key.active.store(true, Ordering::Relaxed);
        key.consecutive_errors.store(0, Ordering::Relaxed);
        info!(index, "key rotated");
        Ok(())
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::stub::StubRpc;
    use near_crypto::{KeyType, SecretKey};

    fn make_registry(n: usize) -> KeyRegistry {
        let account_id: AccountId = "gateway.testnet".parse().unwrap();
        let keys: Vec<Arc<ManagedKey>> = (0..n)
            .map(|_| {
                let sk = SecretKey::from_random(KeyType::ED25519);
                let signer = near_crypto::InMemorySigner::from_secret_key(account_id.clone(), sk);
                Arc::new(ManagedKey::new(account_id.clone(), signer))
            })
            .collect();
        KeyRegistry::new(account_id, keys)
    }

    #[test]
    fn acquire_empty_registry_fails_no_keys() {
        let registry = make_registry(0);
        assert!(matches!(registry.acquire(None), Err(GatewayError::NoKeys)));
    }

    #[test]
    fn acquire_round_robins_across_active_keys() {
        let registry = make_registry(3);
        let a = registry.acquire(None).unwrap();
        let b = registry.acquire(None).unwrap();
        let c = registry.acquire(None).unwrap();
        let indices: std::collections::HashSet<usize> = [a.index, b.index, c.index].into_iter().collect();
        assert_eq!(indices.len(), 3);
    }

    #[test]
    fn mark_failure_deactivates_after_threshold() {
        let registry = make_registry(1);
        for _ in 0..=ERROR_DEACTIVATE_THRESHOLD {
            registry.mark_failure(0);
        }
        assert_eq!(registry.active_count(), 0);
        assert!(matches!(registry.acquire(None), Err(GatewayError::NoKeys)));
    }

    #[test]
    fn mark_success_decrements_error_counter_with_floor_zero() {
        let registry = make_registry(1);
        registry.mark_failure(0);
        registry.mark_failure(0);
        registry.mark_success(0);
        registry.mark_success(0);
        registry.mark_success(0);
        assert_eq!(registry.keys()[0].consecutive_errors(), 0);
    }

    #[test]
    fn acquire_prefers_healthy_keys_over_high_error_keys() {
        let registry = make_registry(2);
        for _ in 0..6 {
            registry.mark_failure(0);
        }
        for _ in 0..20 {
            let handle = registry.acquire(None).unwrap();
            assert_eq!(handle.index, 1);
        }
    }

    #[test]
    fn rotate_replaces_signer_and_clears_error_history() {
        let registry = make_registry(1);
        for _ in 0..6 {
            registry.mark_failure(0);
        }
        let old_public_key = registry.keys()[0].public_key();

        let new_sk = SecretKey::from_random(KeyType::ED25519);
        let new_signer =
            near_crypto::InMemorySigner::from_secret_key(registry.account_id().clone(), new_sk);
        registry.rotate(0, new_signer).unwrap();

        assert_ne!(registry.keys()[0].public_key(), old_public_key);
        assert_eq!(registry.keys()[0].consecutive_errors(), 0);
        assert!(registry.keys()[0].is_active());
    }

    #[test]
    fn rotate_on_out_of_range_index_fails() {
        let registry = make_registry(1);
        let new_sk = SecretKey::from_random(KeyType::ED25519);
        let new_signer =
            near_crypto::InMemorySigner::from_secret_key(registry.account_id().clone(), new_sk);
        assert!(registry.rotate(5, new_signer).is_err());
    }

    #[tokio::test]
    async fn bootstrap_excludes_unregistered_additional_keys() {
        let rpc = StubRpc::cooperative();
        let account_id: AccountId = "gateway.testnet".parse().unwrap();
        let master_sk = SecretKey::from_random(KeyType::ED25519);
        let master_signer = near_crypto::InMemorySigner::from_secret_key(account_id.clone(), master_sk.clone());
        rpc.set_chain_nonce(&master_sk.public_key(), 10).await;

        let extra_sk = SecretKey::from_random(KeyType::ED25519);
        let extra_secret_str = extra_sk.to_string();

        let registry = KeyRegistry::bootstrap(
            rpc.as_ref(),
            account_id,
            master_signer,
            &[extra_secret_str],
        )
        .await
        .unwrap();

        // The stub reports a (default 0) nonce for any key queried, so the
        // additional key is always "confirmed registered" here; this test
        // exercises the happy path. Unregistered-key exclusion is exercised
        // at the integration level where the stub can be made to error.
        assert_eq!(registry.key_count(), 2);
    }
}
