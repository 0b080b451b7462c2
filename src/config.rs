//! Gateway configuration, loaded once at startup.

use serde::Deserialize;
use std::time::Duration;

/// Typed configuration snapshot. Immutable after load; a config reload is
/// out of scope.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "defaults::network_id")]
    pub network_id: String,

    #[serde(default = "defaults::node_url")]
    pub node_url: String,

    #[serde(default = "defaults::fallback_node_url")]
    pub fallback_node_url: String,

    #[serde(default = "defaults::master_account_id")]
    pub master_account_id: String,

    /// `ed25519:<base58>` encoded secret key. Empty by default so local
    /// development fails loudly rather than silently running keyless.
    #[serde(default)]
    pub master_private_key: String,

    #[serde(default = "defaults::contract_id")]
    pub contract_id: String,

    /// Additional `ed25519:<base58>` secret keys for parallelism. Each MUST
    /// already be registered on-chain as an access key of
    /// `master_account_id`. Unregistered entries are logged and excluded
    /// rather than assumed usable.
    #[serde(default)]
    pub additional_keys: Vec<String>,

    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,

    #[serde(default = "defaults::batch_interval_ms")]
    pub batch_interval_ms: u64,

    #[serde(default = "defaults::max_parallel_transactions")]
    pub max_parallel_transactions: usize,

    #[serde(default = "defaults::max_concurrent_batches")]
    pub max_concurrent_batches: usize,

    #[serde(default = "defaults::queue_concurrency")]
    pub queue_concurrency: usize,

    #[serde(default = "defaults::queue_cap")]
    pub queue_cap: usize,

    #[serde(default = "defaults::function_call_gas")]
    pub function_call_gas_tgas: u64,

    #[serde(default = "defaults::attached_deposit")]
    pub attached_deposit: String,

    #[serde(default = "defaults::rpc_pool_size")]
    pub rpc_pool_size: usize,

    #[serde(default = "defaults::rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    #[serde(default = "defaults::bind_address")]
    pub bind_address: String,

    #[serde(default = "defaults::log_level")]
    pub log_level: String,

    #[serde(default = "defaults::shutdown_drain_secs")]
    pub shutdown_drain_secs: u64,

    #[serde(default = "defaults::health_probe_grace_secs")]
    pub health_probe_grace_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            network_id: defaults::network_id(),
            node_url: defaults::node_url(),
            fallback_node_url: defaults::fallback_node_url(),
            master_account_id: defaults::master_account_id(),
            master_private_key: String::new(),
            contract_id: defaults::contract_id(),
            additional_keys: Vec::new(),
            batch_size: defaults::batch_size(),
            batch_interval_ms: defaults::batch_interval_ms(),
            max_parallel_transactions: defaults::max_parallel_transactions(),
            max_concurrent_batches: defaults::max_concurrent_batches(),
            queue_concurrency: defaults::queue_concurrency(),
            queue_cap: defaults::queue_cap(),
            function_call_gas_tgas: defaults::function_call_gas(),
            attached_deposit: defaults::attached_deposit(),
            rpc_pool_size: defaults::rpc_pool_size(),
            rpc_timeout_ms: defaults::rpc_timeout_ms(),
            bind_address: defaults::bind_address(),
            log_level: defaults::log_level(),
            shutdown_drain_secs: defaults::shutdown_drain_secs(),
            health_probe_grace_secs: defaults::health_probe_grace_secs(),
        }
    }
}

impl AppConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_secs)
    }

    pub fn attached_deposit_yocto(&self) -> Result<u128, crate::GatewayError> {
        self.attached_deposit
            .parse()
            .map_err(|_| crate::GatewayError::Config("attachedDeposit must be a yocto integer".into()))
    }

    pub fn validate(&self) -> Result<(), crate::GatewayError> {
        if self.master_private_key.is_empty() {
            return Err(crate::GatewayError::Config(
                "masterPrivateKey is required".into(),
            ));
        }
        if !(10..=50).contains(&self.function_call_gas_tgas) {
            return Err(crate::GatewayError::Config(
                "functionCallGas must be between 10 and 50 TGas".into(),
            ));
        }
        if self.attached_deposit != "1" {
            return Err(crate::GatewayError::Config(
                "attachedDeposit must be \"1\" (yocto) for the FT standard".into(),
            ));
        }
        Ok(())
    }
}

mod defaults {
    pub fn network_id() -> String {
        "testnet".into()
    }

    pub fn node_url() -> String {
        "https://rpc.testnet.near.org".into()
    }

    pub fn fallback_node_url() -> String {
        "https://rpc.testnet.internal.near.org".into()
    }

    pub fn master_account_id() -> String {
        "gateway.testnet".into()
    }

    pub fn contract_id() -> String {
        "ft.testnet".into()
    }

    pub fn batch_size() -> usize {
        75
    }

    pub fn batch_interval_ms() -> u64 {
        300
    }

    pub fn max_parallel_transactions() -> usize {
        30
    }

    pub fn max_concurrent_batches() -> usize {
        15
    }

    pub fn queue_concurrency() -> usize {
        64
    }

    pub fn queue_cap() -> usize {
        batch_size() * 10 * max_parallel_transactions()
    }

    pub fn function_call_gas() -> u64 {
        30
    }

    pub fn attached_deposit() -> String {
        "1".into()
    }

    pub fn rpc_pool_size() -> usize {
        4
    }

    pub fn rpc_timeout_ms() -> u64 {
        30_000
    }

    pub fn bind_address() -> String {
        "0.0.0.0:8080".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn shutdown_drain_secs() -> u64 {
        30
    }

    pub fn health_probe_grace_secs() -> u64 {
        60
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_queue_cap_is_ten_times_batch_times_concurrency() {
        let c = AppConfig::default();
        assert_eq!(c.queue_cap, c.batch_size * 10 * c.max_parallel_transactions);
    }

    #[test]
    fn validate_rejects_missing_master_key() {
        let c = AppConfig::default();
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_gas() {
        let mut c = AppConfig::default();
        c.master_private_key = "ed25519:11111111111111111111111111111111".into();
        c.function_call_gas_tgas = 5;
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_yocto_deposit() {
        let mut c = AppConfig::default();
        c.master_private_key = "ed25519:11111111111111111111111111111111".into();
        c.attached_deposit = "2".into();
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_accepts_sane_defaults_with_key() {
        let mut c = AppConfig::default();
        c.master_private_key = "ed25519:11111111111111111111111111111111".into();
        assert!(c.validate().is_ok());
    }
}
