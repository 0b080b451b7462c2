//! Lifecycle state machine and composed health check:
//! `Created → Initializing → Running → Draining → Stopped`.

use crate::batch::BatchCollector;
use crate::key_registry::KeyRegistry;
use crate::queue::IngressQueue;
use crate::rpc::ChainRpc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created = 0,
    Initializing = 1,
    Running = 2,
    Draining = 3,
    Stopped = 4,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Initializing,
            2 => Self::Running,
            3 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

pub struct ControlPlane {
    state: AtomicU8,
    rpc: Arc<dyn ChainRpc>,
    keys: Arc<KeyRegistry>,
    queue: Arc<IngressQueue>,
    batch: Arc<BatchCollector>,
    contract_id: near_primitives::types::AccountId,
    last_probe_ok: AtomicBool,
    last_probe_at_secs: AtomicU64,
    health_probe_grace: Duration,
    drain_deadline: Duration,
}

impl ControlPlane {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        keys: Arc<KeyRegistry>,
        queue: Arc<IngressQueue>,
        batch: Arc<BatchCollector>,
        contract_id: near_primitives::types::AccountId,
        health_probe_grace: Duration,
        drain_deadline: Duration,
    ) -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Created as u8),
            rpc,
            keys,
            queue,
            batch,
            contract_id,
            last_probe_ok: AtomicBool::new(false),
            last_probe_at_secs: AtomicU64::new(0),
            health_probe_grace,
            drain_deadline,
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, state: LifecycleState) {
        info!(state = %state, "control plane transition");
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Created→Initializing→(Running|Stopped). RC reachable, master account
    /// exists (via an access-key query for the first registered key), FT
    /// contract metadata fetched, at least one key active.
    pub async fn start(&self) -> Result<(), crate::GatewayError> {
        self.set_state(LifecycleState::Initializing);

        let Some(first_key) = self.keys.keys().first() else {
            warn!("no keys available at startup");
            self.set_state(LifecycleState::Stopped);
            return Err(crate::GatewayError::NoKeys);
        };

        if let Err(e) = self
            .rpc
            .query_access_key(self.keys.account_id(), &first_key.public_key())
            .await
        {
            warn!(error = %e, "master account/key unreachable at startup");
            self.set_state(LifecycleState::Stopped);
            return Err(e);
        }

        if let Err(e) = self
            .rpc
            .view_function(&self.contract_id, "ft_metadata", Vec::new())
            .await
        {
            warn!(error = %e, "FT contract metadata fetch failed at startup");
            self.set_state(LifecycleState::Stopped);
            return Err(e);
        }

        self.record_probe(true);
        self.set_state(LifecycleState::Running);
        Ok(())
    }

    /// Running→Draining→Stopped. IQ stops accepting; BC stops producing
    /// batches; TE is given `drain_deadline` to finish outstanding work.
    pub async fn shutdown(&self) {
        self.set_state(LifecycleState::Draining);
        self.queue.stop_accepting();
        self.batch.stop();

        let deadline = Instant::now() + self.drain_deadline;
        while Instant::now() < deadline {
            if self.batch.inflight_batches() == 0 && self.queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        self.set_state(LifecycleState::Stopped);
    }

    fn record_probe(&self, ok: bool) {
        self.last_probe_ok.store(ok, Ordering::Relaxed);
        self.last_probe_at_secs.store(now_secs(), Ordering::Relaxed);
    }

    /// Re-probe RC connectivity; called periodically by a health-check
    /// background task.
    pub async fn probe(&self) {
        let ok = self.rpc.health_check().await.is_ok();
        self.record_probe(ok);
    }

    /// Running AND at least one active key AND last RC probe within grace
    /// period succeeded.
    pub fn is_healthy(&self) -> bool {
        if self.state() != LifecycleState::Running {
            return false;
        }
        if self.keys.active_count() == 0 {
            return false;
        }
        let probe_age = now_secs().saturating_sub(self.last_probe_at_secs.load(Ordering::Relaxed));
        self.last_probe_ok.load(Ordering::Relaxed) && probe_age <= self.health_probe_grace.as_secs()
    }

    pub fn details(&self) -> HealthDetails {
        HealthDetails {
            state: self.state().to_string(),
            active_keys: self.keys.active_count(),
            queue_depth: self.queue.len(),
            last_probe_ok: self.last_probe_ok.load(Ordering::Relaxed),
            active_rpc: self.rpc.active_url().to_string(),
            rpc_failovers: self.rpc.failover_count(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthDetails {
    pub state: String,
    pub active_keys: usize,
    pub queue_depth: usize,
    pub last_probe_ok: bool,
    pub active_rpc: String,
    pub rpc_failovers: u64,
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
