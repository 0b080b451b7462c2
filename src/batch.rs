//! A single-producer tick loop that drains the ingress queue into
//! adaptively-sized batches and hands each to the executor, bounded by a
//! fixed-size semaphore of in-flight batches rather than a general queue.

use crate::metrics::Metrics;
use crate::queue::{IngressQueue, QueuedTransfer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::interval;
use tracing::debug;

/// What the executor reports back after running a batch to completion.
/// The batch itself never "fails" as a unit — only individual transfers do.
pub struct BatchOutcome {
    pub successful: u64,
    pub failed: u64,
    pub duration_ms: u64,
}

#[async_trait::async_trait]
pub trait BatchExecutor: Send + Sync {
    async fn execute_batch(&self, batch: Vec<QueuedTransfer>) -> BatchOutcome;
}

pub struct BatchCollector {
    queue: Arc<IngressQueue>,
    metrics: Arc<Metrics>,
    base_batch_size: usize,
    batch_interval_ms: u64,
    max_concurrent_batches: usize,
    inflight_permits: Arc<Semaphore>,
    running: AtomicBool,
}

impl BatchCollector {
    pub fn new(
        queue: Arc<IngressQueue>,
        metrics: Arc<Metrics>,
        base_batch_size: usize,
        batch_interval_ms: u64,
        max_concurrent_batches: usize,
    ) -> Self {
        Self {
            queue,
            metrics,
            base_batch_size,
            batch_interval_ms,
            max_concurrent_batches,
            inflight_permits: Arc::new(Semaphore::new(max_concurrent_batches)),
            running: AtomicBool::new(true),
        }
    }

    /// Scale the batch size with queue depth and recent processing speed.
    fn adaptive_batch_size(&self, depth: usize, avg_processing_us: f64) -> usize {
        let base = self.base_batch_size;
        let avg_processing_ms = avg_processing_us / 1000.0;

        if depth > 3 * base {
            (2 * base).min(depth)
        } else if depth < base / 2 {
            (base / 2).max(1).min(depth.max(1))
        } else if avg_processing_ms > 2.0 * self.batch_interval_ms as f64 {
            ((base as f64) * 0.7).floor() as usize
        } else if avg_processing_ms < self.batch_interval_ms as f64 / 2.0 {
            ((base as f64) * 1.5).ceil() as usize
        } else {
            base
        }
    }

    /// One tick: compute a batch, dispatch it, return whether anything was
    /// dispatched. Returns `false` when IQ is empty or all batch slots are
    /// occupied (step 1's skip condition).
    pub async fn tick(&self, executor: Arc<dyn BatchExecutor>) -> bool {
        if self.queue.is_empty() {
            return false;
        }

        let Ok(permit) = self.inflight_permits.clone().try_acquire_owned() else {
            debug!("batch collector saturated, skipping tick");
            return false;
        };

        let depth = self.queue.len();
        let avg_us = self.metrics.snapshot().processing_time_avg_us;
        let size = self.adaptive_batch_size(depth, avg_us);

        let batch = self.queue.drain(size);
        if batch.is_empty() {
            drop(permit);
            return false;
        }

        self.metrics.record_batch_started();
        let metrics = Arc::clone(&self.metrics);

        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let outcome = executor.execute_batch(batch).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            metrics.record_batch_completed(outcome.failed > 0);
            metrics.record_batch_tps_sample(outcome.successful, duration_ms);
            drop(permit);
        });

        true
    }

    /// The tick loop: runs until told to stop, waking on either the
    /// interval timer or an immediate-flush notification from IQ.
    pub async fn run(&self, executor: Arc<dyn BatchExecutor>) {
        let mut ticker = interval(std::time::Duration::from_millis(self.batch_interval_ms));
        while self.running.load(Ordering::Relaxed) {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.queue.wait_for_flush() => {}
            }
            self.tick(Arc::clone(&executor)).await;
        }
    }

    /// Running→Draining: stop producing new batches. Already-dispatched
    /// batches continue under TE's drain deadline.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn inflight_batches(&self) -> usize {
        self.max_concurrent_batches - self.inflight_permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TransferRequest;

    struct CountingExecutor {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl BatchExecutor for CountingExecutor {
        async fn execute_batch(&self, batch: Vec<QueuedTransfer>) -> BatchOutcome {
            self.calls.fetch_add(1, Ordering::Relaxed);
            BatchOutcome {
                successful: batch.len() as u64,
                failed: 0,
                duration_ms: 1,
            }
        }
    }

    fn req() -> TransferRequest {
        TransferRequest { receiver_id: "a.testnet".into(), amount: "1".into(), memo: None }
    }

    #[tokio::test]
    async fn tick_on_empty_queue_is_a_noop() {
        let queue = Arc::new(IngressQueue::new(100, 1000));
        let metrics = Arc::new(Metrics::new());
        let bc = BatchCollector::new(Arc::clone(&queue), metrics, 75, 300, 15);
        let executor = Arc::new(CountingExecutor { calls: std::sync::atomic::AtomicUsize::new(0) });
        assert!(!bc.tick(executor.clone()).await);
        assert_eq!(executor.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn tick_drains_and_dispatches_a_batch() {
        let queue = Arc::new(IngressQueue::new(100, 1000));
        for _ in 0..10 {
            queue.enqueue(req(), 1.0).unwrap();
        }
        let metrics = Arc::new(Metrics::new());
        let bc = BatchCollector::new(Arc::clone(&queue), metrics, 75, 300, 15);
        let executor = Arc::new(CountingExecutor { calls: std::sync::atomic::AtomicUsize::new(0) });
        assert!(bc.tick(executor.clone()).await);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(executor.calls.load(Ordering::Relaxed), 1);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn adaptive_batch_size_grows_under_deep_queue() {
        let queue = Arc::new(IngressQueue::new(10_000, 1000));
        let metrics = Arc::new(Metrics::new());
        let bc = BatchCollector::new(queue, metrics, 75, 300, 15);
        assert_eq!(bc.adaptive_batch_size(300, 100.0), 150);
    }

    #[test]
    fn adaptive_batch_size_shrinks_under_shallow_queue() {
        let queue = Arc::new(IngressQueue::new(10_000, 1000));
        let metrics = Arc::new(Metrics::new());
        let bc = BatchCollector::new(queue, metrics, 75, 300, 15);
        assert_eq!(bc.adaptive_batch_size(20, 100.0), 20);
    }

    #[test]
    fn adaptive_batch_size_shrinks_under_slow_processing() {
        let queue = Arc::new(IngressQueue::new(10_000, 1000));
        let metrics = Arc::new(Metrics::new());
        let bc = BatchCollector::new(queue, metrics, 75, 300, 15);
        // avg 700ms > 2*300ms
        assert_eq!(bc.adaptive_batch_size(75, 700_000.0), 52);
    }

    #[test]
    fn adaptive_batch_size_grows_under_fast_processing() {
        let queue = Arc::new(IngressQueue::new(10_000, 1000));
        let metrics = Arc::new(Metrics::new());
        let bc = BatchCollector::new(queue, metrics, 75, 300, 15);
        // avg 100ms < 300/2 = 150ms
        assert_eq!(bc.adaptive_batch_size(75, 100_000.0), 113);
    }
}
