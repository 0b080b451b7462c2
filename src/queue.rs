//! A bounded priority multiset of queued transfers. `enqueue` and `drain`
//! are atomic with respect to each other via a single short-held mutex;
//! neither blocks beyond that.

use crate::GatewayError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

pub const DEFAULT_PRIORITY: f32 = 1.0;

/// A single transfer request as received over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub receiver_id: String,
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

/// A request owned by the queue until drained, then exclusively by the
/// transfer executor.
#[derive(Debug, Clone)]
pub struct QueuedTransfer {
    pub id: Uuid,
    pub request: TransferRequest,
    pub enqueued_seq: u64,
    pub priority: f32,
    pub retry_count: u32,
}

impl PartialEq for QueuedTransfer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for QueuedTransfer {}

impl PartialOrd for QueuedTransfer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Higher priority drains first; ties broken by earliest `enqueued_seq`.
/// `BinaryHeap` is a max-heap, so "drains first" means "compares greater".
impl Ord for QueuedTransfer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.enqueued_seq.cmp(&self.enqueued_seq))
    }
}

pub struct IngressQueue {
    heap: Mutex<BinaryHeap<QueuedTransfer>>,
    cap: usize,
    immediate_flush_threshold: usize,
    seq: AtomicU64,
    accepting: AtomicBool,
    flush: Notify,
}

impl IngressQueue {
    /// `immediate_flush_threshold` is typically `2 * batchSize`, so a burst
    /// of enqueues wakes the batch collector instead of waiting for its
    /// next tick.
    pub fn new(cap: usize, immediate_flush_threshold: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            cap,
            immediate_flush_threshold,
            seq: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
            flush: Notify::new(),
        }
    }

    pub fn enqueue(&self, request: TransferRequest, priority: f32) -> Result<Uuid, GatewayError> {
        if !self.accepting.load(AtomicOrdering::Relaxed) {
            return Err(GatewayError::ShuttingDown);
        }

        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        if heap.len() >= self.cap {
            return Err(GatewayError::QueueFull);
        }

        let id = Uuid::new_v4();
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        heap.push(QueuedTransfer {
            id,
            request,
            enqueued_seq: seq,
            priority,
            retry_count: 0,
        });
        let depth = heap.len();
        drop(heap);

        if depth >= self.immediate_flush_threshold {
            self.flush.notify_one();
        }

        Ok(id)
    }

    /// Re-enqueue a previously-drained item, e.g. after a higher-level retry
    /// decision with reduced priority.
    pub fn requeue(&self, mut item: QueuedTransfer, reduced_priority: f32) -> Result<(), GatewayError> {
        if !self.accepting.load(AtomicOrdering::Relaxed) {
            return Err(GatewayError::ShuttingDown);
        }
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        if heap.len() >= self.cap {
            return Err(GatewayError::QueueFull);
        }
        item.priority = reduced_priority;
        item.retry_count += 1;
        heap.push(item);
        Ok(())
    }

    /// Remove up to `n` items, highest priority first, ties broken by
    /// earliest `enqueued_seq`.
    pub fn drain(&self, n: usize) -> Vec<QueuedTransfer> {
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::with_capacity(n.min(heap.len()));
        for _ in 0..n {
            match heap.pop() {
                Some(item) => out.push(item),
                None => break,
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Stop accepting new work (transition into draining); existing items
    /// remain drainable.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, AtomicOrdering::Relaxed);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(AtomicOrdering::Relaxed)
    }

    /// Awaited by BC's tick loop alongside its interval timer so an
    /// immediate-flush enqueue can wake it early.
    pub async fn wait_for_flush(&self) {
        self.flush.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(n: u32) -> TransferRequest {
        TransferRequest {
            receiver_id: format!("user{n}.testnet"),
            amount: "100".into(),
            memo: None,
        }
    }

    #[test]
    fn drain_respects_priority_order() {
        let q = IngressQueue::new(10, 1000);
        q.enqueue(req(1), 1.0).unwrap();
        q.enqueue(req(2), 5.0).unwrap();
        q.enqueue(req(3), 2.0).unwrap();

        let drained = q.drain(3);
        let priorities: Vec<f32> = drained.iter().map(|t| t.priority).collect();
        assert_eq!(priorities, vec![5.0, 2.0, 1.0]);
    }

    #[test]
    fn drain_breaks_ties_by_fifo_order() {
        let q = IngressQueue::new(10, 1000);
        let a = q.enqueue(req(1), 1.0).unwrap();
        let b = q.enqueue(req(2), 1.0).unwrap();
        let c = q.enqueue(req(3), 1.0).unwrap();

        let drained = q.drain(3);
        let ids: Vec<Uuid> = drained.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn enqueue_past_cap_fails_queue_full() {
        let q = IngressQueue::new(2, 1000);
        q.enqueue(req(1), 1.0).unwrap();
        q.enqueue(req(2), 1.0).unwrap();
        assert!(matches!(q.enqueue(req(3), 1.0), Err(GatewayError::QueueFull)));
    }

    #[test]
    fn drain_upto_n_leaves_remainder_queued() {
        let q = IngressQueue::new(10, 1000);
        for i in 0..5 {
            q.enqueue(req(i), 1.0).unwrap();
        }
        let drained = q.drain(3);
        assert_eq!(drained.len(), 3);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn enqueue_after_stop_accepting_fails_shutting_down() {
        let q = IngressQueue::new(10, 1000);
        q.stop_accepting();
        assert!(matches!(q.enqueue(req(1), 1.0), Err(GatewayError::ShuttingDown)));
    }

    #[tokio::test]
    async fn enqueue_past_flush_threshold_wakes_waiter() {
        let q = IngressQueue::new(10, 2);
        q.enqueue(req(1), 1.0).unwrap();
        let waiter = tokio::time::timeout(std::time::Duration::from_millis(200), q.wait_for_flush());
        q.enqueue(req(2), 1.0).unwrap();
        assert!(waiter.await.is_ok());
    }
}
