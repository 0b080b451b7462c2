//! Monotonic totals (lock-free atomics), a 60-bucket one-second ring for
//! `currentTPS`, and a 10-minute sample list for the sustained-compliance
//! verdict. Also renders Prometheus text exposition for the `/metrics` HTTP
//! surface.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const RING_SECONDS: usize = 60;
const SUSTAINED_WINDOW_SECS: u64 = 600;
const SUSTAINED_THRESHOLD_SUCCESSFUL: u64 = 100;
const SUSTAINED_COVERAGE_RATIO: f64 = 0.8;
const COMPLIANCE_MIN_TPS: f64 = 100.0;
const COMPLIANCE_MIN_SUCCESS_RATE: f64 = 0.95;

#[derive(Clone, Copy, Default)]
struct Bucket {
    /// Epoch second this bucket currently represents; 0 means never used.
    tag: u64,
    enqueued: u64,
    successful: u64,
    failed: u64,
}

struct TpsSample {
    timestamp_sec: u64,
    successful: u64,
}

pub struct Metrics {
    transfers_enqueued: AtomicU64,
    transfers_succeeded: AtomicU64,
    transfers_failed: AtomicU64,
    batches_started: AtomicU64,
    batches_completed: AtomicU64,
    batch_errors: AtomicU64,

    processing_time_sum_us: AtomicU64,
    processing_time_max_us: AtomicU64,
    processing_time_min_us: AtomicU64,
    processing_time_count: AtomicU64,

    ring: Mutex<[Bucket; RING_SECONDS]>,
    samples: Mutex<VecDeque<TpsSample>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            transfers_enqueued: AtomicU64::new(0),
            transfers_succeeded: AtomicU64::new(0),
            transfers_failed: AtomicU64::new(0),
            batches_started: AtomicU64::new(0),
            batches_completed: AtomicU64::new(0),
            batch_errors: AtomicU64::new(0),
            processing_time_sum_us: AtomicU64::new(0),
            processing_time_max_us: AtomicU64::new(0),
            processing_time_min_us: AtomicU64::new(u64::MAX),
            processing_time_count: AtomicU64::new(0),
            ring: Mutex::new([Bucket::default(); RING_SECONDS]),
            samples: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record_enqueued(&self) {
        self.transfers_enqueued.fetch_add(1, Ordering::Relaxed);
        self.bucket_mut(|b| b.enqueued += 1);
    }

    pub fn record_batch_started(&self) {
        self.batches_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_completed(&self, had_errors: bool) {
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
        if had_errors {
            self.batch_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the outcome of a single transfer and its processing latency.
    pub fn record_transfer(&self, success: bool, latency_us: u64) {
        if success {
            self.transfers_succeeded.fetch_add(1, Ordering::Relaxed);
            self.bucket_mut(|b| b.successful += 1);
        } else {
            self.transfers_failed.fetch_add(1, Ordering::Relaxed);
            self.bucket_mut(|b| b.failed += 1);
        }

        self.processing_time_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.processing_time_count.fetch_add(1, Ordering::Relaxed);
        cas_max(&self.processing_time_max_us, latency_us);
        cas_min(&self.processing_time_min_us, latency_us);
    }

    /// Record a completed batch's aggregate TPS sample, feeding the
    /// 10-minute sustained-compliance window.
    pub fn record_batch_tps_sample(&self, successful: u64, _duration_ms: u64) {
        let now = now_secs();
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.push_back(TpsSample { timestamp_sec: now, successful });
        while let Some(front) = samples.front() {
            if now.saturating_sub(front.timestamp_sec) > SUSTAINED_WINDOW_SECS {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn bucket_mut(&self, f: impl FnOnce(&mut Bucket)) {
        let now = now_secs();
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        let idx = (now % RING_SECONDS as u64) as usize;
        if ring[idx].tag != now {
            ring[idx] = Bucket { tag: now, enqueued: 0, successful: 0, failed: 0 };
        }
        f(&mut ring[idx]);
    }

    /// Sum of `successful` over the most recent 5 one-second buckets,
    /// divided by 5.
    pub fn current_tps(&self) -> f64 {
        let now = now_secs();
        let ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        let sum: u64 = (0..5)
            .map(|back| {
                let sec = now.saturating_sub(back);
                let idx = (sec % RING_SECONDS as u64) as usize;
                if ring[idx].tag == sec { ring[idx].successful } else { 0 }
            })
            .sum();
        sum as f64 / 5.0
    }

    /// At least 80% of the 600 one-second slots in the trailing 10-minute
    /// window had `successful >= 100`, counting missing slots as 0.
    pub fn sustained_100_tps_10min(&self) -> bool {
        let now = now_secs();
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());

        let mut per_second: std::collections::HashMap<u64, u64> = std::collections::HashMap::new();
        for sample in samples.iter() {
            if now.saturating_sub(sample.timestamp_sec) <= SUSTAINED_WINDOW_SECS {
                *per_second.entry(sample.timestamp_sec).or_insert(0) += sample.successful;
            }
        }

        let compliant = (0..SUSTAINED_WINDOW_SECS)
            .filter(|back| {
                let sec = now.saturating_sub(*back);
                per_second.get(&sec).copied().unwrap_or(0) >= SUSTAINED_THRESHOLD_SUCCESSFUL
            })
            .count();

        (compliant as f64) / (SUSTAINED_WINDOW_SECS as f64) >= SUSTAINED_COVERAGE_RATIO
    }

    pub fn success_rate(&self) -> f64 {
        let succeeded = self.transfers_succeeded.load(Ordering::Relaxed);
        let failed = self.transfers_failed.load(Ordering::Relaxed);
        let total = succeeded + failed;
        if total == 0 {
            return 1.0;
        }
        succeeded as f64 / total as f64
    }

    /// Conjunction of `currentTPS >= 100` and `successRate >= 95%`.
    pub fn is_compliant(&self) -> bool {
        self.current_tps() >= COMPLIANCE_MIN_TPS && self.success_rate() >= COMPLIANCE_MIN_SUCCESS_RATE
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let count = self.processing_time_count.load(Ordering::Relaxed);
        let min = self.processing_time_min_us.load(Ordering::Relaxed);
        MetricsSnapshot {
            transfers_enqueued: self.transfers_enqueued.load(Ordering::Relaxed),
            transfers_succeeded: self.transfers_succeeded.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            batches_started: self.batches_started.load(Ordering::Relaxed),
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
            batch_errors: self.batch_errors.load(Ordering::Relaxed),
            processing_time_avg_us: if count == 0 { 0.0 } else {
                self.processing_time_sum_us.load(Ordering::Relaxed) as f64 / count as f64
            },
            processing_time_max_us: self.processing_time_max_us.load(Ordering::Relaxed),
            processing_time_min_us: if min == u64::MAX { 0 } else { min },
            current_tps: self.current_tps(),
            sustained_100_tps_10min: self.sustained_100_tps_10min(),
            success_rate: self.success_rate(),
            compliant: self.is_compliant(),
        }
    }

    /// Render in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let s = self.snapshot();
        format!(
            "\
# HELP gateway_transfers_enqueued_total Transfers accepted into IQ.\n\
# TYPE gateway_transfers_enqueued_total counter\n\
gateway_transfers_enqueued_total {enqueued}\n\
# HELP gateway_transfers_succeeded_total Transfers submitted successfully.\n\
# TYPE gateway_transfers_succeeded_total counter\n\
gateway_transfers_succeeded_total {succeeded}\n\
# HELP gateway_transfers_failed_total Transfers that failed submission.\n\
# TYPE gateway_transfers_failed_total counter\n\
gateway_transfers_failed_total {failed}\n\
# HELP gateway_batches_started_total Batches handed to the executor.\n\
# TYPE gateway_batches_started_total counter\n\
gateway_batches_started_total {batches_started}\n\
# HELP gateway_batches_completed_total Batches whose outcomes all resolved.\n\
# TYPE gateway_batches_completed_total counter\n\
gateway_batches_completed_total {batches_completed}\n\
# HELP gateway_batch_errors_total Batches containing at least one failed transfer.\n\
# TYPE gateway_batch_errors_total counter\n\
gateway_batch_errors_total {batch_errors}\n\
# HELP gateway_processing_time_microseconds_avg Average per-transfer processing time.\n\
# TYPE gateway_processing_time_microseconds_avg gauge\n\
gateway_processing_time_microseconds_avg {avg_us:.2}\n\
# HELP gateway_processing_time_microseconds_max Max per-transfer processing time.\n\
# TYPE gateway_processing_time_microseconds_max gauge\n\
gateway_processing_time_microseconds_max {max_us}\n\
# HELP gateway_current_tps Successful transfers/s averaged over the last 5 seconds.\n\
# TYPE gateway_current_tps gauge\n\
gateway_current_tps {tps:.2}\n\
# HELP gateway_sustained_100_tps_10min Whether >=80% of the last 600 one-second slots hit 100 successful/s.\n\
# TYPE gateway_sustained_100_tps_10min gauge\n\
gateway_sustained_100_tps_10min {sustained}\n\
# HELP gateway_success_rate Fraction of resolved transfers that succeeded.\n\
# TYPE gateway_success_rate gauge\n\
gateway_success_rate {success_rate:.4}\n\
# HELP gateway_compliant Whether currentTPS>=100 and successRate>=95%.\n\
# TYPE gateway_compliant gauge\n\
gateway_compliant {compliant}\n",
            enqueued = s.transfers_enqueued,
            succeeded = s.transfers_succeeded,
            failed = s.transfers_failed,
            batches_started = s.batches_started,
            batches_completed = s.batches_completed,
            batch_errors = s.batch_errors,
            avg_us = s.processing_time_avg_us,
            max_us = s.processing_time_max_us,
            tps = s.current_tps,
            sustained = s.sustained_100_tps_10min as u8,
            success_rate = s.success_rate,
            compliant = s.compliant as u8,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub transfers_enqueued: u64,
    pub transfers_succeeded: u64,
    pub transfers_failed: u64,
    pub batches_started: u64,
    pub batches_completed: u64,
    pub batch_errors: u64,
    pub processing_time_avg_us: f64,
    pub processing_time_max_us: u64,
    pub processing_time_min_us: u64,
    pub current_tps: f64,
    pub sustained_100_tps_10min: bool,
    pub success_rate: f64,
    pub compliant: bool,
}

fn cas_max(cell: &AtomicU64, value: u64) {
    let mut cur = cell.load(Ordering::Relaxed);
    while value > cur {
        match cell.compare_exchange_weak(cur, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => cur = actual,
        }
    }
}

fn cas_min(cell: &AtomicU64, value: u64) {
    let mut cur = cell.load(Ordering::Relaxed);
    while value < cur {
        match cell.compare_exchange_weak(cur, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => cur = actual,
        }
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

    #[test]
    fn record_transfer_updates_totals_and_latency_aggregates() {
        let m = Metrics::new();
        m.record_transfer(true, 100);
        m.record_transfer(false, 50);
        let snap = m.snapshot();
        assert_eq!(snap.transfers_succeeded, 1);
        assert_eq!(snap.transfers_failed, 1);
        assert_eq!(snap.processing_time_max_us, 100);
        assert_eq!(snap.processing_time_min_us, 50);
    }

    #[test]
    fn success_rate_with_no_data_defaults_to_one() {
        let m = Metrics::new();
        assert_eq!(m.success_rate(), 1.0);
    }

    #[test]
    fn success_rate_reflects_failures() {
        let m = Metrics::new();
        for _ in 0..95 {
            m.record_transfer(true, 1);
        }
        for _ in 0..5 {
            m.record_transfer(false, 1);
        }
        assert!((m.success_rate() - 0.95).abs() < 1e-9);
    }

    #[test]
    fn current_tps_counts_recent_successes() {
        let m = Metrics::new();
        for _ in 0..100 {
            m.record_transfer(true, 1);
        }
        assert!(m.current_tps() >= 20.0);
    }

    #[test]
    fn sustained_without_samples_is_false() {
        let m = Metrics::new();
        assert!(!m.sustained_100_tps_10min());
    }

    #[test]
    fn is_compliant_false_under_low_tps() {
        let m = Metrics::new();
        m.record_transfer(true, 1);
        assert!(!m.is_compliant());
    }
}
