use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Counters for optimistic mutations.
#[derive(Debug, Default)]
pub struct MutationMetrics {
    pub started: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,

    /// Failures whose captured snapshot was written back.
    pub rollbacks: AtomicU64,
    /// Failures with nothing captured to restore.
    pub rollbacks_skipped: AtomicU64,
    pub settles: AtomicU64,
    /// Mutations whose future was dropped before the remote call resolved.
    pub abandoned: AtomicU64,

    latencies: Mutex<LatencyTracker>,
}

const LATENCY_SAMPLES: usize = 1000;

/// Rolling window of remote call latencies.
#[derive(Debug)]
struct LatencyTracker {
    samples: Vec<Duration>,
    max_samples: usize,
}

impl Default for LatencyTracker {
    fn default() -> Self {
        LatencyTracker::new(LATENCY_SAMPLES)
    }
}

impl LatencyTracker {
    fn new(max_samples: usize) -> Self {
        LatencyTracker {
            samples: Vec::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    fn record(&mut self, duration: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(duration);
    }

    fn avg(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            None
        } else {
            let total: Duration = self.samples.iter().sum();
            Some(total / self.samples.len() as u32)
        }
    }

    fn p99(&self) -> Option<Duration> {
        percentile(&self.samples, 99)
    }
}

fn percentile(samples: &[Duration], p: usize) -> Option<Duration> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted: Vec<_> = samples.to_vec();
    sorted.sort();
    let idx = (sorted.len() * p / 100).min(sorted.len() - 1);
    Some(sorted[idx])
}

impl MutationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed remote call and whether a snapshot was restored.
    pub fn record_failure(&self, rolled_back: bool) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if rolled_back {
            self.rollbacks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rollbacks_skipped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_settle(&self) {
        self.settles.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a mutation dropped mid-flight. It still counts as settled.
    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
        self.settles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, duration: Duration) {
        self.latencies.lock().record(duration);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let latencies = self.latencies.lock();
        MetricsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            rollbacks_skipped: self.rollbacks_skipped.load(Ordering::Relaxed),
            settles: self.settles.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            latency_avg_us: latencies.avg().map(|d| d.as_micros() as u64),
            latency_p99_us: latencies.p99().map(|d| d.as_micros() as u64),
        }
    }

    /// Mutations issued but not yet settled.
    pub fn in_flight(&self) -> u64 {
        let started = self.started.load(Ordering::Relaxed);
        let settled = self.settles.load(Ordering::Relaxed);
        started.saturating_sub(settled)
    }

    pub fn reset(&self) {
        self.started.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.rollbacks.store(0, Ordering::Relaxed);
        self.rollbacks_skipped.store(0, Ordering::Relaxed);
        self.settles.store(0, Ordering::Relaxed);
        self.abandoned.store(0, Ordering::Relaxed);
        *self.latencies.lock() = LatencyTracker::default();
    }
}

/// Point-in-time view of [`MutationMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rollbacks: u64,
    pub rollbacks_skipped: u64,
    pub settles: u64,
    pub abandoned: u64,
    pub latency_avg_us: Option<u64>,
    pub latency_p99_us: Option<u64>,
}

impl MetricsSnapshot {
    /// Failed calls as a percentage of resolved ones.
    pub fn failure_rate(&self) -> f64 {
        let resolved = self.succeeded + self.failed;
        if resolved == 0 {
            0.0
        } else {
            (self.failed as f64 / resolved as f64) * 100.0
        }
    }
}

pub type SharedMetrics = Arc<MutationMetrics>;

pub fn create_metrics() -> SharedMetrics {
    Arc::new(MutationMetrics::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = MutationMetrics::new();
        metrics.record_started();
        metrics.record_started();
        metrics.record_success();
        metrics.record_failure(true);
        metrics.record_settle();

        let snap = metrics.snapshot();
        assert_eq!(snap.started, 2);
        assert_eq!(snap.succeeded, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.rollbacks, 1);
        assert_eq!(snap.rollbacks_skipped, 0);
        assert_eq!(snap.failure_rate(), 50.0);
        assert_eq!(metrics.in_flight(), 1);

        metrics.record_abandoned();
        assert_eq!(metrics.in_flight(), 0);
        assert_eq!(metrics.snapshot().abandoned, 1);
    }

    #[test]
    fn test_latency_summary() {
        let metrics = MutationMetrics::new();
        assert!(metrics.snapshot().latency_avg_us.is_none());

        for ms in 1..=100 {
            metrics.record_latency(Duration::from_millis(ms));
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.latency_avg_us, Some(50_500));
        assert_eq!(snap.latency_p99_us, Some(100_000));
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let mut tracker = LatencyTracker::new(3);
        for ms in [10, 20, 30, 40] {
            tracker.record(Duration::from_millis(ms));
        }
        assert_eq!(tracker.samples.len(), 3);
        assert_eq!(tracker.avg(), Some(Duration::from_millis(30)));
    }

    #[test]
    fn test_reset() {
        let metrics = MutationMetrics::new();
        metrics.record_started();
        metrics.record_failure(false);
        metrics.reset();

        let snap = metrics.snapshot();
        assert_eq!(snap.started, 0);
        assert_eq!(snap.rollbacks_skipped, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(MutationMetrics::new().snapshot()).unwrap();
        assert_eq!(json["started"], 0);
        assert!(json["latency_p99_us"].is_null());
    }
}
