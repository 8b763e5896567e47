//! In-process counters and latency recorders.
//!
//! The core only increments well-named counters and records latencies;
//! exporting them is left to an external observability layer, which reads
//! [`Metrics::snapshot`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

/// Well-known metric names.
pub mod names {
    /// Extensions successfully registered.
    pub const EXTENSIONS_LOADED: &str = "mca_extensions_loaded_total";
    /// Extensions rejected by any check.
    pub const EXTENSIONS_REJECTED: &str = "mca_extensions_rejected_total";
    /// Tasks that completed successfully.
    pub const TASK_SUCCESS: &str = "mca_task_success_total";
    /// Tasks that failed.
    pub const TASK_ERRORS: &str = "mca_task_errors_total";
    /// Tasks that were cancelled.
    pub const TASK_CANCELLED: &str = "mca_task_cancelled_total";
    /// Task execution latency.
    pub const TASK_SECONDS: &str = "mca_task_seconds";
    /// Result cache hits.
    pub const CACHE_HITS: &str = "mca_cache_hits_total";
    /// Result cache misses.
    pub const CACHE_MISSES: &str = "mca_cache_misses_total";
    /// Result cache lookup latency.
    pub const CACHE_LOOKUP_SECONDS: &str = "mca_cache_lookup_seconds";
}

/// A monotonically increasing counter.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    /// Increment by one.
    pub fn inc(&self) {
        self.add(1);
    }

    /// Increment by `n`.
    pub fn add(&self, n: u64) {
        // Saturate instead of wrapping.
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_add(n)));
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct LatencyCells {
    count: AtomicU64,
    total_micros: AtomicU64,
    max_micros: AtomicU64,
}

/// Records durations (count, sum and max, in microseconds).
#[derive(Debug, Clone, Default)]
pub struct Latency(Arc<LatencyCells>);

impl Latency {
    /// Record one observation.
    pub fn record(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let cells = &self.0;
        let _ = cells
            .count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_add(1)));
        let _ = cells
            .total_micros
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_add(micros)));
        cells.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    /// Start a timer that records when dropped.
    #[must_use]
    pub fn start(&self) -> LatencyTimer {
        LatencyTimer {
            latency: self.clone(),
            started: Instant::now(),
        }
    }

    /// Number of observations.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.0.count.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            count: self.count(),
            total_micros: self.0.total_micros.load(Ordering::Relaxed),
            max_micros: self.0.max_micros.load(Ordering::Relaxed),
        }
    }
}

/// Records elapsed time into a [`Latency`] on drop.
#[must_use = "the timer records when dropped"]
pub struct LatencyTimer {
    latency: Latency,
    started: Instant,
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        self.latency.record(self.started.elapsed());
    }
}

impl fmt::Debug for LatencyTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencyTimer")
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

/// Point-in-time latency figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencySnapshot {
    /// Number of observations.
    pub count: u64,
    /// Sum of observations in microseconds.
    pub total_micros: u64,
    /// Largest observation in microseconds.
    pub max_micros: u64,
}

/// Point-in-time view of every metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Counter values by name.
    pub counters: BTreeMap<String, u64>,
    /// Latency figures by name.
    pub latencies: BTreeMap<String, LatencySnapshot>,
}

/// Registry of named metrics, shared by cloning.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    counters: Arc<DashMap<String, Counter>>,
    latencies: Arc<DashMap<String, Latency>>,
}

impl Metrics {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the counter `name`.
    #[must_use]
    pub fn counter(&self, name: &str) -> Counter {
        self.counters.entry(name.to_string()).or_default().clone()
    }

    /// Get or create the latency recorder `name`.
    #[must_use]
    pub fn latency(&self, name: &str) -> Latency {
        self.latencies.entry(name.to_string()).or_default().clone()
    }

    /// Current value of counter `name` (zero if never created).
    #[must_use]
    pub fn counter_value(&self, name: &str) -> u64 {
        self.counters.get(name).map_or(0, |c| c.get())
    }

    /// Snapshot every metric.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .iter()
                .map(|e| (e.key().clone(), e.value().get()))
                .collect(),
            latencies: self
                .latencies
                .iter()
                .map(|e| (e.key().clone(), e.value().snapshot()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_shared_by_name() {
        let metrics = Metrics::new();
        metrics.counter(names::TASK_SUCCESS).inc();
        metrics.counter(names::TASK_SUCCESS).add(2);
        assert_eq!(metrics.counter_value(names::TASK_SUCCESS), 3);
        assert_eq!(metrics.counter_value(names::TASK_ERRORS), 0);
    }

    #[test]
    fn test_counter_saturates() {
        let counter = Counter::default();
        counter.add(u64::MAX);
        counter.inc();
        assert_eq!(counter.get(), u64::MAX);
    }

    #[test]
    fn test_latency_records_count_sum_max() {
        let metrics = Metrics::new();
        let latency = metrics.latency(names::TASK_SECONDS);
        latency.record(Duration::from_micros(10));
        latency.record(Duration::from_micros(30));

        let snap = metrics.snapshot();
        let task = snap.latencies[names::TASK_SECONDS];
        assert_eq!(task.count, 2);
        assert_eq!(task.total_micros, 40);
        assert_eq!(task.max_micros, 30);
    }

    #[test]
    fn test_timer_records_on_drop() {
        let latency = Latency::default();
        {
            let _timer = latency.start();
        }
        assert_eq!(latency.count(), 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = Metrics::new();
        metrics.counter(names::CACHE_HITS).inc();
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("mca_cache_hits_total"));
    }
}
