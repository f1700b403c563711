//! Observability and metrics for the multiplexer
//!
//! Counters are updated from producer threads, the aggregator and the
//! emitter concurrently, so everything is atomic or behind a lock.
//! `export()` flattens the current values for logging or scraping.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::producer::SourceOutcome;

/// Core metrics for one multiplexer.
pub struct MuxMetrics {
    // Sources
    pub sources_started: AtomicU64,
    pub sources_completed: AtomicU64,
    pub sources_unavailable: AtomicU64,
    pub sources_failed: AtomicU64,
    pub sources_timed_out: AtomicU64,
    pub sources_cancelled: AtomicU64,
    pub source_ingest_ns: Mutex<LatencyTracker>,

    // Records
    pub records_pushed: AtomicU64,
    pub malformed_lines: AtomicU64,
    pub records_aggregated: AtomicU64,
    pub records_emitted: AtomicU64,

    // Emit
    pub emit_failures: AtomicU64,
}

impl MuxMetrics {
    pub fn new() -> Self {
        Self {
            sources_started: AtomicU64::new(0),
            sources_completed: AtomicU64::new(0),
            sources_unavailable: AtomicU64::new(0),
            sources_failed: AtomicU64::new(0),
            sources_timed_out: AtomicU64::new(0),
            sources_cancelled: AtomicU64::new(0),
            source_ingest_ns: Mutex::new(LatencyTracker::new(1000)),
            records_pushed: AtomicU64::new(0),
            malformed_lines: AtomicU64::new(0),
            records_aggregated: AtomicU64::new(0),
            records_emitted: AtomicU64::new(0),
            emit_failures: AtomicU64::new(0),
        }
    }

    pub fn record_source_started(&self) {
        self.sources_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how a source ended and how long it took.
    pub fn record_source_outcome(&self, outcome: &SourceOutcome, elapsed_ns: u64) {
        let counter = match outcome {
            SourceOutcome::Completed => &self.sources_completed,
            SourceOutcome::Unavailable(_) => &self.sources_unavailable,
            SourceOutcome::Failed(_) | SourceOutcome::Panicked(_) => &self.sources_failed,
            SourceOutcome::TimedOut => &self.sources_timed_out,
            SourceOutcome::Cancelled => &self.sources_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.source_ingest_ns.lock().record(elapsed_ns);
    }

    pub fn record_pushed(&self) {
        self.records_pushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aggregated(&self, count: u64) {
        self.records_aggregated.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_emitted(&self, count: u64) {
        self.records_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_emit_failure(&self) {
        self.emit_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("sources_started".to_string(), self.sources_started.load(Ordering::Relaxed));
        m.insert("sources_completed".to_string(), self.sources_completed.load(Ordering::Relaxed));
        m.insert("sources_unavailable".to_string(), self.sources_unavailable.load(Ordering::Relaxed));
        m.insert("sources_failed".to_string(), self.sources_failed.load(Ordering::Relaxed));
        m.insert("sources_timed_out".to_string(), self.sources_timed_out.load(Ordering::Relaxed));
        m.insert("sources_cancelled".to_string(), self.sources_cancelled.load(Ordering::Relaxed));
        m.insert("records_pushed".to_string(), self.records_pushed.load(Ordering::Relaxed));
        m.insert("malformed_lines".to_string(), self.malformed_lines.load(Ordering::Relaxed));
        m.insert("records_aggregated".to_string(), self.records_aggregated.load(Ordering::Relaxed));
        m.insert("records_emitted".to_string(), self.records_emitted.load(Ordering::Relaxed));
        m.insert("emit_failures".to_string(), self.emit_failures.load(Ordering::Relaxed));

        let tracker = self.source_ingest_ns.lock();
        m.insert("source_ingest_samples".to_string(), tracker.count() as u64);
        if let Some(avg) = tracker.average() {
            m.insert("source_ingest_avg_ns".to_string(), avg);
        }
        if let Some(p50) = tracker.percentile(50) {
            m.insert("source_ingest_p50_ns".to_string(), p50);
        }
        if let Some(p99) = tracker.percentile(99) {
            m.insert("source_ingest_p99_ns".to_string(), p99);
        }
        m
    }
}

impl Default for MuxMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: VecDeque<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a latency sample, evicting the oldest when full.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as u64)
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}
