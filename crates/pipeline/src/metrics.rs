use extract::ErrorKind;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counters for one pipeline run.
#[derive(Default)]
pub struct RunMetrics {
    processed: AtomicUsize,
    skipped_existing: AtomicUsize,
    failed_transient: AtomicUsize,
    failed_malformed: AtomicUsize,
    failed_unreachable: AtomicUsize,
    failed_persist: AtomicUsize,
    snapshots: AtomicUsize,

    concepts: AtomicUsize,
    relationships: AtomicUsize,

    // Timing (in microseconds)
    total_extract_time_us: AtomicU64,
}

impl RunMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_success(&self, duration: Duration, concepts: usize, relationships: usize) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.concepts.fetch_add(concepts, Ordering::Relaxed);
        self.relationships.fetch_add(relationships, Ordering::Relaxed);
        self.total_extract_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_skipped_existing(&self) {
        self.skipped_existing.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, kind: ErrorKind) {
        let counter = match kind {
            ErrorKind::Transient => &self.failed_transient,
            ErrorKind::Malformed => &self.failed_malformed,
            ErrorKind::Unreachable => &self.failed_unreachable,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Extraction succeeded but the result could not be made durable.
    pub fn record_persist_failure(&self) {
        self.failed_persist.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot(&self) {
        self.snapshots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let failed_transient = self.failed_transient.load(Ordering::Relaxed);
        let failed_malformed = self.failed_malformed.load(Ordering::Relaxed);
        let failed_unreachable = self.failed_unreachable.load(Ordering::Relaxed);
        let failed_persist = self.failed_persist.load(Ordering::Relaxed);

        MetricsSnapshot {
            processed,
            skipped_existing: self.skipped_existing.load(Ordering::Relaxed),
            failed: failed_transient + failed_malformed + failed_unreachable + failed_persist,
            failed_transient,
            failed_malformed,
            failed_unreachable,
            failed_persist,
            snapshots: self.snapshots.load(Ordering::Relaxed),
            concepts_extracted: self.concepts.load(Ordering::Relaxed),
            relationships_extracted: self.relationships.load(Ordering::Relaxed),
            avg_extract_time_ms: avg_time_ms(&self.total_extract_time_us, processed),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: usize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    if count > 0 {
        total / count as f64 / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Chunks extracted and recorded during this run.
    pub processed: usize,
    /// Chunks skipped because an earlier run already recorded them.
    pub skipped_existing: usize,
    /// Chunks skipped because of an error; absent from the aggregate.
    pub failed: usize,
    pub failed_transient: usize,
    pub failed_malformed: usize,
    pub failed_unreachable: usize,
    pub failed_persist: usize,
    pub snapshots: usize,
    pub concepts_extracted: usize,
    pub relationships_extracted: usize,
    pub avg_extract_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
