//! Lightweight counters for the streaming stack
//!
//! One `Metrics` instance is shared across the pool, cache, range engine and
//! FUSE layer. The mount command logs a snapshot periodically and on shutdown.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    pub articles_fetched: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub cache_evictions: AtomicU64,
    pub bytes_served: AtomicU64,
    pub reads_served: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub articles_fetched: u64,
    pub fetch_failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
    pub bytes_served: u64,
    pub reads_served: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            articles_fetched: self.articles_fetched.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_evictions: self.cache_evictions.load(Ordering::Relaxed),
            bytes_served: self.bytes_served.load(Ordering::Relaxed),
            reads_served: self.reads_served.load(Ordering::Relaxed),
        }
    }

    pub fn log_snapshot(&self) {
        let s = self.snapshot();
        tracing::info!(
            articles_fetched = s.articles_fetched,
            fetch_failures = s.fetch_failures,
            cache_hits = s.cache_hits,
            cache_misses = s.cache_misses,
            cache_evictions = s.cache_evictions,
            bytes_served = s.bytes_served,
            reads_served = s.reads_served,
            "streaming metrics"
        );
    }
}

/// Relaxed increment; counters are informational only.
pub fn inc(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn add(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}
