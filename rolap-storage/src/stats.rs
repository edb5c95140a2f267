//! Cache statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the cache manager and the load coordinator.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    loads_started: AtomicU64,
    loads_completed: AtomicU64,
    loads_failed: AtomicU64,
    stale_installs: AtomicU64,
    stale_retries: AtomicU64,
    cardinality_queries: AtomicU64,
    flushed_segments: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    /// Cells answered from a ready segment.
    pub hits: u64,
    /// Cells that required a new load.
    pub misses: u64,
    /// Cells or loads served by joining another caller's in-flight load.
    pub coalesced: u64,
    pub loads_started: u64,
    pub loads_completed: u64,
    pub loads_failed: u64,
    /// Loads whose result was discarded because of a flush.
    pub stale_installs: u64,
    /// Resolutions retried after a flush.
    pub stale_retries: u64,
    pub cardinality_queries: u64,
    pub flushed_segments: u64,
}

impl CacheStatsSnapshot {
    /// Fraction of cells answered without a new load.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.coalesced + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.coalesced) as f64 / total as f64
        }
    }
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hits(&self, n: usize) {
        self.hits.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_misses(&self, n: usize) {
        self.misses.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self, n: usize) {
        self.coalesced.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_load_started(&self) {
        self.loads_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load_completed(&self) {
        self.loads_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load_failed(&self) {
        self.loads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale_install(&self) {
        self.stale_installs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale_retry(&self) {
        self.stale_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cardinality_query(&self) {
        self.cardinality_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flushed(&self, n: usize) {
        self.flushed_segments.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            loads_started: self.loads_started.load(Ordering::Relaxed),
            loads_completed: self.loads_completed.load(Ordering::Relaxed),
            loads_failed: self.loads_failed.load(Ordering::Relaxed),
            stale_installs: self.stale_installs.load(Ordering::Relaxed),
            stale_retries: self.stale_retries.load(Ordering::Relaxed),
            cardinality_queries: self.cardinality_queries.load(Ordering::Relaxed),
            flushed_segments: self.flushed_segments.load(Ordering::Relaxed),
        }
    }
}
