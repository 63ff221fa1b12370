//! Engine statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for cache and write-path behavior
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    queued_writes: AtomicU64,
    direct_writes: AtomicU64,
    failed_writes: AtomicU64,
}

impl CacheStats {
    /// Create a new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cache hit
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache miss
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an eviction
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a write handed to the background writer
    pub fn record_queued_write(&self) {
        self.queued_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a synchronous durable write (back-pressure fallback)
    pub fn record_direct_write(&self) {
        self.direct_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a background write that failed and was dropped
    pub fn record_failed_write(&self) {
        self.failed_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Total cache hits
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total cache misses
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Total evictions
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Total writes handed to the background writer
    pub fn queued_writes(&self) -> u64 {
        self.queued_writes.load(Ordering::Relaxed)
    }

    /// Total synchronous durable writes
    pub fn direct_writes(&self) -> u64 {
        self.direct_writes.load(Ordering::Relaxed)
    }

    /// Total dropped background writes
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::Relaxed)
    }

    /// Hit ratio in `[0.0, 1.0]`
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Reset every counter
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.queued_writes.store(0, Ordering::Relaxed);
        self.direct_writes.store(0, Ordering::Relaxed);
        self.failed_writes.store(0, Ordering::Relaxed);
    }
}
