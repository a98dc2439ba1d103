//! Atomic counters for hot-path metrics
//!
//! Lock-free counters that can be safely updated from any thread.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::pool::SizeClass;

/// Global metrics instance
pub static METRICS: Metrics = Metrics::new();

/// Atomic metrics counters
pub struct Metrics {
    // Allocation metrics, by size class
    pub allocations_tiny: AtomicU64,
    pub allocations_small: AtomicU64,
    pub allocations_normal: AtomicU64,
    pub allocations_huge: AtomicU64,
    pub allocation_failures: AtomicU64,

    // Deallocation metrics
    pub deallocations_pooled: AtomicU64,
    pub deallocations_unpooled: AtomicU64,

    // Resize metrics
    pub resizes_in_place: AtomicU64,
    pub reallocations: AtomicU64,

    // Region metrics
    pub chunks_created: AtomicU64,
    pub chunks_destroyed: AtomicU64,
    pub subpages_retired: AtomicU64,

    // Handle recycling metrics
    pub recycler_hits: AtomicU64,
    pub recycler_misses: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            allocations_tiny: AtomicU64::new(0),
            allocations_small: AtomicU64::new(0),
            allocations_normal: AtomicU64::new(0),
            allocations_huge: AtomicU64::new(0),
            allocation_failures: AtomicU64::new(0),
            deallocations_pooled: AtomicU64::new(0),
            deallocations_unpooled: AtomicU64::new(0),
            resizes_in_place: AtomicU64::new(0),
            reallocations: AtomicU64::new(0),
            chunks_created: AtomicU64::new(0),
            chunks_destroyed: AtomicU64::new(0),
            subpages_retired: AtomicU64::new(0),
            recycler_hits: AtomicU64::new(0),
            recycler_misses: AtomicU64::new(0),
        }
    }

    // Allocation tracking
    #[inline]
    pub fn allocated(&self, class: SizeClass) {
        let counter = match class {
            SizeClass::Tiny(_) => &self.allocations_tiny,
            SizeClass::Small(_) => &self.allocations_small,
            SizeClass::Normal => &self.allocations_normal,
            SizeClass::Huge => &self.allocations_huge,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn allocation_failed(&self) {
        self.allocation_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn deallocated_pooled(&self) {
        self.deallocations_pooled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn deallocated_unpooled(&self) {
        self.deallocations_unpooled.fetch_add(1, Ordering::Relaxed);
    }

    // Resize tracking
    #[inline]
    pub fn resized_in_place(&self) {
        self.resizes_in_place.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn reallocated(&self) {
        self.reallocations.fetch_add(1, Ordering::Relaxed);
    }

    // Region tracking
    #[inline]
    pub fn chunk_created(&self) {
        self.chunks_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn chunk_destroyed(&self) {
        self.chunks_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn subpage_retired(&self) {
        self.subpages_retired.fetch_add(1, Ordering::Relaxed);
    }

    // Recycler tracking
    #[inline]
    pub fn recycler_hit(&self) {
        self.recycler_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn recycler_miss(&self) {
        self.recycler_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allocations_tiny: self.allocations_tiny.load(Ordering::Relaxed),
            allocations_small: self.allocations_small.load(Ordering::Relaxed),
            allocations_normal: self.allocations_normal.load(Ordering::Relaxed),
            allocations_huge: self.allocations_huge.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            deallocations_pooled: self.deallocations_pooled.load(Ordering::Relaxed),
            deallocations_unpooled: self.deallocations_unpooled.load(Ordering::Relaxed),
            resizes_in_place: self.resizes_in_place.load(Ordering::Relaxed),
            reallocations: self.reallocations.load(Ordering::Relaxed),
            chunks_created: self.chunks_created.load(Ordering::Relaxed),
            chunks_destroyed: self.chunks_destroyed.load(Ordering::Relaxed),
            subpages_retired: self.subpages_retired.load(Ordering::Relaxed),
            recycler_hits: self.recycler_hits.load(Ordering::Relaxed),
            recycler_misses: self.recycler_misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics for reporting
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub allocations_tiny: u64,
    pub allocations_small: u64,
    pub allocations_normal: u64,
    pub allocations_huge: u64,
    pub allocation_failures: u64,
    pub deallocations_pooled: u64,
    pub deallocations_unpooled: u64,
    pub resizes_in_place: u64,
    pub reallocations: u64,
    pub chunks_created: u64,
    pub chunks_destroyed: u64,
    pub subpages_retired: u64,
    pub recycler_hits: u64,
    pub recycler_misses: u64,
}

impl MetricsSnapshot {
    /// Total successful allocations across all size classes
    pub fn allocations(&self) -> u64 {
        self.allocations_tiny + self.allocations_small + self.allocations_normal + self.allocations_huge
    }

    /// Allocations not yet matched by a deallocation
    pub fn live_leases(&self) -> u64 {
        self.allocations()
            .saturating_sub(self.deallocations_pooled + self.deallocations_unpooled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_counters() {
        let metrics = Metrics::new();
        metrics.allocated(SizeClass::Tiny(3));
        metrics.allocated(SizeClass::Normal);
        metrics.allocated(SizeClass::Huge);
        metrics.deallocated_unpooled();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.allocations_tiny, 1);
        assert_eq!(snapshot.allocations(), 3);
        assert_eq!(snapshot.live_leases(), 2);
    }
}
