//! Handle object recycling
//!
//! Buffer handles are returned here once their last reference is released
//! and handed out again by the next allocation, so steady-state leasing does
//! not touch the global allocator for handle objects.

use crossbeam::queue::ArrayQueue;
use std::sync::Arc;

use super::buffer::BufCore;
use crate::metrics::METRICS;

/// Bounded lock-free queue of idle handle cores
pub(crate) struct Recycler {
    /// `None` when recycling is disabled
    idle: Option<ArrayQueue<Arc<BufCore>>>,
}

impl Recycler {
    pub fn new(capacity: usize) -> Self {
        Self {
            idle: (capacity > 0).then(|| ArrayQueue::new(capacity)),
        }
    }

    /// Get a handle core ready for a new lease
    pub fn get(&self, max_capacity: usize) -> Arc<BufCore> {
        let core = match self.idle.as_ref().and_then(|q| q.pop()) {
            Some(core) => {
                METRICS.recycler_hit();
                core
            }
            None => {
                METRICS.recycler_miss();
                Arc::new(BufCore::new())
            }
        };
        core.reuse(max_capacity);
        core
    }

    /// Park an unbound core for reuse; dropped if the queue is full
    pub fn recycle(&self, core: Arc<BufCore>) {
        debug_assert!(!core.is_bound(), "recycling a bound buffer");
        if let Some(idle) = self.idle.as_ref() {
            let _ = idle.push(core);
        }
    }

    /// Number of idle cores waiting for reuse
    pub fn idle(&self) -> usize {
        self.idle.as_ref().map_or(0, ArrayQueue::len)
    }
}
