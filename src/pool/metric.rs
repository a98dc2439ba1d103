//! Arena and subpage introspection

use std::fmt;
use std::sync::Arc;

use super::arena::PoolArena;
use super::subpage_list::SubpageId;

/// Metrics for a single subpage
///
/// Every read takes the arena lock. Values of a retired subpage, or of one
/// whose chunk has since been destroyed, read as `None`.
pub trait SubpageMetric {
    /// Elements the subpage was carved into
    fn max_num_elements(&self) -> Option<usize>;

    /// Elements still free
    fn num_available(&self) -> Option<usize>;

    /// Bytes per element
    fn element_size(&self) -> Option<usize>;

    /// Bytes in the page backing the subpage
    fn page_size(&self) -> usize;
}

/// Handle to one subpage of an arena
pub struct SubpageMetricRef {
    arena: Arc<PoolArena>,
    id: SubpageId,
}

impl SubpageMetricRef {
    pub(crate) fn new(arena: Arc<PoolArena>, id: SubpageId) -> Self {
        Self { arena, id }
    }
}

impl SubpageMetric for SubpageMetricRef {
    fn max_num_elements(&self) -> Option<usize> {
        self.arena
            .with_subpage(self.id, |s| s.metric().max_elements)
            .flatten()
    }

    fn num_available(&self) -> Option<usize> {
        self.arena
            .with_subpage(self.id, |s| s.metric().available)
            .flatten()
    }

    fn element_size(&self) -> Option<usize> {
        self.arena
            .with_subpage(self.id, |s| s.metric().element_size)
            .flatten()
    }

    fn page_size(&self) -> usize {
        self.arena.config().page_size
    }
}

impl fmt::Display for SubpageMetricRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.arena.with_subpage(self.id, |s| s.to_string()) {
            Some(rendered) => f.write_str(&rendered),
            None => f.write_str("(destroyed)"),
        }
    }
}

impl fmt::Debug for SubpageMetricRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Arena statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Pooled chunks currently held
    pub chunks: usize,
    /// Pages leased as runs or backing subpages
    pub used_pages: usize,
    /// Subpages not yet retired
    pub active_subpages: usize,
    /// Pooled leases not yet freed
    pub active_leases: usize,
    /// Resizes that moved a buffer to new memory
    pub reallocations: u64,
    /// Handle objects waiting in the recycler
    pub idle_handles: usize,
}
