//! Pool arena
//!
//! The arena owns every chunk, the subpage lists for each size class and the
//! single lock that guards them. Buffers call back into it to free or
//! reallocate their lease.

use anyhow::Result as ConfigResult;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::buffer::{Binding, BufCore, BufState, Location, PooledBuf};
use super::chunk::{Chunk, ChunkPages};
use super::locator::Locator;
use super::memory::Memory;
use super::metric::{ArenaStats, SubpageMetricRef};
use super::recycler::Recycler;
use super::size_class::{self, SizeClass, NUM_TINY_CLASSES};
use super::subpage::Subpage;
use super::subpage_list::{SubpageId, SubpagePool};
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::metrics::METRICS;

/// A pooled chunk and its page bookkeeping
struct PooledChunk {
    chunk: Arc<Chunk>,
    pages: ChunkPages,
}

/// Region carved out under the lock, before it is bound to a buffer
struct Lease {
    chunk: Arc<Chunk>,
    locator: Locator,
    offset: usize,
    max_length: usize,
}

/// Everything guarded by the arena lock
struct ArenaState {
    page_size: usize,
    chunk_size: usize,
    max_chunks: usize,
    subpages: SubpagePool,
    tiny_heads: Box<[SubpageId]>,
    small_heads: Box<[SubpageId]>,
    chunks: Vec<PooledChunk>,
    active_leases: usize,
}

impl ArenaState {
    fn new(config: &PoolConfig) -> Self {
        let mut subpages = SubpagePool::new(config.retain_sole_subpage);
        let tiny_heads = (0..NUM_TINY_CLASSES).map(|_| subpages.new_head()).collect();
        let small_heads = (0..size_class::num_small_classes(config.page_size))
            .map(|_| subpages.new_head())
            .collect();

        Self {
            page_size: config.page_size,
            chunk_size: config.chunk_size(),
            max_chunks: config.max_chunks,
            subpages,
            tiny_heads,
            small_heads,
            chunks: Vec::new(),
            active_leases: 0,
        }
    }

    /// List head for a subpage element size; runs and huge sizes have none
    fn list_head(&self, elem_size: usize) -> Option<SubpageId> {
        match size_class::classify(elem_size, self.page_size, self.chunk_size) {
            SizeClass::Tiny(idx) => Some(self.tiny_heads[idx]),
            SizeClass::Small(idx) => Some(self.small_heads[idx]),
            SizeClass::Normal | SizeClass::Huge => None,
        }
    }

    fn head_for(&self, elem_size: usize) -> SubpageId {
        match self.list_head(elem_size) {
            Some(head) => head,
            None => panic!("size {elem_size} has no subpage list"),
        }
    }

    fn chunk_index(&self, chunk_id: u64) -> usize {
        match self.chunks.iter().position(|c| c.chunk.id() == chunk_id) {
            Some(idx) => idx,
            None => panic!("chunk {chunk_id} does not belong to this arena"),
        }
    }

    /// Lease one element of `norm` bytes from a subpage
    fn allocate_subpage(&mut self, norm: usize, next_chunk_id: &AtomicU64) -> Result<Lease> {
        let head = self.head_for(norm);
        if let Some(id) = self.subpages.first(head) {
            debug_assert_eq!(self.subpages.get(id).elem_size(), norm);
            if let Some(locator) = self.subpages.allocate(id) {
                return Ok(self.subpage_lease(id, locator));
            }
        }

        let (chunk_idx, run) = self.allocate_pages(1, next_chunk_id)?;
        let page = run.page_index();
        let pooled = &mut self.chunks[chunk_idx];
        let id = match pooled.pages.subpage_at(page) {
            Some(id) => id,
            None => {
                let subpage = Subpage::new(
                    pooled.chunk.id(),
                    page,
                    pooled.pages.page_offset(page),
                    self.page_size,
                );
                let id = self.subpages.insert(subpage);
                pooled.pages.set_subpage(page, id);
                id
            }
        };
        self.subpages.init(head, id, norm);

        let Some(locator) = self.subpages.allocate(id) else {
            panic!("freshly initialized subpage at page {page} has no free slot");
        };
        Ok(self.subpage_lease(id, locator))
    }

    fn subpage_lease(&self, id: SubpageId, locator: Locator) -> Lease {
        let subpage = self.subpages.get(id);
        let idx = locator.bitmap_index().unwrap_or(0) as usize;
        let chunk = &self.chunks[self.chunk_index(subpage.chunk_id())].chunk;
        Lease {
            chunk: Arc::clone(chunk),
            locator,
            offset: subpage.run_offset() + idx * subpage.elem_size(),
            max_length: subpage.elem_size(),
        }
    }

    /// Lease a run of whole pages holding `norm` bytes
    fn allocate_normal(&mut self, norm: usize, next_chunk_id: &AtomicU64) -> Result<Lease> {
        let (chunk_idx, run) = self.allocate_pages(norm / self.page_size, next_chunk_id)?;
        let pooled = &self.chunks[chunk_idx];
        Ok(Lease {
            chunk: Arc::clone(&pooled.chunk),
            locator: run,
            offset: pooled.pages.page_offset(run.page_index()),
            max_length: pooled.pages.run_size(run.page_index()),
        })
    }

    /// First fit across chunks, creating a chunk when none has room
    fn allocate_pages(&mut self, pages: usize, next_chunk_id: &AtomicU64) -> Result<(usize, Locator)> {
        for (idx, pooled) in self.chunks.iter_mut().enumerate() {
            if let Some(run) = pooled.pages.allocate_run(pages) {
                return Ok((idx, run));
            }
        }

        if self.max_chunks != 0 && self.chunks.len() >= self.max_chunks {
            return Err(PoolError::Exhausted {
                chunks: self.chunks.len(),
                chunk_size: self.chunk_size,
            });
        }

        let memory =
            Memory::try_new(self.chunk_size).ok_or(PoolError::OutOfMemory(self.chunk_size))?;
        let id = next_chunk_id.fetch_add(1, Ordering::Relaxed);
        let mut pages_state = ChunkPages::new(self.chunk_size / self.page_size, self.page_size);
        let Some(run) = pages_state.allocate_run(pages) else {
            panic!("empty chunk cannot hold a run of {pages} pages");
        };

        self.chunks.push(PooledChunk {
            chunk: Arc::new(Chunk::new(id, memory, false)),
            pages: pages_state,
        });
        METRICS.chunk_created();
        debug!(
            chunk_id = id,
            chunk_size = self.chunk_size,
            chunks = self.chunks.len(),
            "Created chunk"
        );
        Ok((self.chunks.len() - 1, run))
    }

    /// Give a pooled lease back to its chunk
    fn free(&mut self, chunk_id: u64, locator: Locator) {
        let chunk_idx = self.chunk_index(chunk_id);
        let page = locator.page_index();

        if let Some(bitmap_idx) = locator.bitmap_index() {
            let Some(id) = self.chunks[chunk_idx].pages.subpage_at(page) else {
                panic!("locator {locator} points at page {page} which has no subpage");
            };
            let head = self.head_for(self.subpages.get(id).elem_size());
            if self.subpages.free(head, id, bitmap_idx as usize) {
                return;
            }
            METRICS.subpage_retired();
        }

        let pooled = &mut self.chunks[chunk_idx];
        pooled.pages.free_run(page);
        if pooled.pages.is_empty() && self.chunks.len() > 1 {
            self.destroy_chunk(chunk_idx);
        }
    }

    fn destroy_chunk(&mut self, chunk_idx: usize) {
        let pooled = self.chunks.swap_remove(chunk_idx);
        for id in pooled.pages.subpage_ids() {
            self.subpages.remove(id);
        }
        METRICS.chunk_destroyed();
        debug!(
            chunk_id = pooled.chunk.id(),
            chunks = self.chunks.len(),
            "Destroyed idle chunk"
        );
    }

    fn stats(&self) -> ArenaStats {
        let subpage_ids = || self.chunks.iter().flat_map(|c| c.pages.subpage_ids());
        ArenaStats {
            chunks: self.chunks.len(),
            used_pages: self.chunks.iter().map(|c| c.pages.used_pages()).sum(),
            active_subpages: subpage_ids()
                .filter(|id| self.subpages.get(*id).do_not_destroy)
                .count(),
            active_leases: self.active_leases,
            ..ArenaStats::default()
        }
    }
}

/// Owning domain for pooled memory
pub struct PoolArena {
    config: PoolConfig,
    state: Mutex<ArenaState>,
    recycler: Recycler,
    next_chunk_id: AtomicU64,
    reallocations: AtomicU64,
}

impl PoolArena {
    /// Create an arena; no memory is reserved until the first allocation
    pub fn new(config: PoolConfig) -> ConfigResult<Arc<Self>> {
        config.validate()?;
        info!(
            page_size = config.page_size,
            chunk_size = config.chunk_size(),
            max_chunks = config.max_chunks,
            "Creating pool arena"
        );

        Ok(Arc::new(Self {
            state: Mutex::new(ArenaState::new(&config)),
            recycler: Recycler::new(config.recycler_capacity),
            next_chunk_id: AtomicU64::new(1),
            reallocations: AtomicU64::new(0),
            config,
        }))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Allocate a buffer with the configured default capacity ceiling
    pub fn buffer(self: &Arc<Self>, capacity: usize) -> Result<PooledBuf> {
        self.allocate(capacity, self.config.default_max_capacity)
    }

    /// Allocate a buffer of `capacity` bytes that may grow to `max_capacity`
    pub fn allocate(self: &Arc<Self>, capacity: usize, max_capacity: usize) -> Result<PooledBuf> {
        if capacity > max_capacity {
            return Err(PoolError::CapacityExceeded {
                requested: capacity,
                max: max_capacity,
            });
        }

        let core = self.recycler.get(max_capacity);
        let bound = self.bind(&mut core.state.lock(), capacity);
        match bound {
            Ok(()) => Ok(PooledBuf::from_core(core)),
            Err(e) => {
                self.recycler.recycle(core);
                Err(e)
            }
        }
    }

    /// Carve a region for `capacity` bytes and bind it to `state`
    fn bind(self: &Arc<Self>, state: &mut BufState, capacity: usize) -> Result<()> {
        let chunk_size = self.config.chunk_size();
        let norm = size_class::normalize(capacity, chunk_size);
        let class = size_class::classify(norm, self.config.page_size, chunk_size);

        if class == SizeClass::Huge {
            let memory = Memory::try_new(capacity).ok_or_else(|| {
                METRICS.allocation_failed();
                PoolError::OutOfMemory(capacity)
            })?;
            let id = self.next_chunk_id.fetch_add(1, Ordering::Relaxed);
            state.init_unpooled(
                Arc::clone(self),
                Arc::new(Chunk::new(id, memory, true)),
                capacity,
            );
            METRICS.allocated(class);
            return Ok(());
        }

        let lease = {
            let mut arena = self.state.lock();
            let lease = match class {
                SizeClass::Normal => arena.allocate_normal(norm, &self.next_chunk_id),
                _ => arena.allocate_subpage(norm, &self.next_chunk_id),
            };
            if lease.is_ok() {
                arena.active_leases += 1;
            }
            lease
        };

        match lease {
            Ok(lease) => {
                state.init(
                    Arc::clone(self),
                    lease.chunk,
                    lease.locator,
                    lease.offset,
                    capacity,
                    lease.max_length,
                );
                METRICS.allocated(class);
                Ok(())
            }
            Err(e) => {
                METRICS.allocation_failed();
                warn!(capacity, error = %e, "Pool allocation failed");
                Err(e)
            }
        }
    }

    /// Release a lease back to this arena
    pub(crate) fn free(&self, binding: Binding) {
        match binding.location {
            Location::Unpooled => {
                METRICS.deallocated_unpooled();
                trace!(
                    chunk_id = binding.chunk.id(),
                    bytes = binding.max_length,
                    "Released unpooled chunk"
                );
            }
            Location::Pooled(locator) => {
                let mut state = self.state.lock();
                state.free(binding.chunk.id(), locator);
                state.active_leases -= 1;
                METRICS.deallocated_pooled();
            }
        }
    }

    /// Move a lease to a region that fits `new_capacity`, keeping its bytes
    ///
    /// The old region is freed only once the new one is bound; on failure
    /// `state` keeps its original binding.
    pub(crate) fn reallocate(self: &Arc<Self>, state: &mut BufState, new_capacity: usize) -> Result<()> {
        let Some(old) = state.binding.take() else {
            panic!("reallocating a released buffer");
        };

        if let Err(e) = self.bind(state, new_capacity) {
            state.binding = Some(old);
            return Err(e);
        }

        let new = state.binding();
        let keep = old.length.min(new_capacity);
        // SAFETY: both regions are leased to this handle and its state lock is
        // held by the caller.
        unsafe {
            old.chunk
                .memory
                .copy_to(old.offset, &new.chunk.memory, new.offset, keep)
        };
        state.clamp_indexes(new_capacity);

        self.reallocations.fetch_add(1, Ordering::Relaxed);
        METRICS.reallocated();
        trace!(
            old_capacity = old.length,
            new_capacity,
            copied = keep,
            "Reallocated buffer"
        );
        self.free(old);
        Ok(())
    }

    pub(crate) fn recycle(&self, core: Arc<BufCore>) {
        self.recycler.recycle(core);
    }

    /// Point-in-time arena statistics
    pub fn stats(&self) -> ArenaStats {
        let mut stats = self.state.lock().stats();
        stats.reallocations = self.reallocations.load(Ordering::Relaxed);
        stats.idle_handles = self.recycler.idle();
        stats
    }

    /// Number of subpages with free slots for requests of `capacity` bytes
    ///
    /// Requests served by page runs or unpooled memory have no subpages.
    pub fn free_subpages(&self, capacity: usize) -> usize {
        let norm = size_class::normalize(capacity, self.config.chunk_size());
        let state = self.state.lock();
        state
            .list_head(norm)
            .map_or(0, |head| state.subpages.len(head))
    }

    /// Metric views over every live subpage
    pub fn subpage_metrics(self: &Arc<Self>) -> Vec<SubpageMetricRef> {
        let state = self.state.lock();
        state
            .chunks
            .iter()
            .flat_map(|c| c.pages.subpage_ids())
            .map(|id| SubpageMetricRef::new(Arc::clone(self), id))
            .collect()
    }

    /// Run `f` against a subpage while holding the arena lock
    pub(crate) fn with_subpage<R>(&self, id: SubpageId, f: impl FnOnce(&Subpage) -> R) -> Option<R> {
        let state = self.state.lock();
        state.subpages.try_get(id).map(f)
    }
}

impl Drop for PoolArena {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        debug!(chunks = state.chunks.len(), "Destroying pool arena");
        for _ in state.chunks.drain(..) {
            METRICS.chunk_destroyed();
        }
    }
}
