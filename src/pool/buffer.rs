//! Leased buffer handles
//!
//! A [`PooledBuf`] is a window `[offset, offset + length)` into a chunk's
//! backing memory. The handle object itself ([`BufCore`]) outlives the
//! lease: once the last reference is released the window goes back to the
//! arena and the core is parked in the recycler for the next allocation.

use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::arena::PoolArena;
use super::chunk::Chunk;
use super::derived::DerivedBuf;
use super::locator::Locator;
use crate::error::{PoolError, Result};
use crate::metrics::METRICS;

/// Below this, capacities grow by doubling from 64
const CALCULATE_THRESHOLD: usize = 4 * 1024 * 1024;

/// Shrinks of leases this small or smaller must stay within one
/// 16-byte step of the original size to avoid a reallocation
const FINE_SHRINK_LIMIT: usize = 512;
const FINE_SHRINK_STEP: usize = 16;

/// Where a lease lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Carved from a shared chunk
    Pooled(Locator),
    /// Private allocation that owns its whole chunk
    Unpooled,
}

/// A bound region of backing memory
pub(crate) struct Binding {
    pub(crate) arena: Arc<PoolArena>,
    pub(crate) chunk: Arc<Chunk>,
    pub(crate) location: Location,
    pub(crate) offset: usize,
    /// Current logical capacity
    pub(crate) length: usize,
    /// Largest capacity reachable without reallocating
    pub(crate) max_length: usize,
}

/// Mutable per-handle state
pub(crate) struct BufState {
    pub(crate) binding: Option<Binding>,
    pub(crate) reader_index: usize,
    pub(crate) writer_index: usize,
    pub(crate) max_capacity: usize,
}

impl BufState {
    /// Bind a pooled lease
    pub(crate) fn init(
        &mut self,
        arena: Arc<PoolArena>,
        chunk: Arc<Chunk>,
        locator: Locator,
        offset: usize,
        length: usize,
        max_length: usize,
    ) {
        assert!(!chunk.is_unpooled(), "pooled lease on an unpooled chunk");
        self.bind(Binding {
            arena,
            chunk,
            location: Location::Pooled(locator),
            offset,
            length,
            max_length,
        });
    }

    /// Bind a private allocation covering its whole chunk
    pub(crate) fn init_unpooled(&mut self, arena: Arc<PoolArena>, chunk: Arc<Chunk>, length: usize) {
        assert!(chunk.is_unpooled(), "unpooled lease on a pooled chunk");
        self.bind(Binding {
            arena,
            chunk,
            location: Location::Unpooled,
            offset: 0,
            length,
            max_length: length,
        });
    }

    pub(crate) fn bind(&mut self, binding: Binding) {
        assert!(self.binding.is_none(), "buffer is already bound");
        assert!(
            binding.length <= binding.max_length
                && binding.offset + binding.max_length <= binding.chunk.len(),
            "lease {}+{}/{} does not fit chunk of {} bytes",
            binding.offset,
            binding.length,
            binding.max_length,
            binding.chunk.len()
        );
        self.binding = Some(binding);
    }

    pub(crate) fn binding(&self) -> &Binding {
        match self.binding.as_ref() {
            Some(binding) => binding,
            None => panic!("buffer used after it was released"),
        }
    }

    fn binding_mut(&mut self) -> &mut Binding {
        match self.binding.as_mut() {
            Some(binding) => binding,
            None => panic!("buffer used after it was released"),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.binding.as_ref().map_or(0, |b| b.length)
    }

    /// Pull both cursors inside a new capacity
    pub(crate) fn clamp_indexes(&mut self, capacity: usize) {
        self.reader_index = self.reader_index.min(capacity);
        self.writer_index = self.writer_index.min(capacity);
    }

    fn check_range(&self, index: usize, length: usize) -> Result<()> {
        let capacity = self.capacity();
        match index.checked_add(length) {
            Some(end) if end <= capacity => Ok(()),
            _ => Err(PoolError::IndexOutOfBounds {
                index,
                length,
                capacity,
            }),
        }
    }

    pub(crate) fn get_bytes(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        self.check_range(index, dst.len())?;
        let b = self.binding();
        // SAFETY: the range lies inside this lease and the state lock is held.
        unsafe { b.chunk.memory.read(b.offset + index, dst) };
        Ok(())
    }

    pub(crate) fn set_bytes(&self, index: usize, src: &[u8]) -> Result<()> {
        self.check_range(index, src.len())?;
        let b = self.binding();
        // SAFETY: the range lies inside this lease and the state lock is held.
        unsafe { b.chunk.memory.write(b.offset + index, src) };
        Ok(())
    }

    /// Change the logical capacity, in place when the lease allows it
    pub(crate) fn set_capacity(&mut self, new_capacity: usize) -> Result<()> {
        if new_capacity > self.max_capacity {
            return Err(PoolError::CapacityExceeded {
                requested: new_capacity,
                max: self.max_capacity,
            });
        }

        let b = self.binding_mut();
        let (length, max_length) = (b.length, b.max_length);
        match b.location {
            Location::Unpooled => {
                if new_capacity == length {
                    return Ok(());
                }
            }
            Location::Pooled(_) => {
                if new_capacity > length {
                    if new_capacity <= max_length {
                        b.length = new_capacity;
                        METRICS.resized_in_place();
                        return Ok(());
                    }
                } else if new_capacity < length {
                    if shrinks_in_place(new_capacity, max_length) {
                        b.length = new_capacity;
                        self.clamp_indexes(new_capacity);
                        METRICS.resized_in_place();
                        return Ok(());
                    }
                } else {
                    return Ok(());
                }
            }
        }

        let arena = Arc::clone(&b.arena);
        arena.reallocate(self, new_capacity)
    }
}

/// Whether shrinking a lease of `max_length` to `new_capacity` can keep the
/// current memory
fn shrinks_in_place(new_capacity: usize, max_length: usize) -> bool {
    if new_capacity <= max_length >> 1 {
        return false;
    }
    max_length > FINE_SHRINK_LIMIT || new_capacity > max_length.saturating_sub(FINE_SHRINK_STEP)
}

/// Capacity to grow to so that at least `min` bytes fit
fn calculate_new_capacity(min: usize, max: usize) -> usize {
    if min == CALCULATE_THRESHOLD {
        return CALCULATE_THRESHOLD;
    }
    if min > CALCULATE_THRESHOLD {
        let new = min / CALCULATE_THRESHOLD * CALCULATE_THRESHOLD;
        return if new > max.saturating_sub(CALCULATE_THRESHOLD) {
            max
        } else {
            new + CALCULATE_THRESHOLD
        };
    }
    min.max(64).next_power_of_two().min(max)
}

/// Recyclable handle object shared by a buffer and its derived views
pub(crate) struct BufCore {
    pub(crate) state: Mutex<BufState>,
    ref_cnt: AtomicUsize,
}

impl BufCore {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(BufState {
                binding: None,
                reader_index: 0,
                writer_index: 0,
                max_capacity: 0,
            }),
            ref_cnt: AtomicUsize::new(0),
        }
    }

    /// Prepare a freshly obtained core for its next lease
    pub(crate) fn reuse(&self, max_capacity: usize) {
        let mut state = self.state.lock();
        state.max_capacity = max_capacity;
        state.reader_index = 0;
        state.writer_index = 0;
        self.ref_cnt.store(1, Ordering::Release);
    }

    pub(crate) fn ref_cnt(&self) -> usize {
        self.ref_cnt.load(Ordering::Acquire)
    }

    pub(crate) fn max_capacity(&self) -> usize {
        self.state.lock().max_capacity
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.state.lock().binding.is_some()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.state.lock().capacity()
    }

    pub(crate) fn retain(&self) {
        let prev = self.ref_cnt.fetch_add(1, Ordering::AcqRel);
        assert!(prev > 0, "retain on a released buffer");
    }

    /// Drop one reference, deallocating on the last one
    pub(crate) fn release(self: &Arc<Self>) {
        let prev = self.ref_cnt.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "release on a released buffer");
        if prev == 1 {
            self.deallocate();
        }
    }

    /// Return the lease to its arena and park this core for reuse
    ///
    /// A core that is no longer bound is left alone, so a repeated call is
    /// harmless.
    pub(crate) fn deallocate(self: &Arc<Self>) {
        let binding = self.state.lock().binding.take();
        if let Some(binding) = binding {
            let arena = Arc::clone(&binding.arena);
            arena.free(binding);
            arena.recycle(Arc::clone(self));
        }
    }
}

/// A leased byte buffer with independent read and write cursors
///
/// Dropping the buffer releases its reference; the memory goes back to the
/// arena once every derived view is gone as well.
pub struct PooledBuf {
    core: Arc<BufCore>,
}

impl PooledBuf {
    pub(crate) fn from_core(core: Arc<BufCore>) -> Self {
        Self { core }
    }

    /// Current capacity in bytes
    pub fn capacity(&self) -> usize {
        self.core.capacity()
    }

    /// Upper bound for [`PooledBuf::set_capacity`]
    pub fn max_capacity(&self) -> usize {
        self.core.max_capacity()
    }

    /// Resize the buffer, reusing the current memory when possible
    ///
    /// Bytes below `min(old, new)` capacity are preserved either way. If a
    /// reallocation fails the buffer is left exactly as it was.
    pub fn set_capacity(&mut self, new_capacity: usize) -> Result<()> {
        self.core.state.lock().set_capacity(new_capacity)
    }

    pub fn reader_index(&self) -> usize {
        self.core.state.lock().reader_index
    }

    pub fn writer_index(&self) -> usize {
        self.core.state.lock().writer_index
    }

    /// Set both cursors; requires `reader <= writer <= capacity`
    pub fn set_index(&mut self, reader_index: usize, writer_index: usize) -> Result<()> {
        let mut state = self.core.state.lock();
        let capacity = state.capacity();
        if reader_index > writer_index || writer_index > capacity {
            return Err(PoolError::IndexOutOfBounds {
                index: reader_index,
                length: writer_index.saturating_sub(reader_index),
                capacity,
            });
        }
        state.reader_index = reader_index;
        state.writer_index = writer_index;
        Ok(())
    }

    pub fn readable_bytes(&self) -> usize {
        let state = self.core.state.lock();
        state.writer_index - state.reader_index
    }

    pub fn writable_bytes(&self) -> usize {
        let state = self.core.state.lock();
        state.capacity() - state.writer_index
    }

    /// Grow capacity so that `additional` more bytes can be written
    pub fn ensure_writable(&mut self, additional: usize) -> Result<()> {
        let mut state = self.core.state.lock();
        let writer_index = state.writer_index;
        if additional <= state.capacity() - writer_index {
            return Ok(());
        }

        let max_capacity = state.max_capacity;
        let requested = writer_index.saturating_add(additional);
        if requested > max_capacity {
            return Err(PoolError::CapacityExceeded {
                requested,
                max: max_capacity,
            });
        }
        state.set_capacity(calculate_new_capacity(requested, max_capacity))
    }

    /// Append `src` at the writer index, growing if necessary
    pub fn write_bytes(&mut self, src: &[u8]) -> Result<()> {
        self.ensure_writable(src.len())?;
        let mut state = self.core.state.lock();
        let writer_index = state.writer_index;
        state.set_bytes(writer_index, src)?;
        state.writer_index += src.len();
        Ok(())
    }

    /// Fill `dst` from the reader index and advance it
    pub fn read_bytes(&mut self, dst: &mut [u8]) -> Result<()> {
        let mut state = self.core.state.lock();
        let reader_index = state.reader_index;
        if dst.len() > state.writer_index - reader_index {
            return Err(PoolError::IndexOutOfBounds {
                index: reader_index,
                length: dst.len(),
                capacity: state.writer_index,
            });
        }
        state.get_bytes(reader_index, dst)?;
        state.reader_index += dst.len();
        Ok(())
    }

    /// Copy bytes at an absolute index without moving the cursors
    pub fn get_bytes(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        self.core.state.lock().get_bytes(index, dst)
    }

    /// Overwrite bytes at an absolute index without moving the cursors
    pub fn set_bytes(&mut self, index: usize, src: &[u8]) -> Result<()> {
        self.core.state.lock().set_bytes(index, src)
    }

    /// Copy of the readable region
    pub fn copy_readable(&self) -> Result<Bytes> {
        let state = self.core.state.lock();
        let mut out = vec![0u8; state.writer_index - state.reader_index];
        state.get_bytes(state.reader_index, &mut out)?;
        Ok(Bytes::from(out))
    }

    /// Live references to the underlying lease
    pub fn ref_cnt(&self) -> usize {
        self.core.ref_cnt()
    }

    pub fn is_pooled(&self) -> bool {
        matches!(
            self.core.state.lock().binding().location,
            Location::Pooled(_)
        )
    }

    /// Locator of a pooled lease
    pub fn locator(&self) -> Option<Locator> {
        match self.core.state.lock().binding().location {
            Location::Pooled(locator) => Some(locator),
            Location::Unpooled => None,
        }
    }

    /// Capacity reachable without reallocating
    pub fn max_fast_capacity(&self) -> usize {
        self.core.state.lock().binding().max_length
    }

    /// A view over the same memory with its own cursors
    pub fn retained_duplicate(&self) -> DerivedBuf {
        let (reader_index, writer_index) = {
            let state = self.core.state.lock();
            (state.reader_index, state.writer_index)
        };
        self.core.retain();
        DerivedBuf::duplicate(Arc::clone(&self.core), reader_index, writer_index)
    }

    /// A view of `length` bytes starting at `index`
    pub fn retained_slice(&self, index: usize, length: usize) -> Result<DerivedBuf> {
        self.core.state.lock().check_range(index, length)?;
        self.core.retain();
        Ok(DerivedBuf::slice(Arc::clone(&self.core), index, length))
    }

    /// A view of the readable bytes
    pub fn retained_slice_readable(&self) -> DerivedBuf {
        let (index, length) = {
            let state = self.core.state.lock();
            (state.reader_index, state.writer_index - state.reader_index)
        };
        self.core.retain();
        DerivedBuf::slice(Arc::clone(&self.core), index, length)
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        self.core.release();
    }
}

impl fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("PooledBuf")
            .field("ridx", &state.reader_index)
            .field("widx", &state.writer_index)
            .field("cap", &state.capacity())
            .field("max_cap", &state.max_capacity)
            .finish()
    }
}
