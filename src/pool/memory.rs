//! Shared backing memory
//!
//! One `Memory` backs a whole chunk and is referenced by every buffer leased
//! out of it. Leases cover disjoint byte ranges, so writers never overlap.

use std::cell::UnsafeCell;
use std::ptr;

/// Fixed-size, zero-initialized byte store with interior mutability
pub(crate) struct Memory {
    bytes: Box<[UnsafeCell<u8>]>,
}

// SAFETY: byte ranges are handed out exclusively by the arena (bitmap and
// page bookkeeping under the arena lock) and access to a single lease is
// serialized by that lease's state mutex, so no two threads touch the same
// byte concurrently.
unsafe impl Sync for Memory {}

impl Memory {
    /// Allocate `len` zeroed bytes, or `None` if the allocator refuses
    pub fn try_new(len: usize) -> Option<Self> {
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len).ok()?;
        bytes.resize_with(len, || UnsafeCell::new(0u8));
        Some(Self {
            bytes: bytes.into_boxed_slice(),
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.bytes.as_ptr())
    }

    #[inline]
    fn check(&self, pos: usize, len: usize) {
        assert!(
            pos.checked_add(len).is_some_and(|end| end <= self.len()),
            "range {pos}+{len} outside backing memory of {} bytes",
            self.len()
        );
    }

    /// Copy bytes starting at `pos` into `dst`
    ///
    /// # Safety
    ///
    /// The caller must own the lease covering `pos..pos + dst.len()` and
    /// hold its state lock, so nobody writes the range concurrently.
    pub unsafe fn read(&self, pos: usize, dst: &mut [u8]) {
        self.check(pos, dst.len());
        // SAFETY: bounds checked above; exclusivity guaranteed by the caller.
        unsafe { ptr::copy_nonoverlapping(self.base().add(pos), dst.as_mut_ptr(), dst.len()) }
    }

    /// Copy `src` into the store starting at `pos`
    ///
    /// # Safety
    ///
    /// Same contract as [`Memory::read`].
    pub unsafe fn write(&self, pos: usize, src: &[u8]) {
        self.check(pos, src.len());
        // SAFETY: bounds checked above; exclusivity guaranteed by the caller.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.base().add(pos), src.len()) }
    }

    /// Copy `len` bytes from `self[src_pos..]` into `dst[dst_pos..]`
    ///
    /// # Safety
    ///
    /// The caller must own both ranges. They may live in the same store.
    pub unsafe fn copy_to(&self, src_pos: usize, dst: &Memory, dst_pos: usize, len: usize) {
        self.check(src_pos, len);
        dst.check(dst_pos, len);
        // SAFETY: bounds checked above; `ptr::copy` tolerates overlap.
        unsafe { ptr::copy(self.base().add(src_pos), dst.base().add(dst_pos), len) }
    }
}
