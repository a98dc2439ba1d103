//! Subpage slot allocator
//!
//! Carves one page into equal-sized elements and tracks which are leased
//! with a bitset (1 = leased, 0 = free). Each u64 tracks 64 elements.
//!
//! A subpage never locks. All mutation happens while the owning arena's lock
//! is held; list membership is handled by [`super::subpage_list`].

use std::fmt;

use super::locator::Locator;
use super::size_class::MIN_ELEMENT_SIZE;

/// Fixed-size element allocator over a single page
pub(crate) struct Subpage {
    /// Chunk the page belongs to
    chunk_id: u64,
    /// Page index inside the chunk (owner location)
    run_id: u32,
    /// Byte offset of the page inside the chunk
    run_offset: usize,
    page_size: usize,
    /// Sized for the smallest element; only `bitmap_len` words are live
    bitmap: Box<[u64]>,
    bitmap_len: usize,
    elem_size: usize,
    max_elems: usize,
    num_avail: usize,
    /// Slot freed most recently, consumed by the next allocation
    next_avail: Option<usize>,
    /// Cleared once the subpage is retired; blocks allocation
    pub(crate) do_not_destroy: bool,
}

impl Subpage {
    /// Create an uninitialized subpage for the page at `run_id`
    pub fn new(chunk_id: u64, run_id: u32, run_offset: usize, page_size: usize) -> Self {
        let words = (page_size / MIN_ELEMENT_SIZE / 64).max(1);
        Self {
            chunk_id,
            run_id,
            run_offset,
            page_size,
            bitmap: vec![0u64; words].into_boxed_slice(),
            bitmap_len: 0,
            elem_size: 0,
            max_elems: 0,
            num_avail: 0,
            next_avail: None,
            do_not_destroy: false,
        }
    }

    /// Reset the bitmap for a (possibly new) element size
    pub fn reset(&mut self, elem_size: usize) {
        self.do_not_destroy = true;
        self.elem_size = elem_size;
        // Words past `bitmap_len` are never touched, so they are already clear.
        self.bitmap[..self.bitmap_len].fill(0);
        if elem_size == 0 {
            // Pass-through: no slots are tracked.
            self.max_elems = 0;
            self.num_avail = 0;
            self.next_avail = None;
            self.bitmap_len = 0;
            return;
        }
        self.max_elems = self.page_size / elem_size;
        self.num_avail = self.max_elems;
        self.next_avail = Some(0);
        self.bitmap_len = self.max_elems.div_ceil(64);
    }

    /// Claim the next free element and mark it leased
    ///
    /// The caller has already checked that `num_avail > 0`.
    pub fn claim(&mut self) -> usize {
        let Some(idx) = self.next_avail() else {
            panic!(
                "subpage {} reports {} free slots but its bitmap is full",
                self.run_id, self.num_avail
            );
        };
        let (q, r) = (idx / 64, idx % 64);
        assert!(self.bitmap[q] >> r & 1 == 0, "slot {idx} already leased");
        self.bitmap[q] |= 1u64 << r;
        self.num_avail -= 1;
        idx
    }

    /// Mark `idx` free again and remember it for the next allocation
    ///
    /// Panics on a double free: a clear bit here means two owners believed
    /// they held the same slot.
    pub fn release(&mut self, idx: usize) {
        assert!(
            idx < self.max_elems,
            "slot {idx} out of range for subpage with {} elements",
            self.max_elems
        );
        let (q, r) = (idx / 64, idx % 64);
        assert!(
            self.bitmap[q] >> r & 1 != 0,
            "double free of slot {idx} in subpage {}",
            self.run_id
        );
        self.bitmap[q] ^= 1u64 << r;
        self.next_avail = Some(idx);
        self.num_avail += 1;
    }

    fn next_avail(&mut self) -> Option<usize> {
        match self.next_avail.take() {
            Some(idx) => Some(idx),
            None => self.find_next_avail(),
        }
    }

    fn find_next_avail(&self) -> Option<usize> {
        self.bitmap[..self.bitmap_len]
            .iter()
            .enumerate()
            .find(|(_, bits)| !**bits != 0)
            .and_then(|(word_idx, bits)| self.find_in_word(word_idx, *bits))
    }

    fn find_in_word(&self, word_idx: usize, bits: u64) -> Option<usize> {
        let idx = word_idx * 64 + (!bits).trailing_zeros() as usize;
        (idx < self.max_elems).then_some(idx)
    }

    /// Encode element `idx` of this subpage as a locator
    pub fn locator(&self, idx: usize) -> Locator {
        Locator::subpage(self.run_id, idx as u32)
    }

    pub fn chunk_id(&self) -> u64 {
        self.chunk_id
    }

    pub fn run_id(&self) -> u32 {
        self.run_id
    }

    pub fn run_offset(&self) -> usize {
        self.run_offset
    }

    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    #[cfg(test)]
    pub fn max_elems(&self) -> usize {
        self.max_elems
    }

    pub fn num_avail(&self) -> usize {
        self.num_avail
    }

    pub fn is_fully_free(&self) -> bool {
        self.num_avail == self.max_elems
    }

    /// Leased element count, derived from the bitmap
    #[cfg(test)]
    pub fn leased_bits(&self) -> usize {
        self.bitmap[..self.bitmap_len]
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum()
    }

    /// Point-in-time metric values; `None` once retired
    pub fn metric(&self) -> SubpageMetricValues {
        if self.do_not_destroy {
            SubpageMetricValues {
                max_elements: Some(self.max_elems),
                available: Some(self.num_avail),
                element_size: Some(self.elem_size),
                page_size: self.page_size,
            }
        } else {
            SubpageMetricValues {
                max_elements: None,
                available: None,
                element_size: None,
                page_size: self.page_size,
            }
        }
    }
}

impl fmt::Display for Subpage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.do_not_destroy {
            return write!(f, "({}: not in use)", self.run_id);
        }
        write!(
            f,
            "({}: {}/{}, offset: {}, length: {}, elemSize: {})",
            self.run_id,
            self.max_elems - self.num_avail,
            self.max_elems,
            self.run_offset,
            self.page_size,
            self.elem_size
        )
    }
}

/// Snapshot of a subpage's metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubpageMetricValues {
    pub max_elements: Option<usize>,
    pub available: Option<usize>,
    pub element_size: Option<usize>,
    pub page_size: usize,
}
