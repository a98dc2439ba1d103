//! Packed allocation locator
//!
//! A locator identifies one pooled allocation inside a chunk using a single
//! `u64`:
//!
//! ```text
//!  63  62         32 31                0
//! +---+-+-----------+------------------+
//! | 0 |M| bitmap idx|    page index    |
//! +---+-+-----------+------------------+
//! ```
//!
//! The marker bit `M` is set for subpage allocations so that bitmap index 0
//! can be told apart from a whole-run allocation of the same page.

use std::fmt;

const SUBPAGE_MARKER: u64 = 0x4000_0000_0000_0000;
const BITMAP_IDX_MASK: u64 = 0x3FFF_FFFF;
const PAGE_IDX_MASK: u64 = 0xFFFF_FFFF;

/// Location of an allocation within its chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Locator(u64);

impl Locator {
    /// Locator for a run of whole pages starting at `page_idx`
    pub fn run(page_idx: u32) -> Self {
        Self(u64::from(page_idx))
    }

    /// Locator for element `bitmap_idx` of the subpage living at `page_idx`
    pub fn subpage(page_idx: u32, bitmap_idx: u32) -> Self {
        assert!(
            u64::from(bitmap_idx) <= BITMAP_IDX_MASK,
            "bitmap index {bitmap_idx} does not fit in a locator"
        );
        Self(SUBPAGE_MARKER | (u64::from(bitmap_idx) << 32) | u64::from(page_idx))
    }

    /// Rebuild a locator from its raw encoding
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Page (owner location) this allocation sits in
    pub fn page_index(&self) -> u32 {
        (self.0 & PAGE_IDX_MASK) as u32
    }

    /// Element index within the subpage, or `None` for a run allocation
    pub fn bitmap_index(&self) -> Option<u32> {
        if self.is_subpage() {
            Some(((self.0 >> 32) & BITMAP_IDX_MASK) as u32)
        } else {
            None
        }
    }

    /// Whether this locator points into a subpage
    pub fn is_subpage(&self) -> bool {
        self.0 & SUBPAGE_MARKER != 0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bitmap_index() {
            Some(idx) => write!(f, "page {}/slot {}", self.page_index(), idx),
            None => write!(f, "page {}", self.page_index()),
        }
    }
}
