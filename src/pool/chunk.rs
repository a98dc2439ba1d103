//! Chunks of backing memory
//!
//! A pooled chunk is `page_size << max_order` bytes split into pages. Pages
//! are handed out as contiguous runs, or one at a time to back a subpage.
//! Unpooled chunks hold exactly one oversized buffer and have no pages.

use std::fmt;

use super::locator::Locator;
use super::memory::Memory;
use super::subpage_list::SubpageId;

/// Backing store shared by every buffer leased from it
pub(crate) struct Chunk {
    id: u64,
    pub(crate) memory: Memory,
    unpooled: bool,
}

impl Chunk {
    pub fn new(id: u64, memory: Memory, unpooled: bool) -> Self {
        Self {
            id,
            memory,
            unpooled,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_unpooled(&self) -> bool {
        self.unpooled
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.id)
            .field("len", &self.len())
            .field("unpooled", &self.unpooled)
            .finish()
    }
}

/// Page bookkeeping for a pooled chunk, guarded by the arena lock
pub(crate) struct ChunkPages {
    page_size: usize,
    /// Run length recorded at the first page of every leased run, 0 elsewhere
    run_pages: Box<[u32]>,
    used: Box<[bool]>,
    free_pages: usize,
    /// Subpage created for a page, kept for reuse across size classes
    subpages: Box<[Option<SubpageId>]>,
}

impl ChunkPages {
    pub fn new(page_count: usize, page_size: usize) -> Self {
        Self {
            page_size,
            run_pages: vec![0; page_count].into_boxed_slice(),
            used: vec![false; page_count].into_boxed_slice(),
            free_pages: page_count,
            subpages: vec![None; page_count].into_boxed_slice(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.used.len()
    }

    #[cfg(test)]
    pub fn free_pages(&self) -> usize {
        self.free_pages
    }

    pub fn used_pages(&self) -> usize {
        self.page_count() - self.free_pages
    }

    pub fn is_empty(&self) -> bool {
        self.free_pages == self.page_count()
    }

    pub fn page_offset(&self, page: u32) -> usize {
        page as usize * self.page_size
    }

    /// Lease `pages` contiguous pages, first fit
    pub fn allocate_run(&mut self, pages: usize) -> Option<Locator> {
        if pages == 0 || pages > self.free_pages {
            return None;
        }

        let mut start = 0;
        while start + pages <= self.page_count() {
            match self.used[start..start + pages].iter().rposition(|used| *used) {
                // Restart just past the last used page in the window.
                Some(busy) => start += busy + 1,
                None => {
                    self.used[start..start + pages].fill(true);
                    self.run_pages[start] = pages as u32;
                    self.free_pages -= pages;
                    return Some(Locator::run(start as u32));
                }
            }
        }
        None
    }

    /// Return the run starting at `page`
    pub fn free_run(&mut self, page: u32) {
        let start = page as usize;
        let pages = self.run_pages[start] as usize;
        assert!(pages > 0, "page {page} does not start a leased run");
        assert!(
            self.used[start..start + pages].iter().all(|used| *used),
            "run at page {page} is partially free"
        );

        self.used[start..start + pages].fill(false);
        self.run_pages[start] = 0;
        self.free_pages += pages;
    }

    /// Size in bytes of the run starting at `page`
    pub fn run_size(&self, page: u32) -> usize {
        self.run_pages[page as usize] as usize * self.page_size
    }

    pub fn subpage_at(&self, page: u32) -> Option<SubpageId> {
        self.subpages[page as usize]
    }

    pub fn set_subpage(&mut self, page: u32, id: SubpageId) {
        self.subpages[page as usize] = Some(id);
    }

    /// Every subpage ever created in this chunk
    pub fn subpage_ids(&self) -> impl Iterator<Item = SubpageId> + '_ {
        self.subpages.iter().flatten().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fit_runs() {
        let mut pages = ChunkPages::new(8, 4096);

        let a = pages.allocate_run(2).unwrap();
        let b = pages.allocate_run(3).unwrap();
        assert_eq!(a.page_index(), 0);
        assert_eq!(b.page_index(), 2);
        assert_eq!(pages.free_pages(), 3);
        assert_eq!(pages.run_size(2), 3 * 4096);

        pages.free_run(0);
        // Two free pages at the front cannot hold three.
        let c = pages.allocate_run(3).unwrap();
        assert_eq!(c.page_index(), 5);
        let d = pages.allocate_run(1).unwrap();
        assert_eq!(d.page_index(), 0);
        assert!(pages.allocate_run(2).is_none());
    }

    #[test]
    fn test_empty_after_all_runs_freed() {
        let mut pages = ChunkPages::new(4, 4096);
        let a = pages.allocate_run(4).unwrap();
        assert!(pages.allocate_run(1).is_none());

        pages.free_run(a.page_index());
        assert!(pages.is_empty());
        assert_eq!(pages.used_pages(), 0);
    }

    #[test]
    #[should_panic(expected = "does not start a leased run")]
    fn test_free_unleased_page_panics() {
        let mut pages = ChunkPages::new(4, 4096);
        pages.free_run(1);
    }
}
