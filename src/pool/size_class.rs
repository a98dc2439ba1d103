//! Request size normalization and size-class lookup

/// Smallest subpage element; tiny classes step by this much
pub const MIN_ELEMENT_SIZE: usize = 16;

/// Requests below this are "tiny" and rounded to a multiple of 16
pub const TINY_LIMIT: usize = 512;

/// Number of tiny size classes (0, 16, 32, ... 496)
pub const NUM_TINY_CLASSES: usize = TINY_LIMIT / MIN_ELEMENT_SIZE;

/// Category of a normalized request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    /// Subpage element, index into the tiny list heads
    Tiny(usize),
    /// Subpage element, index into the small list heads
    Small(usize),
    /// Run of whole pages
    Normal,
    /// Larger than a chunk, served unpooled
    Huge,
}

/// Round a requested capacity up to the size actually carved out
pub fn normalize(req: usize, chunk_size: usize) -> usize {
    if req >= chunk_size {
        return req;
    }
    if req >= TINY_LIMIT {
        return req.next_power_of_two();
    }
    if req % MIN_ELEMENT_SIZE == 0 {
        req
    } else {
        (req & !(MIN_ELEMENT_SIZE - 1)) + MIN_ELEMENT_SIZE
    }
}

/// Classify an already normalized size
pub fn classify(norm: usize, page_size: usize, chunk_size: usize) -> SizeClass {
    if norm > chunk_size {
        SizeClass::Huge
    } else if norm >= page_size {
        SizeClass::Normal
    } else if norm < TINY_LIMIT {
        SizeClass::Tiny(norm / MIN_ELEMENT_SIZE)
    } else {
        // 512 -> 0, 1024 -> 1, ...
        SizeClass::Small((norm.trailing_zeros() - TINY_LIMIT.trailing_zeros()) as usize)
    }
}

/// Number of small classes for a page size (512 up to page_size / 2)
pub fn num_small_classes(page_size: usize) -> usize {
    (page_size.trailing_zeros() - TINY_LIMIT.trailing_zeros()) as usize
}
