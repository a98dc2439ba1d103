//! Pool error types

use thiserror::Error;

/// Errors surfaced to buffer and arena callers
///
/// Running out of slots inside a single subpage is not an error; it is
/// reported as `None` so the arena can move on to another page.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Requested capacity is above the buffer's ceiling
    #[error("capacity {requested} exceeds maximum capacity {max}")]
    CapacityExceeded { requested: usize, max: usize },

    /// Byte access outside the buffer's current bounds
    #[error("index {index} with length {length} out of bounds for capacity {capacity}")]
    IndexOutOfBounds {
        index: usize,
        length: usize,
        capacity: usize,
    },

    /// The arena reached its chunk limit and cannot carve another region
    #[error("arena exhausted: {chunks} chunks of {chunk_size} bytes in use")]
    Exhausted { chunks: usize, chunk_size: usize },

    /// A private unpooled allocation could not be satisfied
    #[error("failed to allocate {0} bytes of unpooled memory")]
    OutOfMemory(usize),
}

pub type Result<T> = std::result::Result<T, PoolError>;
