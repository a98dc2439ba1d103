//! Derived buffer views
//!
//! Duplicates and slices share the parent's lease and reference count but
//! keep their own cursors. They never copy bytes and cannot resize.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

use super::buffer::BufCore;
use crate::error::{PoolError, Result};

/// A retained view over a [`super::PooledBuf`]'s memory
pub struct DerivedBuf {
    core: Arc<BufCore>,
    /// Start of the view within the parent
    adjustment: usize,
    /// Fixed length for slices; duplicates follow the parent's capacity
    length: Option<usize>,
    reader_index: usize,
    writer_index: usize,
}

impl DerivedBuf {
    /// The caller has already retained `core` for this view
    pub(crate) fn duplicate(core: Arc<BufCore>, reader_index: usize, writer_index: usize) -> Self {
        Self {
            core,
            adjustment: 0,
            length: None,
            reader_index,
            writer_index,
        }
    }

    /// The caller has already retained `core` for this view
    pub(crate) fn slice(core: Arc<BufCore>, index: usize, length: usize) -> Self {
        Self {
            core,
            adjustment: index,
            length: Some(length),
            reader_index: 0,
            writer_index: length,
        }
    }

    pub fn capacity(&self) -> usize {
        match self.length {
            Some(length) => length,
            None => self.core.capacity(),
        }
    }

    pub fn reader_index(&self) -> usize {
        self.reader_index
    }

    pub fn writer_index(&self) -> usize {
        self.writer_index
    }

    pub fn readable_bytes(&self) -> usize {
        self.writer_index - self.reader_index
    }

    /// Set both cursors; requires `reader <= writer <= capacity`
    pub fn set_index(&mut self, reader_index: usize, writer_index: usize) -> Result<()> {
        let capacity = self.capacity();
        if reader_index > writer_index || writer_index > capacity {
            return Err(PoolError::IndexOutOfBounds {
                index: reader_index,
                length: writer_index.saturating_sub(reader_index),
                capacity,
            });
        }
        self.reader_index = reader_index;
        self.writer_index = writer_index;
        Ok(())
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

    pub fn get_bytes(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        self.check_range(index, dst.len())?;
        self.core
            .state
            .lock()
            .get_bytes(self.adjustment + index, dst)
    }

    pub fn set_bytes(&mut self, index: usize, src: &[u8]) -> Result<()> {
        self.check_range(index, src.len())?;
        self.core
            .state
            .lock()
            .set_bytes(self.adjustment + index, src)
    }

    pub fn read_bytes(&mut self, dst: &mut [u8]) -> Result<()> {
        if dst.len() > self.readable_bytes() {
            return Err(PoolError::IndexOutOfBounds {
                index: self.reader_index,
                length: dst.len(),
                capacity: self.writer_index,
            });
        }
        self.get_bytes(self.reader_index, dst)?;
        self.reader_index += dst.len();
        Ok(())
    }

    /// Append within the current capacity; views never grow
    pub fn write_bytes(&mut self, src: &[u8]) -> Result<()> {
        let writer_index = self.writer_index;
        self.set_bytes(writer_index, src)?;
        self.writer_index += src.len();
        Ok(())
    }

    /// Copy of the readable region
    pub fn copy_readable(&self) -> Result<Bytes> {
        let mut out = vec![0u8; self.readable_bytes()];
        self.get_bytes(self.reader_index, &mut out)?;
        Ok(Bytes::from(out))
    }

    pub fn ref_cnt(&self) -> usize {
        self.core.ref_cnt()
    }

    /// Another view with the same window and cursors
    pub fn retained_duplicate(&self) -> DerivedBuf {
        self.core.retain();
        Self {
            core: Arc::clone(&self.core),
            adjustment: self.adjustment,
            length: self.length,
            reader_index: self.reader_index,
            writer_index: self.writer_index,
        }
    }

    /// A narrower view relative to this one
    pub fn retained_slice(&self, index: usize, length: usize) -> Result<DerivedBuf> {
        self.check_range(index, length)?;
        self.core.retain();
        Ok(Self::slice(
            Arc::clone(&self.core),
            self.adjustment + index,
            length,
        ))
    }
}

impl Drop for DerivedBuf {
    fn drop(&mut self) {
        self.core.release();
    }
}

impl fmt::Debug for DerivedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedBuf")
            .field("adjustment", &self.adjustment)
            .field("ridx", &self.reader_index)
            .field("widx", &self.writer_index)
            .field("cap", &self.capacity())
            .finish()
    }
}
