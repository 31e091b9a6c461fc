//! Fixed-size chunk planning.
//!
//! Slicing is pure: re-planning the same length and chunk size yields the
//! same boundaries, so an interrupted transfer can be restarted from the
//! same plan.

use std::ops::Range;

use crate::CryptoError;

/// A fixed-size slicing of `total_len` bytes into chunks of `chunk_size`,
/// the last possibly shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total_len: usize,
    chunk_size: usize,
}

impl ChunkPlan {
    pub fn new(total_len: usize, chunk_size: usize) -> Result<Self, CryptoError> {
        if chunk_size == 0 {
            return Err(CryptoError::InvalidChunkSize);
        }
        Ok(ChunkPlan {
            total_len,
            chunk_size,
        })
    }

    /// Number of chunks. Zero-length input yields zero chunks.
    pub fn count(&self) -> u32 {
        (self.total_len.div_ceil(self.chunk_size)) as u32
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Byte range of chunk `index`, or `None` past the end.
    pub fn range(&self, index: u32) -> Option<Range<usize>> {
        let start = (index as usize).checked_mul(self.chunk_size)?;
        if start >= self.total_len {
            return None;
        }
        let end = (start + self.chunk_size).min(self.total_len);
        Some(start..end)
    }

    /// Lazy iterator over all chunk ranges, in index order. Calling this
    /// again restarts from chunk 0.
    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.count()).filter_map(move |i| self.range(i))
    }
}
