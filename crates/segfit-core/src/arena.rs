//! The managed heap region.
//!
//! The allocator never touches native memory: the heap is one owned,
//! contiguous, monotonically growing byte buffer, and every "pointer" handed
//! out or stored in block metadata is an offset into this buffer. The only
//! growth primitive is [`Arena::sbrk`], which appends bytes and reports the
//! previous end of the region, mirroring the classic `sbrk` contract. The
//! region never shrinks.

use thiserror::Error;

/// Default ceiling for heap growth (bytes).
pub const DEFAULT_HEAP_LIMIT: usize = 20 * 1024 * 1024;

/// Failure surfaced by the heap-growth primitive.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// The region cannot be extended past its configured limit.
    #[error("heap exhausted: {current} bytes in use, {requested} more requested, limit {limit}")]
    Exhausted {
        /// Current region size in bytes.
        current: usize,
        /// Size of the refused growth request in bytes.
        requested: usize,
        /// Configured growth ceiling in bytes.
        limit: usize,
    },
}

/// Growable, contiguous byte region owned by the allocator.
pub struct Arena {
    bytes: Vec<u8>,
    limit: usize,
}

impl Arena {
    /// Creates an empty arena with the default growth limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_HEAP_LIMIT)
    }

    /// Creates an empty arena that refuses to grow past `limit` bytes.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
        }
    }

    /// Current size of the region in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the region is still empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Configured growth ceiling in bytes.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Extends the region by `incr` bytes and returns the offset of the
    /// start of the newly appended bytes (the old region size).
    ///
    /// Fails without mutating anything when the extension would exceed the
    /// configured limit. New bytes are not guaranteed to hold any particular
    /// value by contract; callers must format them before use.
    pub fn sbrk(&mut self, incr: usize) -> Result<usize, HeapError> {
        let old = self.bytes.len();
        let grown = old.checked_add(incr).filter(|&n| n <= self.limit);
        let Some(new_len) = grown else {
            return Err(HeapError::Exhausted {
                current: old,
                requested: incr,
                limit: self.limit,
            });
        };
        self.bytes.resize(new_len, 0);
        Ok(old)
    }

    /// Discards all contents, returning the region to its empty state.
    /// The growth limit is retained.
    pub fn reset(&mut self) {
        self.bytes.clear();
    }

    /// Reads the little-endian word at byte offset `at`.
    #[must_use]
    pub fn read_word(&self, at: usize) -> u32 {
        let b = &self.bytes[at..at + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Writes the little-endian word at byte offset `at`.
    pub fn write_word(&mut self, at: usize, word: u32) {
        self.bytes[at..at + 4].copy_from_slice(&word.to_le_bytes());
    }

    /// Borrows `len` bytes starting at `start`.
    #[must_use]
    pub fn slice(&self, start: usize, len: usize) -> &[u8] {
        &self.bytes[start..start + len]
    }

    /// Mutably borrows `len` bytes starting at `start`.
    pub fn slice_mut(&mut self, start: usize, len: usize) -> &mut [u8] {
        &mut self.bytes[start..start + len]
    }

    /// Copies `len` bytes from offset `src` to offset `dst` within the
    /// region. The ranges may overlap.
    pub fn copy_within(&mut self, src: usize, dst: usize, len: usize) {
        self.bytes.copy_within(src..src + len, dst);
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}
