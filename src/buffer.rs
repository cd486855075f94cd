//! # Buffer
//!
//! Fixed capacity send buffer with exact fill/free accounting.
//!
//! The region always holds a null byte right after the last committed fragment, so
//! `fill + free == capacity` and an append needs `len < free`.

use crate::error::{Error, Result};
use crate::format::SendFormat;

/// Smallest send buffer a destination accepts
pub const MIN_CAPACITY: usize = 1024;

/// Used when no buffer size is configured
pub const DEFAULT_CAPACITY: usize = 4096;

pub struct SendBuffer {
    region: Box<[u8]>,
    fill: usize,
    free: usize,
    format: SendFormat,
}

impl SendBuffer {
    pub fn new(capacity: usize, format: SendFormat) -> Self {
        let mut buffer = Self {
            region: vec![0; capacity].into_boxed_slice(),
            fill: 0,
            free: capacity,
            format,
        };
        buffer.initialize();
        buffer
    }

    /// Clears the region and resets the counters
    ///
    /// JSON needs no preamble: the leading comma of the first fragment holds the
    /// place of the opening bracket.
    pub fn initialize(&mut self) {
        self.region.fill(0);
        self.fill = 0;
        self.free = self.region.len();
    }

    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    pub fn fill(&self) -> usize {
        self.fill
    }

    pub fn free(&self) -> usize {
        self.free
    }

    /// True when nothing but the (not yet written) framing is in the buffer
    pub fn is_empty(&self) -> bool {
        self.fill <= self.format.empty_fill()
    }

    /// Committed content, without the terminating null byte
    pub fn as_bytes(&self) -> &[u8] {
        &self.region[..self.fill]
    }

    /// Copies `fragment` and its terminator behind the committed content
    ///
    /// Leaves the buffer untouched when `fragment` does not fit. JSON buffers keep
    /// [SendFormat::trailer_len] bytes in reserve for [SendBuffer::finalize].
    pub fn try_append(&mut self, fragment: &[u8]) -> Result<()> {
        let writable = self.free.saturating_sub(self.format.trailer_len());
        if fragment.len() >= writable {
            return Err(Error::InsufficientSpace {
                needed: fragment.len(),
                free: self.free,
            });
        }

        let end = self.fill + fragment.len();
        self.region[self.fill..end].copy_from_slice(fragment);
        self.region[end] = 0;
        self.fill = end;
        self.free -= fragment.len();
        Ok(())
    }

    /// Closes the JSON array: the leading comma becomes `[` and `]` is appended
    ///
    /// PUT buffers need no trailer.
    pub fn finalize(&mut self) -> Result<()> {
        if self.format == SendFormat::Put {
            return Ok(());
        }
        if self.free < 2 {
            return Err(Error::InsufficientSpace {
                needed: 2,
                free: self.free,
            });
        }
        if self.region[0] != b',' {
            return Err(Error::MalformedBuffer);
        }

        self.region[0] = b'[';
        self.region[self.fill] = b']';
        self.region[self.fill + 1] = 0;
        self.fill += 1;
        self.free -= 1;
        Ok(())
    }
}
