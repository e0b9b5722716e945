//! Bounds-checked view over database bytes
//!
//! Every read the tree walker and the data decoder make goes through
//! [`ByteSource`], so a truncated or hostile file produces
//! [`DecodeError::Truncated`] instead of a panic.

use crate::error::DecodeError;

/// Immutable, bounds-checked view over a byte buffer
#[derive(Debug, Clone, Copy)]
pub struct ByteSource<'a> {
    bytes: &'a [u8],
}

impl<'a> ByteSource<'a> {
    /// Wrap a byte slice
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Number of bytes in the view
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if the view is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Read one byte
    pub fn read_u8(&self, offset: usize) -> Result<u8, DecodeError> {
        self.bytes
            .get(offset)
            .copied()
            .ok_or_else(|| self.truncated(offset, 1))
    }

    /// Borrow `len` bytes starting at `offset`
    pub fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| self.truncated(offset, len))?;
        self.bytes
            .get(offset..end)
            .ok_or_else(|| self.truncated(offset, len))
    }

    /// Read up to 16 bytes as a big-endian unsigned integer, zero-extended
    pub fn read_be_uint(&self, offset: usize, len: usize) -> Result<u128, DecodeError> {
        debug_assert!(len <= 16);
        let bytes = self.slice(offset, len)?;
        Ok(bytes.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128))
    }

    fn truncated(&self, offset: usize, needed: usize) -> DecodeError {
        DecodeError::Truncated {
            offset,
            needed,
            available: self.bytes.len(),
        }
    }
}
