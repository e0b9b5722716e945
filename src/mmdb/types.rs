//! MMDB Format Constants and Geometry Types
//!
//! Constants fixed by the MaxMind DB format plus the two small enums that
//! describe the search tree geometry.

use crate::error::OpenError;
use serde::Serialize;
use std::fmt;

/// MMDB metadata marker: "\xAB\xCD\xEFMaxMind.com"
pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// Size of the all-zero separator between the search tree and the data section
pub const DATA_SECTION_SEPARATOR_SIZE: usize = 16;

/// Metadata lives in the last 128KB of a file
pub const METADATA_SEARCH_WINDOW: usize = 128 * 1024;

/// Only major version 2 of the binary format exists
pub const SUPPORTED_FORMAT_MAJOR: u16 = 2;

/// Default cap on pointer -> pointer -> ... chains
pub const DEFAULT_MAX_POINTER_DEPTH: usize = 16;

/// Cap on map/array nesting while decoding
pub const MAX_NESTING_DEPTH: usize = 512;

/// Default cap on values produced by one decode. Shared children behind
/// pointers are decoded once per reference, so a small data section can
/// describe an exponentially large record.
pub const DEFAULT_MAX_DECODED_VALUES: usize = 1 << 18;

/// Number of leading zero bits that lead to the IPv4 subtree of an IPv6 tree
pub const IPV4_SUBTREE_DEPTH: u8 = 96;

/// IP version of the search tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IpVersion {
    /// IPv4 only
    V4,
    /// IPv6 (IPv4 addresses live under ::/96)
    V6,
}

impl IpVersion {
    /// Number of address bits a full walk of this tree consumes
    pub fn bit_count(self) -> u8 {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }

    pub(crate) fn from_metadata(value: u64) -> Result<Self, OpenError> {
        match value {
            4 => Ok(IpVersion::V4),
            6 => Ok(IpVersion::V6),
            other => Err(OpenError::InvalidIpVersion(other)),
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => f.write_str("IPv4"),
            IpVersion::V6 => f.write_str("IPv6"),
        }
    }
}

/// Record size in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordSize {
    /// 24-bit records (3 bytes per record, 6 bytes per node)
    Bits24 = 24,
    /// 28-bit records (3.5 bytes per record, 7 bytes per node)
    Bits28 = 28,
    /// 32-bit records (4 bytes per record, 8 bytes per node)
    Bits32 = 32,
}

impl RecordSize {
    /// Get the size of a node (2 records) in bytes
    pub fn node_bytes(self) -> usize {
        match self {
            RecordSize::Bits24 => 6,
            RecordSize::Bits28 => 7,
            RecordSize::Bits32 => 8,
        }
    }

    /// Record width in bits
    pub fn bits(self) -> u16 {
        self as u16
    }

    /// Create from bit size
    pub fn from_bits(bits: u64) -> Result<Self, OpenError> {
        match bits {
            24 => Ok(RecordSize::Bits24),
            28 => Ok(RecordSize::Bits28),
            32 => Ok(RecordSize::Bits32),
            _ => Err(OpenError::InvalidRecordSize(bits)),
        }
    }
}
