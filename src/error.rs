//! Error types for the mmdb engine
//!
//! Three tiers:
//! - [`OpenError`]: the database itself is unusable (raised by `open`)
//! - [`DecodeError`]: one lookup or decode hit corrupt bytes
//! - [`LookupError`]: what a lookup surfaces to its caller, separating a bad
//!   query from a damaged database
use crate::data_section::DataType;
use std::fmt;
use std::net::Ipv6Addr;

/// Corruption found while reading the tree or the data section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A read ran past the end of the section
    Truncated {
        /// Offset the read started at
        offset: usize,
        /// Bytes the read needed
        needed: usize,
        /// Bytes available in the section
        available: usize,
    },
    /// String payload is not valid UTF-8
    InvalidUtf8 {
        /// Offset of the payload
        offset: usize,
    },
    /// Declared size is impossible for the type
    InvalidSize {
        /// Type being decoded
        data_type: DataType,
        /// Declared size
        size: usize,
        /// Offset of the control byte
        offset: usize,
    },
    /// Map key decoded to something other than a string
    InvalidMapKey {
        /// Offset of the key
        offset: usize,
        /// Type found instead
        found: DataType,
    },
    /// Pointer chain longer than the configured maximum (or cyclic)
    PointerDepthExceeded {
        /// Offset where the chain started
        offset: usize,
        /// Configured maximum
        max_depth: usize,
    },
    /// Maps/arrays nested beyond the structural maximum
    NestingTooDeep {
        /// Offset of the value that crossed the limit
        offset: usize,
        /// Structural maximum
        max_depth: usize,
    },
    /// One decode produced more values than the configured maximum
    TooManyValues {
        /// Offset of the value that crossed the limit
        offset: usize,
        /// Configured maximum
        max_values: usize,
    },
    /// Search tree is malformed
    CorruptTree(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated {
                offset,
                needed,
                available,
            } => write!(
                f,
                "Truncated data: need {} bytes at offset {}, section has {}",
                needed, offset, available
            ),
            DecodeError::InvalidUtf8 { offset } => {
                write!(f, "Invalid UTF-8 in string at offset {}", offset)
            }
            DecodeError::InvalidSize {
                data_type,
                size,
                offset,
            } => write!(
                f,
                "Invalid size {} for {} at offset {}",
                size, data_type, offset
            ),
            DecodeError::InvalidMapKey { offset, found } => {
                write!(f, "Map key at offset {} is {}, expected utf8_string", offset, found)
            }
            DecodeError::PointerDepthExceeded { offset, max_depth } => write!(
                f,
                "Pointer chain starting at offset {} exceeds {} hops",
                offset, max_depth
            ),
            DecodeError::NestingTooDeep { offset, max_depth } => write!(
                f,
                "Value at offset {} nested deeper than {} levels",
                offset, max_depth
            ),
            DecodeError::TooManyValues { offset, max_values } => write!(
                f,
                "Decoding reached offset {} after more than {} values",
                offset, max_values
            ),
            DecodeError::CorruptTree(msg) => write!(f, "Corrupt search tree: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}

/// The database cannot be opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    /// I/O error while reading or mapping a file
    Io(String),
    /// Metadata marker not found in the search window
    MetadataNotFound,
    /// Metadata present but structurally wrong
    InvalidMetadata(String),
    /// binary_format_major_version other than 2
    UnsupportedFormatVersion {
        /// Major version found
        major: u16,
        /// Minor version found
        minor: u16,
    },
    /// record_size outside {24, 28, 32}
    InvalidRecordSize(u64),
    /// ip_version outside {4, 6}
    InvalidIpVersion(u64),
    /// Tree and data section do not fit the buffer
    InvalidLayout(String),
    /// Metadata bytes could not be decoded
    Decode(DecodeError),
}

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenError::Io(msg) => write!(f, "I/O error: {}", msg),
            OpenError::MetadataNotFound => write!(f, "MMDB metadata marker not found"),
            OpenError::InvalidMetadata(msg) => write!(f, "Invalid metadata: {}", msg),
            OpenError::UnsupportedFormatVersion { major, minor } => {
                write!(f, "Unsupported binary format version {}.{}", major, minor)
            }
            OpenError::InvalidRecordSize(bits) => {
                write!(f, "Invalid record size: {} bits", bits)
            }
            OpenError::InvalidIpVersion(v) => write!(f, "Invalid IP version: {}", v),
            OpenError::InvalidLayout(msg) => write!(f, "Invalid database layout: {}", msg),
            OpenError::Decode(err) => write!(f, "Failed to decode metadata: {}", err),
        }
    }
}

impl std::error::Error for OpenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OpenError::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for OpenError {
    fn from(err: std::io::Error) -> Self {
        OpenError::Io(err.to_string())
    }
}

impl From<DecodeError> for OpenError {
    fn from(err: DecodeError) -> Self {
        OpenError::Decode(err)
    }
}

/// A lookup failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The query string is not an IP address
    InvalidAddress(String),
    /// IPv6 query against a database whose tree only covers IPv4
    Ipv6LookupInIpv4Database(Ipv6Addr),
    /// The database is damaged where this lookup went
    Decode(DecodeError),
}

impl LookupError {
    /// True when the failure comes from corrupt database bytes rather than
    /// from the query itself
    pub fn is_corruption(&self) -> bool {
        matches!(self, LookupError::Decode(_))
    }
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupError::InvalidAddress(s) => write!(f, "Invalid IP address: {}", s),
            LookupError::Ipv6LookupInIpv4Database(addr) => {
                write!(f, "Cannot look up IPv6 address {} in an IPv4-only database", addr)
            }
            LookupError::Decode(err) => write!(f, "Lookup failed: {}", err),
        }
    }
}

impl std::error::Error for LookupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LookupError::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DecodeError> for LookupError {
    fn from(err: DecodeError) -> Self {
        LookupError::Decode(err)
    }
}
