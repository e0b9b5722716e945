//! MMDB Search Tree Traversal
//!
//! Implements binary search tree traversal for IP address lookups.
//! The tree uses a compact binary representation where each node contains
//! two records (left and right) that point to either:
//! - Another node (continue traversal)
//! - A data section offset (found)
//! - A "not found" marker (the record equals `node_count`)

use super::types::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE, IPV4_SUBTREE_DEPTH};
use crate::error::{DecodeError, LookupError};
use crate::source::ByteSource;
use std::net::IpAddr;

/// Where a tree walk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeHit {
    /// Offset into the data section (relative to data section start)
    pub data_offset: usize,
    /// Number of address bits consumed, in the queried address family
    pub prefix_len: u8,
}

/// Search tree for IP address lookups
#[derive(Debug, Clone, Copy)]
pub struct SearchTree<'a> {
    tree: ByteSource<'a>,
    node_count: u32,
    record_size: RecordSize,
    ip_version: IpVersion,
    data_section_len: usize,
    /// Record reached by following 96 zero bits; IPv4 queries start here
    ipv4_root: u32,
}

impl<'a> SearchTree<'a> {
    /// Create a search tree over `tree` (exactly `node_count` nodes)
    ///
    /// For IPv6 trees the IPv4 start record is found here, once.
    pub fn new(
        tree: &'a [u8],
        node_count: u32,
        record_size: RecordSize,
        ip_version: IpVersion,
        data_section_len: usize,
    ) -> Result<Self, DecodeError> {
        let expected = node_count as usize * record_size.node_bytes();
        if tree.len() != expected {
            return Err(DecodeError::CorruptTree(format!(
                "tree is {} bytes, {} nodes of {} bits need {}",
                tree.len(),
                node_count,
                record_size.bits(),
                expected
            )));
        }

        let mut search_tree =
            Self::from_parts(tree, node_count, record_size, ip_version, data_section_len, 0);
        if ip_version == IpVersion::V6 {
            search_tree.ipv4_root = search_tree.find_ipv4_root()?;
        }
        Ok(search_tree)
    }

    /// Rebuild a tree whose geometry was validated by [`SearchTree::new`]
    pub(crate) fn from_parts(
        tree: &'a [u8],
        node_count: u32,
        record_size: RecordSize,
        ip_version: IpVersion,
        data_section_len: usize,
        ipv4_root: u32,
    ) -> Self {
        Self {
            tree: ByteSource::new(tree),
            node_count,
            record_size,
            ip_version,
            data_section_len,
            ipv4_root,
        }
    }

    /// Number of nodes
    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    /// Record width
    pub fn record_size(&self) -> RecordSize {
        self.record_size
    }

    /// Address family of the tree
    pub fn ip_version(&self) -> IpVersion {
        self.ip_version
    }

    /// Record value IPv4 lookups start from
    pub fn ipv4_root(&self) -> u32 {
        self.ipv4_root
    }

    /// Data-section offset for `ip`, or `None` on a valid miss
    pub fn resolve(&self, ip: IpAddr) -> Result<Option<usize>, LookupError> {
        Ok(self.locate(ip)?.map(|hit| hit.data_offset))
    }

    /// Walk the tree for `ip`, reporting the data offset and prefix length
    pub fn locate(&self, ip: IpAddr) -> Result<Option<TreeHit>, LookupError> {
        let (start, bits, bit_count) = match (ip, self.ip_version) {
            (IpAddr::V6(addr), IpVersion::V4) => {
                return Err(LookupError::Ipv6LookupInIpv4Database(addr));
            }
            (IpAddr::V4(addr), IpVersion::V4) => (0, u32::from(addr) as u128, 32),
            (IpAddr::V4(addr), IpVersion::V6) => (self.ipv4_root, u32::from(addr) as u128, 32),
            (IpAddr::V6(addr), IpVersion::V6) => (0, u128::from(addr), 128),
        };
        Ok(self.walk(start, bits, bit_count)?)
    }

    /// Follow `bits` (MSB first) from `record`
    fn walk(&self, mut record: u32, bits: u128, bit_count: u8) -> Result<Option<TreeHit>, DecodeError> {
        let mut depth = 0u8;
        loop {
            if record == self.node_count {
                return Ok(None);
            }
            if record > self.node_count {
                return Ok(Some(TreeHit {
                    data_offset: self.data_offset(record)?,
                    prefix_len: depth,
                }));
            }
            if depth == bit_count {
                return Err(DecodeError::CorruptTree(format!(
                    "walk consumed all {} address bits without reaching data or a miss",
                    bit_count
                )));
            }
            let bit = ((bits >> (bit_count - 1 - depth)) & 1) as u8;
            record = self.read_record(record, bit)?;
            depth += 1;
        }
    }

    /// Read a record from a node
    ///
    /// Each node contains two records. `side` determines which:
    /// - 0 = left record (for IP bit 0)
    /// - 1 = right record (for IP bit 1)
    pub fn read_record(&self, node: u32, side: u8) -> Result<u32, DecodeError> {
        if node >= self.node_count {
            return Err(DecodeError::CorruptTree(format!(
                "node index {} exceeds node count {}",
                node, self.node_count
            )));
        }

        let node_offset = node as usize * self.record_size.node_bytes();
        let record = match self.record_size {
            RecordSize::Bits24 => self.tree.read_be_uint(node_offset + side as usize * 3, 3)?,
            RecordSize::Bits28 => {
                // Layout: [left 24 bits][middle 8 bits][right 24 bits]
                // Middle byte holds the 4 high bits of left, then of right
                let middle = self.tree.read_u8(node_offset + 3)? as u128;
                if side == 0 {
                    let low = self.tree.read_be_uint(node_offset, 3)?;
                    ((middle >> 4) << 24) | low
                } else {
                    let low = self.tree.read_be_uint(node_offset + 4, 3)?;
                    ((middle & 0x0F) << 24) | low
                }
            }
            RecordSize::Bits32 => self.tree.read_be_uint(node_offset + side as usize * 4, 4)?,
        };
        Ok(record as u32)
    }

    /// Calculate data section offset from record value
    ///
    /// data_offset = (record - node_count) - 16, where 16 is the separator
    pub fn data_offset(&self, record: u32) -> Result<usize, DecodeError> {
        let offset = (record as usize)
            .checked_sub(self.node_count as usize + DATA_SECTION_SEPARATOR_SIZE)
            .ok_or_else(|| {
                DecodeError::CorruptTree(format!(
                    "record {} points into the data section separator (node_count = {})",
                    record, self.node_count
                ))
            })?;
        if offset >= self.data_section_len {
            return Err(DecodeError::CorruptTree(format!(
                "record {} points past the end of the {}-byte data section",
                record, self.data_section_len
            )));
        }
        Ok(offset)
    }

    /// Follow 96 zero bits from the root. Stops early at a miss or a data
    /// record; every IPv4 query then ends there with prefix 0.
    fn find_ipv4_root(&self) -> Result<u32, DecodeError> {
        let mut record = 0u32;
        for _ in 0..IPV4_SUBTREE_DEPTH {
            if record >= self.node_count {
                break;
            }
            record = self.read_record(record, 0)?;
        }
        Ok(record)
    }
}
