//! Database verification
//!
//! Lookups only ever touch the nodes and records on one path, so a damaged
//! file can serve most queries and fail on a few. [`verify`] checks the whole
//! file up front:
//!
//! - every reachable tree node, with cycle detection
//! - tree height against the address width
//! - data pointers landing inside the data section
//! - the 16-byte zero separator
//! - every distinct data record decoding cleanly
//!
//! Subtrees may be shared (IPv4-mapped ranges alias the IPv4 subtree), so a
//! node reached twice is not an error; only a node reached from inside its
//! own subtree is.
//!
//! # Usage
//!
//! ```rust,no_run
//! use mmdb_engine::Database;
//!
//! let db = Database::open("GeoLite2-City.mmdb")?;
//! let report = db.verify();
//!
//! if report.is_valid() {
//!     println!("✓ {}", report.stats.summary());
//! } else {
//!     for error in &report.errors {
//!         println!("  - {}", error);
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::database::Database;
use crate::mmdb::tree::SearchTree;
use crate::mmdb::types::DATA_SECTION_SEPARATOR_SIZE;
use std::collections::BTreeSet;
use tracing::debug;

/// Verification findings
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// Problems that make lookups or decoding fail
    pub errors: Vec<String>,
    /// Oddities that do not break lookups
    pub warnings: Vec<String>,
    /// Informational messages about database properties
    pub info: Vec<String>,
    /// Database statistics
    pub stats: ValidationStats,
}

/// Statistics gathered during verification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationStats {
    /// File size in bytes
    pub file_size: usize,
    /// Nodes declared in the metadata
    pub node_count: u32,
    /// Nodes reachable from the root
    pub reachable_nodes: u32,
    /// Longest root-to-record path, in nodes
    pub tree_height: u32,
    /// Distinct data records referenced by the tree
    pub data_records: usize,
    /// Data section size in bytes
    pub data_section_size: usize,
}

impl ValidationReport {
    fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            info: Vec::new(),
            stats: ValidationStats::default(),
        }
    }

    /// True when no errors were found
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    fn info(&mut self, msg: impl Into<String>) {
        self.info.push(msg.into());
    }
}

impl ValidationStats {
    /// Human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Nodes: {} ({} reachable), Height: {}, Records: {}, Data: {} KB, Size: {} KB",
            self.node_count,
            self.reachable_nodes,
            self.tree_height,
            self.data_records,
            self.data_section_size / 1024,
            self.file_size / 1024
        )
    }
}

/// Verify an open database
///
/// Never panics and never stops at the first problem; the report lists
/// everything found.
pub fn verify(db: &Database) -> ValidationReport {
    let mut report = ValidationReport::new();
    let metadata = db.metadata();

    report.stats.file_size = db.as_bytes().len();
    report.stats.node_count = metadata.node_count;
    report.stats.data_section_size = db.data_section().len();
    report.info(format!(
        "{} database, {}, {}-bit records, format {}.{}",
        metadata.database_type,
        metadata.ip_version,
        metadata.record_size.bits(),
        metadata.binary_format_major_version,
        metadata.binary_format_minor_version
    ));

    check_separator(db, &mut report);
    let records = check_tree(&db.search_tree(), &mut report);
    check_records(db, &records, &mut report);

    debug!(
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        reachable_nodes = report.stats.reachable_nodes,
        data_records = report.stats.data_records,
        "verified database"
    );
    report
}

fn check_separator(db: &Database, report: &mut ValidationReport) {
    let start = db.metadata().tree_size();
    let separator = &db.as_bytes()[start..start + DATA_SECTION_SEPARATOR_SIZE];
    if let Some(pos) = separator.iter().position(|&b| b != 0) {
        report.error(format!(
            "Data section separator has non-zero byte at offset {}",
            start + pos
        ));
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Unvisited,
    OnPath,
    Done,
}

enum Visit {
    Enter(u32),
    Exit(u32),
}

/// Walk every reachable node; returns the data offsets the tree points at
fn check_tree(tree: &SearchTree<'_>, report: &mut ValidationReport) -> BTreeSet<usize> {
    let node_count = tree.node_count();
    let mut records = BTreeSet::new();
    if node_count == 0 {
        report.warning("Search tree is empty");
        return records;
    }

    let mut state = vec![NodeState::Unvisited; node_count as usize];
    let mut height = vec![0u32; node_count as usize];
    let mut cycles = 0usize;
    let mut bad_records = BTreeSet::new();
    let mut stack = vec![Visit::Enter(0)];

    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Enter(node) => match state[node as usize] {
                NodeState::Done => {}
                NodeState::OnPath => {
                    cycles += 1;
                    if cycles == 1 {
                        report.error(format!(
                            "Tree cycle detected at node {}: lookups would never terminate",
                            node
                        ));
                    }
                }
                NodeState::Unvisited => {
                    state[node as usize] = NodeState::OnPath;
                    stack.push(Visit::Exit(node));
                    for side in [1u8, 0] {
                        let record = match tree.read_record(node, side) {
                            Ok(record) => record,
                            Err(e) => {
                                report.error(format!("Node {}: {}", node, e));
                                continue;
                            }
                        };
                        if record < node_count {
                            stack.push(Visit::Enter(record));
                        } else if record > node_count {
                            match tree.data_offset(record) {
                                Ok(offset) => {
                                    records.insert(offset);
                                }
                                Err(e) => {
                                    if bad_records.insert(record) {
                                        report.error(format!("Node {}: {}", node, e));
                                    }
                                }
                            }
                        }
                    }
                }
            },
            Visit::Exit(node) => {
                let mut tallest = 0;
                for side in [0u8, 1] {
                    if let Ok(record) = tree.read_record(node, side) {
                        if record < node_count {
                            tallest = tallest.max(height[record as usize]);
                        }
                    }
                }
                height[node as usize] = tallest + 1;
                state[node as usize] = NodeState::Done;
            }
        }
    }

    if cycles > 1 {
        report.error(format!("{} tree cycles detected in total", cycles));
    }

    let reachable = state.iter().filter(|&&s| s == NodeState::Done).count() as u32;
    report.stats.reachable_nodes = reachable;
    report.stats.tree_height = height[0];

    let bit_count = tree.ip_version().bit_count() as u32;
    if cycles == 0 && height[0] > bit_count {
        report.error(format!(
            "Tree height {} exceeds the {} address bits; some lookups run out of bits",
            height[0], bit_count
        ));
    }

    let orphaned = node_count - reachable;
    if orphaned > 0 {
        report.warning(format!(
            "Found {} orphaned nodes (exist in tree but unreachable from root)",
            orphaned
        ));
    }

    report.info(format!(
        "IP tree traversal: {} nodes visited out of {} total ({}% coverage)",
        reachable,
        node_count,
        (reachable as u64 * 100) / node_count as u64
    ));
    records
}

fn check_records(db: &Database, records: &BTreeSet<usize>, report: &mut ValidationReport) {
    let decoder = db.decoder();
    let mut failures = 0usize;
    for &offset in records {
        if let Err(e) = decoder.decode_at(offset) {
            failures += 1;
            report.error(format!("Data record at offset {}: {}", offset, e));
        }
    }
    report.stats.data_records = records.len();

    if records.is_empty() && report.stats.reachable_nodes > 0 {
        report.warning("Search tree references no data records");
    }
    report.info(format!(
        "Decoded {} data records ({} failed)",
        records.len(),
        failures
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmdb::types::METADATA_MARKER;

    fn record24(n: u32) -> [u8; 3] {
        let b = n.to_be_bytes();
        [b[1], b[2], b[3]]
    }

    /// IPv4, 24-bit database from raw `(left, right)` node records
    fn image(nodes: &[(u32, u32)], separator: [u8; 16], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for &(left, right) in nodes {
            out.extend_from_slice(&record24(left));
            out.extend_from_slice(&record24(right));
        }
        out.extend_from_slice(&separator);
        out.extend_from_slice(data);
        out.extend_from_slice(METADATA_MARKER);

        let node_count = nodes.len() as u32;
        let fields: [(&str, Vec<u8>); 7] = [
            ("node_count", [&[0xC4][..], &node_count.to_be_bytes()].concat()),
            ("record_size", vec![0xA1, 24]),
            ("ip_version", vec![0xA1, 4]),
            ("binary_format_major_version", vec![0xA1, 2]),
            ("binary_format_minor_version", vec![0xA0]),
            ("build_epoch", vec![0x01, 0x02, 0x00]),
            ("database_type", [&[0x44][..], b"Test"].concat()),
        ];
        out.push(0xE0 | fields.len() as u8);
        for (key, value) in fields {
            out.push(0x40 | key.len() as u8);
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(&value);
        }
        out
    }

    fn verify_image(bytes: Vec<u8>) -> ValidationReport {
        Database::from_bytes(bytes).unwrap().verify()
    }

    const RECORD: &[u8] = &[0xE1, 0x41, b'a', 0x42, b'h', b'i'];

    #[test]
    fn test_valid_database() {
        // node 0: left -> data 0, right -> miss
        let report = verify_image(image(&[(17, 1)], [0; 16], RECORD));
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(report.stats.reachable_nodes, 1);
        assert_eq!(report.stats.data_records, 1);
        assert_eq!(report.stats.tree_height, 1);
        assert!(report.stats.summary().contains("Records: 1"));
    }

    #[test]
    fn test_shared_subtree_is_not_a_cycle() {
        // 0 -> (2, 1); 1 -> (2, miss); 2 -> (data, miss)
        let data = 3 + 16;
        let report = verify_image(image(&[(2, 1), (2, 3), (data, 3)], [0; 16], RECORD));
        assert!(report.is_valid(), "{:?}", report.errors);
        assert_eq!(report.stats.reachable_nodes, 3);
        assert_eq!(report.stats.tree_height, 3);
        assert_eq!(report.stats.data_records, 1);
    }

    #[test]
    fn test_cycle_detected() {
        // 0 -> 1 -> 0
        let report = verify_image(image(&[(1, 2), (0, 2)], [0; 16], RECORD));
        assert!(!report.is_valid());
        assert!(report.errors.iter().any(|e| e.contains("cycle")));
    }

    #[test]
    fn test_tree_taller_than_address() {
        // 33 nodes in a chain, the last one holding the data
        let count = 33u32;
        let mut nodes: Vec<(u32, u32)> = (1..count).map(|next| (next, count)).collect();
        nodes.push((count + 16, count));
        let report = verify_image(image(&nodes, [0; 16], RECORD));
        assert!(report.errors.iter().any(|e| e.contains("height 33")));
    }

    #[test]
    fn test_orphaned_nodes_warn() {
        let report = verify_image(image(&[(18, 2), (2, 2)], [0; 16], RECORD));
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report.warnings.iter().any(|w| w.contains("1 orphaned")));
    }

    #[test]
    fn test_nonzero_separator() {
        let mut separator = [0u8; 16];
        separator[5] = 0xFF;
        let report = verify_image(image(&[(17, 1)], separator, RECORD));
        assert!(report.errors.iter().any(|e| e.contains("separator")));
    }

    #[test]
    fn test_record_pointing_into_separator() {
        let report = verify_image(image(&[(5, 1)], [0; 16], RECORD));
        assert!(report.errors.iter().any(|e| e.contains("separator")));
        assert_eq!(report.stats.data_records, 0);
    }

    #[test]
    fn test_undecodable_record_reported() {
        // map with a key whose value runs off the end
        let data = [0xE1, 0x41, b'a', 0x45, b'h'];
        let report = verify_image(image(&[(17, 1)], [0; 16], &data));
        assert!(!report.is_valid());
        assert!(report
            .errors
            .iter()
            .any(|e| e.starts_with("Data record at offset 0")));
    }

    #[test]
    fn test_exponential_record_reported() {
        // Level k is [-> level k-1, -> level k-1]; 40 levels is 2^41 - 1 values
        let mut data = vec![0x41, b'x'];
        let mut below = 0u32;
        for _ in 0..40 {
            let here = data.len() as u32;
            data.extend_from_slice(&[0x02, 0x04]);
            for _ in 0..2 {
                data.push(0x20 | (below >> 8) as u8);
                data.push(below as u8);
            }
            below = here;
        }
        let report = verify_image(image(&[(17 + below, 1)], [0; 16], &data));
        assert!(!report.is_valid());
        let expected = format!("Data record at offset {}", below);
        let error = report.errors.iter().find(|e| e.starts_with(&expected));
        assert!(
            error.is_some_and(|e| e.contains("values")),
            "{:?}",
            report.errors
        );
    }

    #[test]
    fn test_reports_every_problem() {
        let mut separator = [0u8; 16];
        separator[0] = 1;
        let data = [0x45, b'h'];
        let report = verify_image(image(&[(18, 2), (2, 2)], separator, &data));
        assert!(report.errors.len() >= 2, "{:?}", report.errors);
        assert!(!report.warnings.is_empty());
    }
}
