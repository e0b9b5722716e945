//! MMDB fixture writer for integration tests
//!
//! Builds complete database images in memory: search tree (24/28/32-bit
//! records, IPv4 or IPv6 with IPv4 at ::/96), data section with string and
//! record deduplication through pointers, and the metadata block.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Once;
use tracing_subscriber::EnvFilter;

pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// Route the crate's warnings to the test output (`RUST_LOG` overrides)
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("mmdb_engine=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_ansi(false)
            .try_init();
    });
}

/// A value to encode
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Double(f64),
    Bytes(Vec<u8>),
    Uint16(u16),
    Uint32(u32),
    Map(Vec<(String, Value)>),
    Int32(i32),
    Uint64(u64),
    Uint128(u128),
    Array(Vec<Value>),
    Bool(bool),
    Float(f32),
}

pub fn s(text: &str) -> Value {
    Value::String(text.to_string())
}

pub fn map(pairs: Vec<(&str, Value)>) -> Value {
    Value::Map(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

/// Data section writer
///
/// Strings of four or more bytes are written once and referenced by pointer
/// afterwards; identical records share one offset.
#[derive(Default)]
pub struct DataWriter {
    buffer: Vec<u8>,
    strings: HashMap<String, u32>,
    records: HashMap<String, u32>,
}

impl DataWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a top-level record and return its offset
    pub fn record(&mut self, value: &Value) -> u32 {
        let key = format!("{:?}", value);
        if let Some(&offset) = self.records.get(&key) {
            return offset;
        }
        let offset = self.buffer.len() as u32;
        self.write(value);
        self.records.insert(key, offset);
        offset
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    fn write(&mut self, value: &Value) {
        match value {
            Value::String(text) => self.write_string(text),
            Value::Double(d) => {
                self.buffer.push(0x68);
                self.buffer.extend_from_slice(&d.to_be_bytes());
            }
            Value::Bytes(bytes) => {
                write_control(&mut self.buffer, 4, bytes.len());
                self.buffer.extend_from_slice(bytes);
            }
            Value::Uint16(n) => write_uint(&mut self.buffer, 5, *n as u128),
            Value::Uint32(n) => write_uint(&mut self.buffer, 6, *n as u128),
            Value::Map(pairs) => {
                write_control(&mut self.buffer, 7, pairs.len());
                for (key, value) in pairs {
                    self.write_string(key);
                    self.write(value);
                }
            }
            Value::Int32(n) => {
                write_control(&mut self.buffer, 8, 4);
                self.buffer.extend_from_slice(&n.to_be_bytes());
            }
            Value::Uint64(n) => write_uint(&mut self.buffer, 9, *n as u128),
            Value::Uint128(n) => write_uint(&mut self.buffer, 10, *n),
            Value::Array(items) => {
                write_control(&mut self.buffer, 11, items.len());
                for item in items {
                    self.write(item);
                }
            }
            Value::Bool(b) => write_control(&mut self.buffer, 14, *b as usize),
            Value::Float(f) => {
                write_control(&mut self.buffer, 15, 4);
                self.buffer.extend_from_slice(&f.to_be_bytes());
            }
        }
    }

    fn write_string(&mut self, text: &str) {
        if text.len() >= 4 {
            if let Some(&offset) = self.strings.get(text) {
                write_pointer(&mut self.buffer, offset);
                return;
            }
            self.strings.insert(text.to_string(), self.buffer.len() as u32);
        }
        write_control(&mut self.buffer, 2, text.len());
        self.buffer.extend_from_slice(text.as_bytes());
    }
}

/// Control byte(s) for `type_id` with a payload of `size`
pub fn write_control(buffer: &mut Vec<u8>, type_id: u8, size: usize) {
    let (type_bits, extended) = if type_id <= 7 {
        (type_id << 5, None)
    } else {
        (0, Some(type_id - 7))
    };

    let (size_bits, extra): (u8, Vec<u8>) = if size < 29 {
        (size as u8, Vec::new())
    } else if size < 29 + 256 {
        (29, vec![(size - 29) as u8])
    } else if size < 29 + 256 + 65536 {
        (30, ((size - 285) as u16).to_be_bytes().to_vec())
    } else {
        (31, ((size - 65821) as u32).to_be_bytes()[1..].to_vec())
    };

    buffer.push(type_bits | size_bits);
    if let Some(ext) = extended {
        buffer.push(ext);
    }
    buffer.extend_from_slice(&extra);
}

/// Unsigned integer with leading zero bytes dropped
fn write_uint(buffer: &mut Vec<u8>, type_id: u8, n: u128) {
    let bytes = n.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    write_control(buffer, type_id, 16 - skip);
    buffer.extend_from_slice(&bytes[skip..]);
}

/// Smallest pointer encoding reaching `offset`
pub fn write_pointer(buffer: &mut Vec<u8>, offset: u32) {
    if offset < 0x800 {
        buffer.push(0x20 | ((offset >> 8) & 0x7) as u8);
        buffer.push(offset as u8);
    } else if offset < 0x80800 {
        let adjusted = offset - 0x800;
        buffer.push(0x28 | ((adjusted >> 16) & 0x7) as u8);
        buffer.extend_from_slice(&adjusted.to_be_bytes()[2..]);
    } else if offset < 0x8080800 {
        let adjusted = offset - 0x80800;
        buffer.push(0x30 | ((adjusted >> 24) & 0x7) as u8);
        buffer.extend_from_slice(&adjusted.to_be_bytes()[1..]);
    } else {
        buffer.push(0x38);
        buffer.extend_from_slice(&offset.to_be_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pointer {
    Node(u32),
    /// Data offset and the prefix length it was inserted with
    Data(u32, u8),
    Empty,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    children: [Pointer; 2],
}

/// Search tree writer (arena of nodes, root is node 0)
pub struct TreeWriter {
    ipv6: bool,
    nodes: Vec<Node>,
}

impl TreeWriter {
    pub fn new(ipv6: bool) -> Self {
        Self {
            ipv6,
            nodes: vec![Node {
                children: [Pointer::Empty; 2],
            }],
        }
    }

    /// Insert `addr/prefix_len`; IPv4 networks in an IPv6 tree go under ::/96
    pub fn insert(&mut self, addr: IpAddr, prefix_len: u8, data_offset: u32) {
        let (bits, depth) = match addr {
            IpAddr::V4(v4) if self.ipv6 => (u32::from(v4) as u128, 96 + prefix_len),
            IpAddr::V4(v4) => ((u32::from(v4) as u128) << 96, prefix_len),
            IpAddr::V6(v6) => {
                assert!(self.ipv6, "IPv6 network in an IPv4 tree");
                (u128::from(v6), prefix_len)
            }
        };
        self.insert_bits(bits, depth, Pointer::Data(data_offset, prefix_len));
    }

    /// Point ::ffff:0:0/96 at the IPv4 subtree under ::/96
    pub fn alias_ipv4_mapped(&mut self) {
        let mut node = 0u32;
        for _ in 0..96 {
            match self.nodes[node as usize].children[0] {
                Pointer::Node(next) => node = next,
                _ => return,
            }
        }
        self.insert_bits(0xFFFF_u128 << 32, 96, Pointer::Node(node));
    }

    fn allocate(&mut self, children: [Pointer; 2]) -> u32 {
        self.nodes.push(Node { children });
        (self.nodes.len() - 1) as u32
    }

    fn insert_bits(&mut self, bits: u128, depth: u8, target: Pointer) {
        let mut node = 0u32;
        for d in 0..depth {
            let bit = ((bits >> (127 - d)) & 1) as usize;
            let child = self.nodes[node as usize].children[bit];

            if d + 1 == depth {
                match (child, target) {
                    (Pointer::Node(sub), Pointer::Data(offset, prefix)) => {
                        self.backfill(sub, offset, prefix)
                    }
                    _ => self.nodes[node as usize].children[bit] = target,
                }
                return;
            }

            node = match child {
                Pointer::Node(next) => next,
                Pointer::Empty => {
                    let next = self.allocate([Pointer::Empty; 2]);
                    self.nodes[node as usize].children[bit] = Pointer::Node(next);
                    next
                }
                Pointer::Data(..) => {
                    let next = self.allocate([child; 2]);
                    self.nodes[node as usize].children[bit] = Pointer::Node(next);
                    next
                }
            };
        }
    }

    /// Fill empty or less specific slots under `node`
    fn backfill(&mut self, node: u32, offset: u32, prefix: u8) {
        for bit in 0..2 {
            match self.nodes[node as usize].children[bit] {
                Pointer::Empty => {
                    self.nodes[node as usize].children[bit] = Pointer::Data(offset, prefix)
                }
                Pointer::Data(_, existing) if existing < prefix => {
                    self.nodes[node as usize].children[bit] = Pointer::Data(offset, prefix)
                }
                Pointer::Node(child) => self.backfill(child, offset, prefix),
                Pointer::Data(..) => {}
            }
        }
    }

    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// Serialize with `record_size` bits per record
    pub fn build(&self, record_size: u16) -> Vec<u8> {
        let node_count = self.node_count();
        let mut out = Vec::new();
        for node in &self.nodes {
            let [left, right] = node.children.map(|child| match child {
                Pointer::Node(id) => id,
                Pointer::Data(offset, _) => node_count + 16 + offset,
                Pointer::Empty => node_count,
            });
            write_node(&mut out, record_size, left, right);
        }
        out
    }
}

/// Append one node with the given records
pub fn write_node(out: &mut Vec<u8>, record_size: u16, left: u32, right: u32) {
    match record_size {
        24 => {
            out.extend_from_slice(&left.to_be_bytes()[1..]);
            out.extend_from_slice(&right.to_be_bytes()[1..]);
        }
        28 => {
            out.extend_from_slice(&left.to_be_bytes()[1..]);
            out.push((((left >> 24) & 0x0F) << 4) as u8 | ((right >> 24) & 0x0F) as u8);
            out.extend_from_slice(&right.to_be_bytes()[1..]);
        }
        32 => {
            out.extend_from_slice(&left.to_be_bytes());
            out.extend_from_slice(&right.to_be_bytes());
        }
        other => panic!("unsupported record size {}", other),
    }
}

/// Everything needed to write a database image
#[derive(Debug, Clone)]
pub struct DatabaseSpec {
    pub ipv6: bool,
    pub record_size: u16,
    pub database_type: String,
    pub format_major: u16,
    pub networks: Vec<(String, Value)>,
    pub alias_ipv4_mapped: bool,
}

impl DatabaseSpec {
    pub fn new(ipv6: bool, record_size: u16) -> Self {
        Self {
            ipv6,
            record_size,
            database_type: "Test-City".to_string(),
            format_major: 2,
            networks: Vec::new(),
            alias_ipv4_mapped: false,
        }
    }

    pub fn network(mut self, cidr: &str, value: Value) -> Self {
        self.networks.push((cidr.to_string(), value));
        self
    }
}

/// A written image and where its sections start
#[derive(Debug, Clone)]
pub struct Fixture {
    pub bytes: Vec<u8>,
    pub node_count: u32,
    pub record_size: u16,
    pub tree_size: usize,
    pub data_start: usize,
    pub data_len: usize,
    /// Data offset each network's record was written at, in insertion order
    pub offsets: Vec<u32>,
}

pub fn build(spec: &DatabaseSpec) -> Fixture {
    let mut data = DataWriter::new();
    let mut tree = TreeWriter::new(spec.ipv6);
    let mut offsets = Vec::new();

    for (cidr, value) in &spec.networks {
        let (addr, prefix) = parse_cidr(cidr);
        let offset = data.record(value);
        tree.insert(addr, prefix, offset);
        offsets.push(offset);
    }
    if spec.alias_ipv4_mapped {
        tree.alias_ipv4_mapped();
    }

    let tree_bytes = tree.build(spec.record_size);
    let node_count = tree.node_count();
    let data_bytes = data.into_bytes();

    let mut bytes = tree_bytes.clone();
    bytes.extend_from_slice(&[0u8; 16]);
    let data_start = bytes.len();
    bytes.extend_from_slice(&data_bytes);
    bytes.extend_from_slice(METADATA_MARKER);
    bytes.extend_from_slice(&metadata_block(spec, node_count));

    Fixture {
        bytes,
        node_count,
        record_size: spec.record_size,
        tree_size: tree_bytes.len(),
        data_start,
        data_len: data_bytes.len(),
        offsets,
    }
}

pub fn metadata_block(spec: &DatabaseSpec, node_count: u32) -> Vec<u8> {
    let metadata = map(vec![
        ("node_count", Value::Uint32(node_count)),
        ("record_size", Value::Uint16(spec.record_size)),
        ("ip_version", Value::Uint16(if spec.ipv6 { 6 } else { 4 })),
        ("binary_format_major_version", Value::Uint16(spec.format_major)),
        ("binary_format_minor_version", Value::Uint16(0)),
        ("build_epoch", Value::Uint64(1_700_000_000)),
        ("database_type", s(&spec.database_type)),
        ("languages", Value::Array(vec![s("en"), s("de")])),
        (
            "description",
            map(vec![("en", s("Test database")), ("de", s("Testdatenbank"))]),
        ),
    ]);
    let mut writer = DataWriter::new();
    writer.record(&metadata);
    writer.into_bytes()
}

pub fn parse_cidr(cidr: &str) -> (IpAddr, u8) {
    let (addr, prefix) = cidr.split_once('/').expect("cidr has a prefix");
    (addr.parse().expect("valid address"), prefix.parse().expect("valid prefix"))
}

fn country(iso: &str, en: &str) -> Value {
    map(vec![
        ("geoname_id", Value::Uint32(iso.bytes().map(u32::from).sum())),
        ("iso_code", s(iso)),
        ("names", map(vec![("en", s(en)), ("de", s(en))])),
    ])
}

fn subdivision(iso: &str, en: &str) -> Value {
    map(vec![("iso_code", s(iso)), ("names", map(vec![("en", s(en))]))])
}

fn city_record(iso: &str, name: &str, subdivisions: &[(&str, &str)], city: Option<&str>) -> Value {
    let mut pairs = vec![("country", country(iso, name))];
    if !subdivisions.is_empty() {
        pairs.push((
            "subdivisions",
            Value::Array(
                subdivisions
                    .iter()
                    .map(|(code, en)| subdivision(code, en))
                    .collect(),
            ),
        ));
    }
    if let Some(city) = city {
        pairs.push(("city", map(vec![("names", map(vec![("en", s(city))]))])));
    }
    map(pairs)
}

/// A record using every data type
pub fn all_types_record() -> Value {
    map(vec![
        ("utf8_string", s("unicode! ☯ - ♫")),
        ("long_string", s(&"x".repeat(300))),
        ("double", Value::Double(42.123456)),
        ("float", Value::Float(1.1)),
        ("bytes", Value::Bytes(vec![0, 0, 0, 42])),
        ("uint16", Value::Uint16(100)),
        ("uint32", Value::Uint32(268_435_456)),
        ("int32", Value::Int32(-268_435_456)),
        ("uint64", Value::Uint64(1_152_921_504_606_846_976)),
        ("uint128", Value::Uint128(1u128 << 120)),
        ("boolean", Value::Bool(true)),
        (
            "array",
            Value::Array(vec![Value::Uint32(1), Value::Uint32(2), Value::Uint32(3)]),
        ),
        (
            "map",
            map(vec![(
                "mapX",
                map(vec![
                    ("arrayX", Value::Array(vec![Value::Uint32(7), Value::Uint32(8)])),
                    ("utf8_stringX", s("hello")),
                ]),
            )]),
        ),
        ("empty_map", Value::Map(Vec::new())),
        ("empty_array", Value::Array(Vec::new())),
    ])
}

/// Geo database covering the addresses the integration tests query
pub fn geo_spec(ipv6: bool, record_size: u16) -> DatabaseSpec {
    let mut spec = DatabaseSpec::new(ipv6, record_size)
        .network("202.108.22.0/24", city_record("CN", "China", &[], None))
        .network(
            "84.38.138.0/24",
            city_record("LV", "Latvia", &[("RIX", "Riga")], Some("Riga")),
        )
        .network("8.8.8.0/24", city_record("US", "United States", &[], None))
        .network("8.8.4.0/24", city_record("US", "United States", &[], None))
        .network("1.1.1.0/24", city_record("AU", "Australia", &[], None))
        .network(
            "72.229.28.0/22",
            city_record(
                "US",
                "United States",
                &[("NY", "New York")],
                Some("New York"),
            ),
        )
        .network(
            "162.89.8.0/21",
            city_record("US", "United States", &[("TX", "Texas")], Some("Dallas")),
        )
        .network(
            "15.207.0.0/16",
            city_record("IN", "India", &[("MH", "Maharashtra")], Some("Mumbai")),
        )
        .network("172.217.0.0/16", city_record("US", "United States", &[], None))
        .network("10.0.0.0/8", all_types_record())
        .network("10.1.0.0/16", city_record("DE", "Germany", &[("BE", "Berlin")], None));

    if ipv6 {
        spec = spec
            .network(
                "2001:db8::/32",
                city_record("NL", "Netherlands", &[("NH", "North Holland")], None),
            )
            .network("2a02:ec0::/29", city_record("LV", "Latvia", &[], None));
        spec.alias_ipv4_mapped = true;
    }
    spec
}

pub fn geo_fixture(ipv6: bool, record_size: u16) -> Fixture {
    build(&geo_spec(ipv6, record_size))
}

/// Both records of `node`
pub fn read_node(fixture: &Fixture, node: u32) -> (u32, u32) {
    let bytes = fixture.record_size as usize / 4;
    let start = node as usize * bytes;
    let b = &fixture.bytes[start..start + bytes];
    let be = |s: &[u8]| s.iter().fold(0u32, |acc, &x| (acc << 8) | x as u32);
    match fixture.record_size {
        24 => (be(&b[0..3]), be(&b[3..6])),
        28 => (
            (((b[3] >> 4) as u32) << 24) | be(&b[0..3]),
            (((b[3] & 0x0F) as u32) << 24) | be(&b[4..7]),
        ),
        _ => (be(&b[0..4]), be(&b[4..8])),
    }
}

/// Overwrite one record of `node` in place
pub fn patch_record(fixture: &mut Fixture, node: u32, side: u8, value: u32) {
    let (mut left, mut right) = read_node(fixture, node);
    if side == 0 {
        left = value;
    } else {
        right = value;
    }
    let mut encoded = Vec::new();
    write_node(&mut encoded, fixture.record_size, left, right);
    let start = node as usize * encoded.len();
    fixture.bytes[start..start + encoded.len()].copy_from_slice(&encoded);
}

/// Replace everything after the marker with `block`
pub fn replace_metadata(fixture: &mut Fixture, block: &[u8]) {
    let marker = fixture.data_start + fixture.data_len;
    fixture.bytes.truncate(marker + METADATA_MARKER.len());
    fixture.bytes.extend_from_slice(block);
}

/// Metadata map from arbitrary fields
pub fn metadata_from(pairs: Vec<(&str, Value)>) -> Vec<u8> {
    let mut writer = DataWriter::new();
    writer.record(&map(pairs));
    writer.into_bytes()
}

/// The standard metadata fields with `overrides` replacing same-named ones
/// and `removed` left out
pub fn metadata_fields(
    fixture: &Fixture,
    ipv6: bool,
    overrides: Vec<(&str, Value)>,
    removed: &[&str],
) -> Vec<u8> {
    let mut fields: Vec<(&str, Value)> = vec![
        ("node_count", Value::Uint32(fixture.node_count)),
        ("record_size", Value::Uint16(fixture.record_size)),
        ("ip_version", Value::Uint16(if ipv6 { 6 } else { 4 })),
        ("binary_format_major_version", Value::Uint16(2)),
        ("binary_format_minor_version", Value::Uint16(0)),
        ("build_epoch", Value::Uint64(1_700_000_000)),
        ("database_type", s("Test-City")),
    ];
    for (key, value) in overrides {
        match fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => fields.push((key, value)),
        }
    }
    fields.retain(|(k, _)| !removed.contains(k));
    metadata_from(fields)
}
