#![no_main]
use libfuzzer_sys::fuzz_target;
use mmdb_engine::mmdb::{IpVersion, RecordSize, SearchTree};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

fuzz_target!(|data: &[u8]| {
    // Header: record size, IP version, then 16 address bytes; the rest is tree
    if data.len() < 18 {
        return;
    }
    let record_size = match data[0] % 3 {
        0 => RecordSize::Bits24,
        1 => RecordSize::Bits28,
        _ => RecordSize::Bits32,
    };
    let ip_version = if data[1] & 1 == 0 {
        IpVersion::V4
    } else {
        IpVersion::V6
    };
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&data[2..18]);

    let tree = &data[18..];
    let node_bytes = record_size.node_bytes();
    let node_count = (tree.len() / node_bytes) as u32;
    let tree = &tree[..node_count as usize * node_bytes];

    // Garbage records must give errors, never panics or endless walks
    if let Ok(search) = SearchTree::new(tree, node_count, record_size, ip_version, 64) {
        let v4 = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
        let _ = search.locate(IpAddr::V4(v4));
        let _ = search.locate(IpAddr::V6(Ipv6Addr::from(octets)));
    }
});
