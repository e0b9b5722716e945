#![no_main]
use libfuzzer_sys::fuzz_target;
use mmdb_engine::{path, DataDecoder, PathResolver};

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // First byte picks the start offset, the rest is the data section
    let offset = data[0] as usize;
    let section = &data[1..];
    let decoder = DataDecoder::new(section);

    let _ = decoder.decode_at(offset);
    let _ = decoder.decode_raw(offset);
    let _ = decoder.skip(offset);

    if let Ok(entries) = decoder.decode_chain(offset) {
        // Cyclic input is rejected by the nesting cap, but bound the walk anyway
        for entry in entries.take(1 << 16) {
            if entry.is_err() {
                break;
            }
        }
    }

    let resolver = PathResolver::new(decoder);
    let _ = resolver.resolve(offset, &path!["a", 0usize, "b"]);
    let _ = resolver.resolve_str(offset, &["a", "-1", "0"]);
});
