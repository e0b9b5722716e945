//! Human-readable record dumps
//!
//! Output follows `mmdblookup`'s layout so dumps can be diffed against the
//! reference tool:
//!
//! ```text
//! {
//!   "country":
//!     {
//!       "iso_code":
//!         "US" <utf8_string>
//!     }
//! }
//! ```

use crate::data_section::DataValue;
use crate::entry_list::{Entry, EntryData, EntryList, EntryRole};
use std::io::{self, Write};

struct OpenContainer {
    close: &'static str,
    indent: usize,
    /// Entries (keys and values) still to come
    remaining: usize,
}

/// Write the dump of an entry sequence to `out`
///
/// A decode error mid-record is returned as an `InvalidData` I/O error after
/// everything decoded so far has been written.
pub fn write_dump<W: Write>(entries: EntryList<'_>, out: &mut W) -> io::Result<()> {
    let mut open: Vec<OpenContainer> = Vec::new();

    for entry in entries {
        let entry = entry.map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        let indent = match (open.last(), entry.role) {
            (Some(parent), EntryRole::MapValue) => parent.indent + 4,
            (Some(parent), _) => parent.indent + 2,
            (None, _) => 0,
        };
        if let Some(parent) = open.last_mut() {
            parent.remaining = parent.remaining.saturating_sub(1);
        }

        match &entry.data {
            EntryData::Map { size } => {
                writeln!(out, "{:indent$}{{", "", indent = indent)?;
                open.push(OpenContainer {
                    close: "}",
                    indent,
                    remaining: size * 2,
                });
            }
            EntryData::Array { size } => {
                writeln!(out, "{:indent$}[", "", indent = indent)?;
                open.push(OpenContainer {
                    close: "]",
                    indent,
                    remaining: *size,
                });
            }
            EntryData::Value(_) if entry.role == EntryRole::Key => {
                writeln!(out, "{:indent$}\"{}\": ", "", key(&entry), indent = indent)?;
            }
            EntryData::Value(value) => {
                writeln!(out, "{:indent$}{}", "", format_scalar(value), indent = indent)?;
            }
        }

        while open.last().is_some_and(|top| top.remaining == 0) {
            if let Some(done) = open.pop() {
                writeln!(out, "{:indent$}{}", "", done.close, indent = done.indent)?;
            }
        }
    }
    Ok(())
}

fn key(entry: &Entry) -> &str {
    entry.as_str().unwrap_or_default()
}

/// One scalar followed by its type tag
pub fn format_scalar(value: &DataValue) -> String {
    let tag = value.data_type();
    match value {
        DataValue::String(s) => format!("\"{}\" <{}>", s, tag),
        DataValue::Double(d) => format!("{:.6} <{}>", d, tag),
        DataValue::Float(f) => format!("{:.6} <{}>", f, tag),
        DataValue::Bytes(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
            format!("{} <{}>", hex, tag)
        }
        DataValue::Uint16(n) => format!("{} <{}>", n, tag),
        DataValue::Uint32(n) => format!("{} <{}>", n, tag),
        DataValue::Int32(n) => format!("{} <{}>", n, tag),
        DataValue::Uint64(n) => format!("{} <{}>", n, tag),
        DataValue::Uint128(n) => format!("0x{:032x} <{}>", n, tag),
        DataValue::Bool(b) => format!("{} <{}>", b, tag),
        DataValue::Pointer(target) => format!("-> {} <{}>", target, tag),
        DataValue::Container { size } | DataValue::Extended { size, .. } => {
            format!("({} bytes) <{}>", size, tag)
        }
        DataValue::EndMarker => format!("<{}>", tag),
        DataValue::Map(entries) => format!("({} pairs) <{}>", entries.len(), tag),
        DataValue::Array(items) => format!("({} items) <{}>", items.len(), tag),
    }
}
