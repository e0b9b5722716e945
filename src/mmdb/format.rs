//! MMDB Binary Format Parsing
//!
//! Finds the metadata block at the tail of the file and turns it into a typed
//! [`Metadata`]. Everything else about the file (tree size, where the data
//! section starts) is derived from these fields.
//!
//! Layout:
//! - `[search tree][16 zero bytes][data section][marker][metadata map]`
//! - the marker is searched backwards within the last 128KB, last one wins
//! - metadata pointers are relative to the first byte after the marker

use super::types::{IpVersion, RecordSize, METADATA_MARKER, SUPPORTED_FORMAT_MAJOR};
use crate::data_section::{DataDecoder, DataValue, DecodedValue};
use crate::error::OpenError;
use serde::Serialize;

/// Parsed database metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size in bits (24, 28, or 32)
    pub record_size: RecordSize,
    /// IP version (4 or 6)
    pub ip_version: IpVersion,
    /// Binary format major version (always 2)
    pub binary_format_major_version: u16,
    /// Binary format minor version
    pub binary_format_minor_version: u16,
    /// Build time, seconds since the Unix epoch
    pub build_epoch: u64,
    /// Free-form database type, e.g. "GeoIP2-City"
    pub database_type: String,
    /// Locales the record names may be given in
    pub languages: Vec<String>,
    /// Descriptions by language code, in file order
    pub description: Vec<(String, String)>,
}

impl Metadata {
    /// Size of the search tree in bytes
    pub fn tree_size(&self) -> usize {
        self.node_count as usize * self.record_size.node_bytes()
    }

    /// Description in `language`, if present
    pub fn description_in(&self, language: &str) -> Option<&str> {
        self.description
            .iter()
            .find(|(lang, _)| lang == language)
            .map(|(_, text)| text.as_str())
    }
}

/// Locates and decodes the metadata block
#[derive(Debug, Clone, Copy)]
pub struct MetadataReader {
    search_window: usize,
    max_pointer_depth: usize,
}

impl MetadataReader {
    /// Reader searching the last `search_window` bytes for the marker
    pub fn new(search_window: usize, max_pointer_depth: usize) -> Self {
        Self {
            search_window,
            max_pointer_depth,
        }
    }

    /// Parse metadata from a complete file image
    ///
    /// Returns the metadata and the offset of the marker, which is where the
    /// data section ends.
    pub fn read(&self, data: &[u8]) -> Result<(Metadata, usize), OpenError> {
        let marker_offset =
            find_metadata_marker(data, self.search_window).ok_or(OpenError::MetadataNotFound)?;
        let value = self.decode_block(data, marker_offset)?;
        let metadata = metadata_from_value(&value)?;

        if metadata.binary_format_major_version != SUPPORTED_FORMAT_MAJOR {
            return Err(OpenError::UnsupportedFormatVersion {
                major: metadata.binary_format_major_version,
                minor: metadata.binary_format_minor_version,
            });
        }
        Ok((metadata, marker_offset))
    }

    /// Decode the raw metadata map following the marker at `marker_offset`
    pub fn decode_block(&self, data: &[u8], marker_offset: usize) -> Result<DecodedValue, OpenError> {
        let block = data
            .get(marker_offset + METADATA_MARKER.len()..)
            .ok_or(OpenError::MetadataNotFound)?;
        let decoder = DataDecoder::new(block).with_max_pointer_depth(self.max_pointer_depth);
        Ok(decoder.decode_at(0)?)
    }
}

/// Find the metadata marker in MMDB file (zero allocation)
///
/// The marker "\xAB\xCD\xEFMaxMind.com" appears somewhere in the last
/// `window` bytes of the file. If there are several, the LAST one is the real
/// one (a data section may legitimately contain the marker bytes).
pub fn find_metadata_marker(data: &[u8], window: usize) -> Option<usize> {
    let search_start = data.len().saturating_sub(window);
    memchr::memmem::rfind(&data[search_start..], METADATA_MARKER).map(|pos| search_start + pos)
}

fn metadata_from_value(value: &DecodedValue) -> Result<Metadata, OpenError> {
    if !matches!(value.value(), DataValue::Map(_)) {
        return Err(OpenError::InvalidMetadata("metadata is not a map".to_string()));
    }

    let node_count = required_uint(value, "node_count")?;
    let node_count = u32::try_from(node_count).map_err(|_| {
        OpenError::InvalidMetadata(format!("node_count {} does not fit in 32 bits", node_count))
    })?;
    let record_size = RecordSize::from_bits(required_uint(value, "record_size")?)?;
    let ip_version = IpVersion::from_metadata(required_uint(value, "ip_version")?)?;
    let binary_format_major_version = required_u16(value, "binary_format_major_version")?;
    let binary_format_minor_version = required_u16(value, "binary_format_minor_version")?;
    let build_epoch = required_uint(value, "build_epoch")?;
    let database_type = value
        .get("database_type")
        .ok_or_else(|| missing("database_type"))?
        .as_str()
        .ok_or_else(|| wrong_type("database_type", "a string"))?
        .to_string();

    let languages = match value.get("languages") {
        None => Vec::new(),
        Some(languages) => match languages.value() {
            DataValue::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| wrong_type("languages", "an array of strings"))
                })
                .collect::<Result<_, _>>()?,
            _ => return Err(wrong_type("languages", "an array of strings")),
        },
    };

    let description = match value.get("description") {
        None => Vec::new(),
        Some(description) => match description.value() {
            DataValue::Map(entries) => entries
                .iter()
                .map(|(lang, text)| {
                    text.as_str()
                        .map(|text| (lang.clone(), text.to_string()))
                        .ok_or_else(|| wrong_type("description", "a map of strings"))
                })
                .collect::<Result<_, _>>()?,
            _ => return Err(wrong_type("description", "a map of strings")),
        },
    };

    Ok(Metadata {
        node_count,
        record_size,
        ip_version,
        binary_format_major_version,
        binary_format_minor_version,
        build_epoch,
        database_type,
        languages,
        description,
    })
}

fn required_uint(map: &DecodedValue, key: &str) -> Result<u64, OpenError> {
    map.get(key)
        .ok_or_else(|| missing(key))?
        .as_u64()
        .ok_or_else(|| wrong_type(key, "an unsigned integer"))
}

fn required_u16(map: &DecodedValue, key: &str) -> Result<u16, OpenError> {
    let n = required_uint(map, key)?;
    u16::try_from(n).map_err(|_| OpenError::InvalidMetadata(format!("{} {} out of range", key, n)))
}

fn missing(key: &str) -> OpenError {
    OpenError::InvalidMetadata(format!("required field '{}' not found", key))
}

fn wrong_type(key: &str, expected: &str) -> OpenError {
    OpenError::InvalidMetadata(format!("field '{}' is not {}", key, expected))
}
