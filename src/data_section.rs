//! Data section decoding
//!
//! Implements the MaxMind DB self-describing value encoding. Every value starts
//! with a control byte: the high 3 bits select the type, the low 5 bits start
//! a variable-length size. Type 0 means "extended": the next byte holds the
//! type number minus 7.
//!
//! # Supported Types
//!
//! - **Pointer**: reference to another value (11/19/27/32-bit offsets)
//! - **String**: UTF-8 text, validated
//! - **Double** / **Float**: IEEE 754, big-endian
//! - **Bytes**: opaque byte arrays
//! - **Uint16** / **Uint32** / **Uint64** / **Uint128** / **Int32**: big-endian,
//!   zero-extended when encoded in fewer bytes than their width
//! - **Map**: ordered key/value pairs with string keys
//! - **Array**: ordered values
//! - **Bool**: stored in the size field, no payload
//! - **Container**, **EndMarker** and unrecognized extended types carry no
//!   data for callers; they are decoded as tags and skipped by size
//!
//! See: https://maxmind.github.io/MaxMind-DB/

use crate::entry_list::EntryList;
use crate::error::DecodeError;
use crate::mmdb::types::{DEFAULT_MAX_DECODED_VALUES, DEFAULT_MAX_POINTER_DEPTH, MAX_NESTING_DEPTH};
use crate::source::ByteSource;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::json;
use std::fmt;

/// Type tag of an encoded value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Extended type with an unrecognized subtype
    Extended = 0,
    /// Pointer to another value
    Pointer = 1,
    /// UTF-8 string
    Utf8String = 2,
    /// 64-bit float
    Double = 3,
    /// Raw bytes
    Bytes = 4,
    /// Unsigned 16-bit integer
    Uint16 = 5,
    /// Unsigned 32-bit integer
    Uint32 = 6,
    /// Key/value map
    Map = 7,
    /// Signed 32-bit integer
    Int32 = 8,
    /// Unsigned 64-bit integer
    Uint64 = 9,
    /// Unsigned 128-bit integer
    Uint128 = 10,
    /// Array of values
    Array = 11,
    /// Data cache container
    Container = 12,
    /// End marker
    EndMarker = 13,
    /// Boolean
    Boolean = 14,
    /// 32-bit float
    Float = 15,
}

impl DataType {
    fn from_id(type_id: u16) -> Self {
        match type_id {
            1 => DataType::Pointer,
            2 => DataType::Utf8String,
            3 => DataType::Double,
            4 => DataType::Bytes,
            5 => DataType::Uint16,
            6 => DataType::Uint32,
            7 => DataType::Map,
            8 => DataType::Int32,
            9 => DataType::Uint64,
            10 => DataType::Uint128,
            11 => DataType::Array,
            12 => DataType::Container,
            13 => DataType::EndMarker,
            14 => DataType::Boolean,
            15 => DataType::Float,
            _ => DataType::Extended,
        }
    }

    /// Name used in dumps, matching libmaxminddb
    pub fn name(self) -> &'static str {
        match self {
            DataType::Extended => "extended",
            DataType::Pointer => "pointer",
            DataType::Utf8String => "utf8_string",
            DataType::Double => "double",
            DataType::Bytes => "bytes",
            DataType::Uint16 => "uint16",
            DataType::Uint32 => "uint32",
            DataType::Map => "map",
            DataType::Int32 => "int32",
            DataType::Uint64 => "uint64",
            DataType::Uint128 => "uint128",
            DataType::Array => "array",
            DataType::Container => "container",
            DataType::EndMarker => "end_marker",
            DataType::Boolean => "boolean",
            DataType::Float => "float",
        }
    }

    /// Map or array
    pub fn is_composite(self) -> bool {
        matches!(self, DataType::Map | DataType::Array)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded payload of one value
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// Extended type with an unrecognized subtype (payload skipped)
    Extended {
        /// Full type number (7 + extended byte)
        type_id: u16,
        /// Declared size
        size: usize,
    },
    /// Unfollowed pointer (only produced by [`DataDecoder::decode_raw`])
    Pointer(usize),
    /// UTF-8 string
    String(String),
    /// IEEE 754 double precision float
    Double(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Key/value pairs in file order
    Map(Vec<(String, DecodedValue)>),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Unsigned 128-bit integer
    Uint128(u128),
    /// Array of values
    Array(Vec<DecodedValue>),
    /// Data cache container (payload skipped)
    Container {
        /// Declared size
        size: usize,
    },
    /// End marker
    EndMarker,
    /// Boolean value
    Bool(bool),
    /// IEEE 754 single precision float
    Float(f32),
}

impl DataValue {
    /// Type tag of this value
    pub fn data_type(&self) -> DataType {
        match self {
            DataValue::Extended { .. } => DataType::Extended,
            DataValue::Pointer(_) => DataType::Pointer,
            DataValue::String(_) => DataType::Utf8String,
            DataValue::Double(_) => DataType::Double,
            DataValue::Bytes(_) => DataType::Bytes,
            DataValue::Uint16(_) => DataType::Uint16,
            DataValue::Uint32(_) => DataType::Uint32,
            DataValue::Map(_) => DataType::Map,
            DataValue::Int32(_) => DataType::Int32,
            DataValue::Uint64(_) => DataType::Uint64,
            DataValue::Uint128(_) => DataType::Uint128,
            DataValue::Array(_) => DataType::Array,
            DataValue::Container { .. } => DataType::Container,
            DataValue::EndMarker => DataType::EndMarker,
            DataValue::Bool(_) => DataType::Boolean,
            DataValue::Float(_) => DataType::Float,
        }
    }

    /// False for tags that carry nothing a caller can use
    pub fn is_data(&self) -> bool {
        !matches!(
            self,
            DataValue::Extended { .. }
                | DataValue::Pointer(_)
                | DataValue::Container { .. }
                | DataValue::EndMarker
        )
    }
}

/// A decoded value together with the offset it was decoded from
///
/// For values reached through a pointer the offset is the pointer's target,
/// so identical shared values report identical offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedValue {
    offset: usize,
    value: DataValue,
}

impl DecodedValue {
    /// Pair a value with its source offset
    pub fn new(offset: usize, value: DataValue) -> Self {
        Self { offset, value }
    }

    /// Offset of the value's control byte within its section
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The decoded payload
    pub fn value(&self) -> &DataValue {
        &self.value
    }

    /// Take the payload
    pub fn into_value(self) -> DataValue {
        self.value
    }

    /// Type tag
    pub fn data_type(&self) -> DataType {
        self.value.data_type()
    }

    /// String contents, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Any unsigned integer that fits in a u64
    pub fn as_u64(&self) -> Option<u64> {
        match self.value {
            DataValue::Uint16(n) => Some(n as u64),
            DataValue::Uint32(n) => Some(n as u64),
            DataValue::Uint64(n) => Some(n),
            DataValue::Uint128(n) => u64::try_from(n).ok(),
            _ => None,
        }
    }

    /// Int32 or an unsigned integer that fits in an i64
    pub fn as_i64(&self) -> Option<i64> {
        match self.value {
            DataValue::Int32(n) => Some(n as i64),
            _ => self.as_u64().and_then(|n| i64::try_from(n).ok()),
        }
    }

    /// Double or float
    pub fn as_f64(&self) -> Option<f64> {
        match self.value {
            DataValue::Double(d) => Some(d),
            DataValue::Float(f) => Some(f as f64),
            _ => None,
        }
    }

    /// Boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            DataValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.value {
            DataValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Map entry by key (first match in file order)
    pub fn get(&self, key: &str) -> Option<&DecodedValue> {
        match &self.value {
            DataValue::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Array element by index
    pub fn index(&self, index: usize) -> Option<&DecodedValue> {
        match &self.value {
            DataValue::Array(items) => items.get(index),
            _ => None,
        }
    }
}

impl DataValue {
    /// Convert to a JSON value
    ///
    /// `Uint128` becomes a decimal string and non-data tags become `null`,
    /// matching the `Serialize` impl.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            DataValue::String(s) => json!(s),
            DataValue::Double(d) => json!(d),
            DataValue::Bytes(b) => json!(b),
            DataValue::Uint16(u) => json!(u),
            DataValue::Uint32(u) => json!(u),
            DataValue::Uint64(u) => json!(u),
            DataValue::Uint128(u) => json!(u.to_string()),
            DataValue::Int32(i) => json!(i),
            DataValue::Bool(b) => json!(b),
            DataValue::Float(f) => json!(f),
            DataValue::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    // first occurrence wins, as in `get`
                    map.entry(k.clone()).or_insert_with(|| v.value.to_json());
                }
                serde_json::Value::Object(map)
            }
            DataValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(|item| item.value.to_json()).collect())
            }
            DataValue::Extended { .. }
            | DataValue::Pointer(_)
            | DataValue::Container { .. }
            | DataValue::EndMarker => serde_json::Value::Null,
        }
    }
}

impl Serialize for DecodedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl Serialize for DataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DataValue::String(s) => serializer.serialize_str(s),
            DataValue::Double(d) => serializer.serialize_f64(*d),
            DataValue::Bytes(b) => {
                let mut seq = serializer.serialize_seq(Some(b.len()))?;
                for byte in b {
                    seq.serialize_element(byte)?;
                }
                seq.end()
            }
            DataValue::Uint16(n) => serializer.serialize_u16(*n),
            DataValue::Uint32(n) => serializer.serialize_u32(*n),
            DataValue::Int32(n) => serializer.serialize_i32(*n),
            DataValue::Uint64(n) => serializer.serialize_u64(*n),
            DataValue::Uint128(n) => serializer.serialize_str(&n.to_string()),
            DataValue::Bool(b) => serializer.serialize_bool(*b),
            DataValue::Float(f) => serializer.serialize_f32(*f),
            DataValue::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            DataValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            DataValue::Extended { .. }
            | DataValue::Pointer(_)
            | DataValue::Container { .. }
            | DataValue::EndMarker => serializer.serialize_none(),
        }
    }
}

/// Parsed control byte(s) of one value, payload not yet decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control {
    /// Type tag
    pub data_type: DataType,
    /// Raw type number (differs from `data_type` only for unrecognized extended types)
    pub type_id: u16,
    /// Offset of the control byte
    pub offset: usize,
    /// Declared size: byte length for scalars, entry count for maps/arrays
    pub size: usize,
    /// First byte after the control bytes
    pub payload_offset: usize,
    /// Target offset for pointers
    pub pointer: Option<usize>,
}

/// Values one decode call may still produce
#[derive(Debug, Clone, Copy)]
pub(crate) struct Budget {
    remaining: usize,
    max: usize,
}

impl Budget {
    fn new(max: usize) -> Self {
        Self { remaining: max, max }
    }

    /// Account for the value at `offset`
    pub(crate) fn spend(&mut self, offset: usize) -> Result<(), DecodeError> {
        if self.remaining == 0 {
            return Err(DecodeError::TooManyValues {
                offset,
                max_values: self.max,
            });
        }
        self.remaining -= 1;
        Ok(())
    }
}

/// Data section decoder
///
/// Decodes values from a section buffer (the data section for records, the
/// metadata block for metadata). Pointer targets are offsets from the start
/// of that same buffer.
#[derive(Debug, Clone, Copy)]
pub struct DataDecoder<'a> {
    source: ByteSource<'a>,
    max_pointer_depth: usize,
    max_decoded_values: usize,
}

impl<'a> DataDecoder<'a> {
    /// Create a decoder for a section
    pub fn new(section: &'a [u8]) -> Self {
        Self {
            source: ByteSource::new(section),
            max_pointer_depth: DEFAULT_MAX_POINTER_DEPTH,
            max_decoded_values: DEFAULT_MAX_DECODED_VALUES,
        }
    }

    /// Override the pointer chain cap
    pub fn with_max_pointer_depth(mut self, max_pointer_depth: usize) -> Self {
        self.max_pointer_depth = max_pointer_depth;
        self
    }

    /// Configured pointer chain cap
    pub fn max_pointer_depth(&self) -> usize {
        self.max_pointer_depth
    }

    /// Override the cap on values produced by one `decode_at`, `decode_raw`
    /// or `decode_chain` call
    pub fn with_max_decoded_values(mut self, max_decoded_values: usize) -> Self {
        self.max_decoded_values = max_decoded_values;
        self
    }

    /// Configured cap on values per decode
    pub fn max_decoded_values(&self) -> usize {
        self.max_decoded_values
    }

    pub(crate) fn budget(&self) -> Budget {
        Budget::new(self.max_decoded_values)
    }

    /// Size of the section in bytes
    pub fn len(&self) -> usize {
        self.source.len()
    }

    /// True if the section is empty
    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Decode the value at `offset`, following pointers transitively
    pub fn decode_at(&self, offset: usize) -> Result<DecodedValue, DecodeError> {
        self.decode_value(offset, true, 0, &mut self.budget())
            .map(|(value, _)| value)
    }

    /// Decode the value at `offset` without following a top-level pointer
    pub fn decode_raw(&self, offset: usize) -> Result<DecodedValue, DecodeError> {
        self.decode_value(offset, false, 0, &mut self.budget())
            .map(|(value, _)| value)
    }

    /// Depth-first pre-order sequence of the entries under `offset`
    ///
    /// The root is validated eagerly; the rest is decoded as the iterator
    /// advances.
    pub fn decode_chain(&self, offset: usize) -> Result<EntryList<'a>, DecodeError> {
        EntryList::new(*self, offset)
    }

    /// Parse the control byte(s) at `offset`
    pub fn decode_control(&self, offset: usize) -> Result<Control, DecodeError> {
        let ctrl = self.source.read_u8(offset)?;
        let type_bits = ctrl >> 5;

        if type_bits == 1 {
            let size_class = (ctrl >> 3) & 0x3;
            let high_bits = (ctrl & 0x7) as usize;
            let (extra, bias) = match size_class {
                0 => (1, 0),
                1 => (2, 2048),
                2 => (3, 526_336),
                _ => (4, 0),
            };
            let raw = self.source.read_be_uint(offset + 1, extra)? as usize;
            let target = if size_class == 3 {
                raw
            } else {
                ((high_bits << (8 * extra)) | raw) + bias
            };
            return Ok(Control {
                data_type: DataType::Pointer,
                type_id: 1,
                offset,
                size: 0,
                payload_offset: offset + 1 + extra,
                pointer: Some(target),
            });
        }

        let mut cursor = offset + 1;
        let (data_type, type_id) = if type_bits == 0 {
            let type_id = 7 + self.source.read_u8(cursor)? as u16;
            cursor += 1;
            // Extended subtypes start at 8
            let data_type = if (8..=15).contains(&type_id) {
                DataType::from_id(type_id)
            } else {
                DataType::Extended
            };
            (data_type, type_id)
        } else {
            (DataType::from_id(type_bits as u16), type_bits as u16)
        };

        let size_bits = ctrl & 0x1F;
        let size = match size_bits {
            0..=28 => size_bits as usize,
            29 => {
                let n = self.source.read_be_uint(cursor, 1)? as usize;
                cursor += 1;
                29 + n
            }
            30 => {
                let n = self.source.read_be_uint(cursor, 2)? as usize;
                cursor += 2;
                285 + n
            }
            _ => {
                let n = self.source.read_be_uint(cursor, 3)? as usize;
                cursor += 3;
                65_821 + n
            }
        };

        Ok(Control {
            data_type,
            type_id,
            offset,
            size,
            payload_offset: cursor,
            pointer: None,
        })
    }

    /// Control of the value a pointer chain starting at `offset` ends on
    pub fn resolve_control(&self, offset: usize) -> Result<Control, DecodeError> {
        self.follow(self.decode_control(offset)?)
    }

    /// Offset just past the value at `offset`, without decoding payloads.
    /// Pointers are stepped over, not followed.
    pub fn skip(&self, offset: usize) -> Result<usize, DecodeError> {
        self.skip_value(offset, 0)
    }

    /// Decode a map key at `offset`: a string, possibly behind pointers.
    /// Returns the borrowed key and the offset after it.
    pub(crate) fn read_key(&self, offset: usize) -> Result<(&'a str, usize), DecodeError> {
        let ctrl = self.decode_control(offset)?;
        let next = match ctrl.pointer {
            Some(_) => ctrl.payload_offset,
            None => ctrl.payload_offset + ctrl.size,
        };
        let resolved = self.follow(ctrl)?;
        if resolved.data_type != DataType::Utf8String {
            return Err(DecodeError::InvalidMapKey {
                offset,
                found: resolved.data_type,
            });
        }
        let key = self.read_str(resolved.payload_offset, resolved.size)?;
        Ok((key, next))
    }

    pub(crate) fn follow(&self, mut ctrl: Control) -> Result<Control, DecodeError> {
        let start = ctrl.offset;
        let mut hops = 0;
        while let Some(target) = ctrl.pointer {
            if hops == self.max_pointer_depth {
                return Err(DecodeError::PointerDepthExceeded {
                    offset: start,
                    max_depth: self.max_pointer_depth,
                });
            }
            hops += 1;
            ctrl = self.decode_control(target)?;
        }
        Ok(ctrl)
    }

    /// Decode one value; returns it with the offset following it in the
    /// enclosing structure (after the pointer itself when one was followed)
    fn decode_value(
        &self,
        offset: usize,
        follow: bool,
        depth: usize,
        budget: &mut Budget,
    ) -> Result<(DecodedValue, usize), DecodeError> {
        let ctrl = self.decode_control(offset)?;
        match ctrl.pointer {
            Some(target) if !follow => {
                budget.spend(offset)?;
                Ok((
                    DecodedValue::new(offset, DataValue::Pointer(target)),
                    ctrl.payload_offset,
                ))
            }
            Some(_) => {
                let resolved = self.follow(ctrl)?;
                let (value, _) = self.decode_from_control(resolved, depth, budget)?;
                Ok((value, ctrl.payload_offset))
            }
            None => self.decode_from_control(ctrl, depth, budget),
        }
    }

    /// Decode the payload described by a non-pointer control
    pub(crate) fn decode_from_control(
        &self,
        ctrl: Control,
        depth: usize,
        budget: &mut Budget,
    ) -> Result<(DecodedValue, usize), DecodeError> {
        let offset = ctrl.offset;
        let start = ctrl.payload_offset;
        budget.spend(offset)?;

        let len = self.payload_len(&ctrl)?;
        let value = match ctrl.data_type {
            DataType::Map => return self.decode_map(ctrl, depth, budget),
            DataType::Array => return self.decode_array(ctrl, depth, budget),
            DataType::Utf8String => DataValue::String(self.read_str(start, len)?.to_string()),
            DataType::Double => DataValue::Double(f64::from_bits(self.read_uint(start, len)? as u64)),
            DataType::Bytes => DataValue::Bytes(self.source.slice(start, len)?.to_vec()),
            DataType::Uint16 => DataValue::Uint16(self.read_uint(start, len)? as u16),
            DataType::Uint32 => DataValue::Uint32(self.read_uint(start, len)? as u32),
            // Short payloads are zero-extended before reinterpreting the sign
            DataType::Int32 => DataValue::Int32(self.read_uint(start, len)? as u32 as i32),
            DataType::Uint64 => DataValue::Uint64(self.read_uint(start, len)? as u64),
            DataType::Uint128 => DataValue::Uint128(self.read_uint(start, len)?),
            DataType::Boolean => DataValue::Bool(ctrl.size != 0),
            DataType::Float => DataValue::Float(f32::from_bits(self.read_uint(start, len)? as u32)),
            DataType::Container => {
                self.source.slice(start, len)?;
                DataValue::Container { size: ctrl.size }
            }
            DataType::EndMarker => {
                self.source.slice(start, len)?;
                DataValue::EndMarker
            }
            DataType::Extended => {
                self.source.slice(start, len)?;
                DataValue::Extended {
                    type_id: ctrl.type_id,
                    size: ctrl.size,
                }
            }
            DataType::Pointer => DataValue::Pointer(ctrl.pointer.unwrap_or_default()),
        };

        Ok((DecodedValue::new(offset, value), start + len))
    }

    fn decode_map(
        &self,
        ctrl: Control,
        depth: usize,
        budget: &mut Budget,
    ) -> Result<(DecodedValue, usize), DecodeError> {
        self.check_depth(ctrl.offset, depth)?;
        let mut entries = Vec::with_capacity(self.bounded_capacity(ctrl.size, ctrl.payload_offset));
        let mut cursor = ctrl.payload_offset;
        for _ in 0..ctrl.size {
            let (key, next) = self.read_key(cursor)?;
            let (value, next) = self.decode_value(next, true, depth + 1, budget)?;
            entries.push((key.to_string(), value));
            cursor = next;
        }
        Ok((DecodedValue::new(ctrl.offset, DataValue::Map(entries)), cursor))
    }

    fn decode_array(
        &self,
        ctrl: Control,
        depth: usize,
        budget: &mut Budget,
    ) -> Result<(DecodedValue, usize), DecodeError> {
        self.check_depth(ctrl.offset, depth)?;
        let mut items = Vec::with_capacity(self.bounded_capacity(ctrl.size, ctrl.payload_offset));
        let mut cursor = ctrl.payload_offset;
        for _ in 0..ctrl.size {
            let (value, next) = self.decode_value(cursor, true, depth + 1, budget)?;
            items.push(value);
            cursor = next;
        }
        Ok((DecodedValue::new(ctrl.offset, DataValue::Array(items)), cursor))
    }

    fn skip_value(&self, offset: usize, depth: usize) -> Result<usize, DecodeError> {
        let ctrl = self.decode_control(offset)?;
        if ctrl.pointer.is_some() {
            return Ok(ctrl.payload_offset);
        }

        let mut cursor = ctrl.payload_offset;
        match ctrl.data_type {
            DataType::Map => {
                self.check_depth(offset, depth)?;
                for _ in 0..ctrl.size {
                    cursor = self.skip_value(cursor, depth + 1)?;
                    cursor = self.skip_value(cursor, depth + 1)?;
                }
                Ok(cursor)
            }
            DataType::Array => {
                self.check_depth(offset, depth)?;
                for _ in 0..ctrl.size {
                    cursor = self.skip_value(cursor, depth + 1)?;
                }
                Ok(cursor)
            }
            _ => {
                let len = self.payload_len(&ctrl)?;
                self.source.slice(cursor, len)?;
                Ok(cursor + len)
            }
        }
    }

    /// Payload byte length of a non-composite value, validating the declared
    /// size against the type's width
    fn payload_len(&self, ctrl: &Control) -> Result<usize, DecodeError> {
        let max = match ctrl.data_type {
            DataType::Pointer | DataType::Map | DataType::Array => return Ok(0),
            DataType::Double => return self.exact_size(ctrl, 8),
            DataType::Float => return self.exact_size(ctrl, 4),
            DataType::Boolean => {
                return if ctrl.size <= 1 {
                    Ok(0)
                } else {
                    Err(self.invalid_size(ctrl))
                };
            }
            DataType::Uint16 => 2,
            DataType::Uint32 | DataType::Int32 => 4,
            DataType::Uint64 => 8,
            DataType::Uint128 => 16,
            DataType::Utf8String
            | DataType::Bytes
            | DataType::Container
            | DataType::EndMarker
            | DataType::Extended => return Ok(ctrl.size),
        };
        if ctrl.size > max {
            return Err(self.invalid_size(ctrl));
        }
        Ok(ctrl.size)
    }

    fn exact_size(&self, ctrl: &Control, expected: usize) -> Result<usize, DecodeError> {
        if ctrl.size == expected {
            Ok(expected)
        } else {
            Err(self.invalid_size(ctrl))
        }
    }

    fn invalid_size(&self, ctrl: &Control) -> DecodeError {
        DecodeError::InvalidSize {
            data_type: ctrl.data_type,
            size: ctrl.size,
            offset: ctrl.offset,
        }
    }

    fn check_depth(&self, offset: usize, depth: usize) -> Result<(), DecodeError> {
        if depth >= MAX_NESTING_DEPTH {
            return Err(DecodeError::NestingTooDeep {
                offset,
                max_depth: MAX_NESTING_DEPTH,
            });
        }
        Ok(())
    }

    /// Every entry takes at least one byte, so a declared count larger than
    /// the remaining bytes cannot be honest
    fn bounded_capacity(&self, count: usize, start: usize) -> usize {
        count.min(self.source.len().saturating_sub(start))
    }

    fn read_uint(&self, offset: usize, len: usize) -> Result<u128, DecodeError> {
        self.source.read_be_uint(offset, len)
    }

    fn read_str(&self, offset: usize, len: usize) -> Result<&'a str, DecodeError> {
        let bytes = self.source.slice(offset, len)?;
        std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 { offset })
    }
}
