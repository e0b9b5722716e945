//! Path navigation into decoded records
//!
//! Walks maps and arrays one segment at a time. Only the entries needed to
//! find the next segment are inspected; siblings are stepped over by their
//! encoded length, and only the final value is materialized.

use crate::data_section::{DataDecoder, DataType, DecodedValue};
use crate::error::DecodeError;
use std::fmt;

/// One step of a path: a map key or an array index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Map key
    Key(String),
    /// Array index
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(key),
            PathSegment::Index(index) => write!(f, "{}", index),
        }
    }
}

/// Build a path from mixed keys and indices: `path!["subdivisions", 0usize, "iso_code"]`
#[macro_export]
macro_rules! path {
    ($($segment:expr),* $(,)?) => {
        vec![$($crate::PathSegment::from($segment)),*]
    };
}

/// Resolves paths against a section
#[derive(Debug, Clone, Copy)]
pub struct PathResolver<'a> {
    decoder: DataDecoder<'a>,
}

impl<'a> PathResolver<'a> {
    /// Create a resolver over a decoder's section
    pub fn new(decoder: DataDecoder<'a>) -> Self {
        Self { decoder }
    }

    /// Follow `path` from the value at `root_offset`
    ///
    /// A key applied to a non-map, a missing key, an index applied to a
    /// non-array, or an index out of bounds all give `Ok(None)`. An empty
    /// path returns the root value.
    pub fn resolve(
        &self,
        root_offset: usize,
        path: &[PathSegment],
    ) -> Result<Option<DecodedValue>, DecodeError> {
        let mut offset = root_offset;
        for segment in path {
            let next = match segment {
                PathSegment::Key(key) => self.find_key(offset, key)?,
                PathSegment::Index(index) => self.find_index(offset, *index)?,
            };
            match next {
                Some(next) => offset = next,
                None => return Ok(None),
            }
        }
        self.decoder.decode_at(offset).map(Some)
    }

    /// Follow a path of strings
    ///
    /// Against an array, a segment is parsed as an index; negative numbers
    /// count from the end (`"-1"` is the last element). A segment that is
    /// not a number against an array gives `Ok(None)`.
    pub fn resolve_str(
        &self,
        root_offset: usize,
        path: &[&str],
    ) -> Result<Option<DecodedValue>, DecodeError> {
        let mut offset = root_offset;
        for segment in path {
            let ctrl = self.decoder.resolve_control(offset)?;
            let next = match ctrl.data_type {
                DataType::Map => self.find_key(offset, segment)?,
                DataType::Array => match parse_index(segment, ctrl.size) {
                    Some(index) => self.find_index(offset, index)?,
                    None => None,
                },
                _ => None,
            };
            match next {
                Some(next) => offset = next,
                None => return Ok(None),
            }
        }
        self.decoder.decode_at(offset).map(Some)
    }

    /// Offset of the value stored under `key`, if the value at `offset` is a
    /// map containing it. The first matching key wins.
    fn find_key(&self, offset: usize, key: &str) -> Result<Option<usize>, DecodeError> {
        let ctrl = self.decoder.resolve_control(offset)?;
        if ctrl.data_type != DataType::Map {
            return Ok(None);
        }
        let mut cursor = ctrl.payload_offset;
        for _ in 0..ctrl.size {
            let (candidate, value_offset) = self.decoder.read_key(cursor)?;
            if candidate == key {
                return Ok(Some(value_offset));
            }
            cursor = self.decoder.skip(value_offset)?;
        }
        Ok(None)
    }

    fn find_index(&self, offset: usize, index: usize) -> Result<Option<usize>, DecodeError> {
        let ctrl = self.decoder.resolve_control(offset)?;
        if ctrl.data_type != DataType::Array || index >= ctrl.size {
            return Ok(None);
        }
        let mut cursor = ctrl.payload_offset;
        for _ in 0..index {
            cursor = self.decoder.skip(cursor)?;
        }
        Ok(Some(cursor))
    }
}

fn parse_index(segment: &str, len: usize) -> Option<usize> {
    if let Some(from_end) = segment.strip_prefix('-') {
        let back: usize = from_end.parse().ok()?;
        if back == 0 {
            return None;
        }
        return len.checked_sub(back);
    }
    segment.parse().ok()
}
