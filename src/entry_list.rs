//! Depth-first entry enumeration
//!
//! [`EntryList`] flattens a value into the pre-order sequence of its parts:
//! a map yields its header, then each key followed by that key's value; an
//! array yields its header then each element. Nested containers are expanded
//! in place. Entries are decoded as the iterator advances, so a caller that
//! stops early never pays for the rest of the record.

use crate::data_section::{Budget, DataDecoder, DataType, DataValue};
use crate::error::DecodeError;
use crate::mmdb::types::MAX_NESTING_DEPTH;

/// Where an entry sits relative to its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRole {
    /// The value the sequence started from
    Root,
    /// A map key
    Key,
    /// The value following a map key
    MapValue,
    /// An array element
    ArrayElement,
}

/// Payload of one entry
#[derive(Debug, Clone, PartialEq)]
pub enum EntryData {
    /// Map header; `size` key/value pairs follow
    Map {
        /// Number of pairs
        size: usize,
    },
    /// Array header; `size` elements follow
    Array {
        /// Number of elements
        size: usize,
    },
    /// A scalar (or non-data tag)
    Value(DataValue),
}

/// One element of a depth-first entry sequence
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Offset of the entry's control byte (after pointer resolution)
    pub offset: usize,
    /// Nesting depth; the root is 0
    pub depth: usize,
    /// Position relative to the parent
    pub role: EntryRole,
    /// Decoded payload
    pub data: EntryData,
}

impl Entry {
    /// Type tag of the entry
    pub fn data_type(&self) -> DataType {
        match &self.data {
            EntryData::Map { .. } => DataType::Map,
            EntryData::Array { .. } => DataType::Array,
            EntryData::Value(value) => value.data_type(),
        }
    }

    /// String payload (keys and string values)
    pub fn as_str(&self) -> Option<&str> {
        match &self.data {
            EntryData::Value(DataValue::String(s)) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Root,
    Map,
    Array,
}

#[derive(Debug, Clone)]
struct Frame {
    kind: FrameKind,
    cursor: usize,
    /// Values (not keys) still to visit
    remaining: usize,
    expect_key: bool,
    depth: usize,
    /// Where the parent continues once this frame is done. `None` when the
    /// container was inline, in which case the parent continues at this
    /// frame's final cursor.
    resume: Option<usize>,
}

enum Advance {
    To(usize),
    Descend(Frame),
}

/// Lazy depth-first pre-order sequence of entries
///
/// Every entry other than a map key counts against the decoder's
/// `max_decoded_values`. Yields `Err` at most once; the sequence ends after
/// an error. Calling
/// [`DataDecoder::decode_chain`] again on the same offset starts a fresh,
/// identical sequence.
#[derive(Debug, Clone)]
pub struct EntryList<'a> {
    decoder: DataDecoder<'a>,
    stack: Vec<Frame>,
    budget: Budget,
    failed: bool,
}

impl<'a> EntryList<'a> {
    /// Start a sequence at `offset`. The root control is validated here so a
    /// bad offset fails before any iteration.
    pub(crate) fn new(decoder: DataDecoder<'a>, offset: usize) -> Result<Self, DecodeError> {
        decoder.resolve_control(offset)?;
        Ok(Self {
            decoder,
            stack: vec![Frame {
                kind: FrameKind::Root,
                cursor: offset,
                remaining: 1,
                expect_key: false,
                depth: 0,
                resume: None,
            }],
            budget: decoder.budget(),
            failed: false,
        })
    }

    fn step(&mut self) -> Result<Option<Entry>, DecodeError> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };

            if frame.remaining == 0 {
                let done = self.stack.pop();
                if let (Some(done), Some(parent)) = (done, self.stack.last_mut()) {
                    parent.cursor = done.resume.unwrap_or(done.cursor);
                }
                continue;
            }

            if frame.kind == FrameKind::Map && frame.expect_key {
                let key_offset = frame.cursor;
                let depth = frame.depth;
                let (key, next) = self.decoder.read_key(key_offset)?;
                frame.cursor = next;
                frame.expect_key = false;
                return Ok(Some(Entry {
                    offset: key_offset,
                    depth,
                    role: EntryRole::Key,
                    data: EntryData::Value(DataValue::String(key.to_string())),
                }));
            }

            let role = match frame.kind {
                FrameKind::Root => EntryRole::Root,
                FrameKind::Map => EntryRole::MapValue,
                FrameKind::Array => EntryRole::ArrayElement,
            };
            let (cursor, depth) = (frame.cursor, frame.depth);
            frame.remaining -= 1;
            frame.expect_key = frame.kind == FrameKind::Map;

            let (entry, advance) = self.visit(cursor, depth, role)?;
            match advance {
                Advance::To(next) => {
                    if let Some(frame) = self.stack.last_mut() {
                        frame.cursor = next;
                    }
                }
                Advance::Descend(child) => self.stack.push(child),
            }
            return Ok(Some(entry));
        }
    }

    fn visit(
        &mut self,
        cursor: usize,
        depth: usize,
        role: EntryRole,
    ) -> Result<(Entry, Advance), DecodeError> {
        let ctrl = self.decoder.decode_control(cursor)?;
        let (resolved, after_pointer) = match ctrl.pointer {
            Some(_) => (self.decoder.follow(ctrl)?, Some(ctrl.payload_offset)),
            None => (ctrl, None),
        };

        let (kind, data) = match resolved.data_type {
            DataType::Map => (FrameKind::Map, EntryData::Map { size: resolved.size }),
            DataType::Array => (FrameKind::Array, EntryData::Array { size: resolved.size }),
            _ => {
                let (value, next) =
                    self.decoder.decode_from_control(resolved, depth, &mut self.budget)?;
                let entry = Entry {
                    offset: resolved.offset,
                    depth,
                    role,
                    data: EntryData::Value(value.into_value()),
                };
                return Ok((entry, Advance::To(after_pointer.unwrap_or(next))));
            }
        };

        if depth >= MAX_NESTING_DEPTH {
            return Err(DecodeError::NestingTooDeep {
                offset: resolved.offset,
                max_depth: MAX_NESTING_DEPTH,
            });
        }
        self.budget.spend(resolved.offset)?;

        let entry = Entry {
            offset: resolved.offset,
            depth,
            role,
            data,
        };
        let child = Frame {
            kind,
            cursor: resolved.payload_offset,
            remaining: resolved.size,
            expect_key: kind == FrameKind::Map,
            depth: depth + 1,
            resume: after_pointer,
        };
        Ok((entry, Advance::Descend(child)))
    }
}

impl<'a> Iterator for EntryList<'a> {
    type Item = Result<Entry, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.step() {
            Ok(entry) => entry.map(Ok),
            Err(err) => {
                self.failed = true;
                self.stack.clear();
                Some(Err(err))
            }
        }
    }
}

impl std::iter::FusedIterator for EntryList<'_> {}
