//! MaxMind DB (MMDB) file structure
//!
//! The format-level pieces of the engine: everything needed to get from a
//! file image to a data-section offset. Decoding what lives at that offset
//! is `crate::data_section`'s job.
//!
//! ## Architecture
//!
//! - **types**: format constants and tree geometry
//! - **format**: metadata marker search and metadata parsing
//! - **tree**: search tree traversal for IP lookups

pub mod format;
pub mod tree;
pub mod types;

pub use format::{find_metadata_marker, Metadata, MetadataReader};
pub use tree::{SearchTree, TreeHit};
pub use types::{IpVersion, RecordSize, METADATA_MARKER};
