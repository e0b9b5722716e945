//! mmdb-engine - Read-Only MaxMind DB Engine
//!
//! Looks up IP addresses in MaxMind DB (`.mmdb`) files, the binary format
//! behind GeoIP2/GeoLite2 and many other IP-keyed databases, and decodes the
//! records they point at.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mmdb_engine::{path, Database};
//!
//! let db = Database::open("GeoLite2-City.mmdb")?;
//! println!("{} built at {}", db.metadata().database_type, db.metadata().build_epoch);
//!
//! if let Some(result) = db.lookup_str("84.38.138.44")? {
//!     println!("network: {}", result.network());
//!
//!     // Decode only what the path needs
//!     if let Some(name) = result.path(&path!["city", "names", "en"])? {
//!         println!("city: {}", name.as_str().unwrap_or("?"));
//!     }
//!
//!     // Or the whole record
//!     println!("{}", result.to_json()?);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  MMDB File Layout                    │
//! ├──────────────────────────────────────┤
//! │  1. Search Tree (binary trie)        │
//! │  2. 16 zero bytes                    │
//! │  3. Data Section (typed values)      │
//! │  4. "\xAB\xCD\xEFMaxMind.com"        │
//! │  5. Metadata (a data-section map)    │
//! └──────────────────────────────────────┘
//! ```
//!
//! - [`mmdb`]: metadata parsing and the search tree walk (IP -> offset)
//! - [`data_section`]: the tagged-type decoder (offset -> value)
//! - [`entry_list`]: lazy depth-first enumeration of a record
//! - [`path`]: key/index path lookups that skip everything off the path
//! - [`database`]: the facade tying those together
//!
//! Every read is bounds-checked. A damaged file produces a [`DecodeError`]
//! (or an [`OpenError`] at open time), never a panic.
//!
//! # Key Features
//!
//! - **Zero-Copy Loading**: plain files are memory-mapped
//! - **Gzip**: `*.gz` files are inflated transparently
//! - **Lazy Decoding**: lookups return an offset; values decode on demand
//! - **Thread-Safe**: `Database` is `Send + Sync`
//! - **Optional Cache**: LRU of decoded records keyed by offset

#![warn(missing_docs)]
#![warn(clippy::all)]

// Module declarations
/// Data section decoding
pub mod data_section;
/// Database facade
pub mod database;
/// Human-readable record dumps
pub mod dump;
/// Depth-first entry enumeration
pub mod entry_list;
/// Error types for open, lookup, and decode
pub mod error;
/// MMDB format implementation
pub mod mmdb;
/// Path lookups into decoded records
pub mod path;
mod source;
/// Whole-database verification
pub mod validation;

// Re-exports for Rust consumers

/// Database handle and lookup results
pub use crate::database::{
    Country, Database, DatabaseOpener, DatabaseOptions, LookupResult, Network, Region,
};

/// Decoder and value types
pub use crate::data_section::{Control, DataDecoder, DataType, DataValue, DecodedValue};

pub use crate::entry_list::{Entry, EntryData, EntryList, EntryRole};
pub use crate::error::{DecodeError, LookupError, OpenError};
pub use crate::mmdb::{IpVersion, Metadata, RecordSize};
pub use crate::path::{PathResolver, PathSegment};
pub use crate::validation::{ValidationReport, ValidationStats};

// Version information
/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
