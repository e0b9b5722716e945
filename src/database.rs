//! Database API
//!
//! [`Database`] owns the file bytes (an owned buffer or a memory map), parses
//! the metadata once at open time and answers lookups against the search
//! tree. A successful lookup yields a [`LookupResult`], a cheap handle that
//! decodes the record only when asked.
//!
//! # Examples
//!
//! ```no_run
//! use mmdb_engine::Database;
//!
//! let db = Database::open("GeoIP2-City.mmdb")?;
//!
//! if let Some(result) = db.lookup_str("8.8.8.8")? {
//!     if let Some(country) = result.country()? {
//!         println!("{} is in {}", result.ip(), country.iso_code);
//!     }
//!     println!("network: {}", result.network());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::data_section::{DataDecoder, DecodedValue};
use crate::dump::write_dump;
use crate::entry_list::EntryList;
use crate::error::{DecodeError, LookupError, OpenError};
use crate::mmdb::format::{Metadata, MetadataReader};
use crate::mmdb::tree::SearchTree;
use crate::mmdb::types::{
    DATA_SECTION_SEPARATOR_SIZE, DEFAULT_MAX_DECODED_VALUES, DEFAULT_MAX_POINTER_DEPTH,
    METADATA_MARKER, METADATA_SEARCH_WINDOW,
};
use crate::path::{PathResolver, PathSegment};
use crate::validation::{self, ValidationReport};
use flate2::read::GzDecoder;
use lru::LruCache;
use memmap2::Mmap;
use rustc_hash::FxHasher;
use std::fmt;
use std::fs::File;
use std::hash::BuildHasherDefault;
use std::io::{self, Read};
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

type RecordCache = LruCache<usize, Arc<DecodedValue>, BuildHasherDefault<FxHasher>>;

/// Storage for database data - either owned or memory-mapped
enum DatabaseStorage {
    Owned(Vec<u8>),
    Mmap(Mmap),
}

impl DatabaseStorage {
    fn as_slice(&self) -> &[u8] {
        match self {
            DatabaseStorage::Owned(v) => v.as_slice(),
            DatabaseStorage::Mmap(m) => &m[..],
        }
    }
}

/// Options for opening a database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// LRU cache capacity for decoded records (0 = disabled)
    pub cache_capacity: usize,
    /// Longest pointer chain the decoder will follow
    pub max_pointer_depth: usize,
    /// Most values a single record decode may produce
    pub max_decoded_values: usize,
    /// How far back from the end of the file to look for metadata
    pub metadata_search_window: usize,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            cache_capacity: 0,
            max_pointer_depth: DEFAULT_MAX_POINTER_DEPTH,
            max_decoded_values: DEFAULT_MAX_DECODED_VALUES,
            metadata_search_window: METADATA_SEARCH_WINDOW,
        }
    }
}

/// Builder for opening databases with custom configuration
///
/// Created via [`Database::opener`]. Use the fluent API to configure
/// options, then call [`open`](DatabaseOpener::open) or
/// [`from_bytes`](DatabaseOpener::from_bytes) to load the database.
///
/// ```no_run
/// use mmdb_engine::Database;
///
/// let db = Database::opener()
///     .cache_capacity(10_000)
///     .max_pointer_depth(8)
///     .open("GeoLite2-Country.mmdb")?;
/// # Ok::<(), mmdb_engine::OpenError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct DatabaseOpener {
    options: DatabaseOptions,
}

impl DatabaseOpener {
    /// Set LRU cache capacity
    ///
    /// Repeated lookups landing on the same record skip decoding. With a
    /// capacity of 0 (the default) no cache exists and lookups take no lock.
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.options.cache_capacity = capacity;
        self
    }

    /// Disable caching entirely
    pub fn no_cache(mut self) -> Self {
        self.options.cache_capacity = 0;
        self
    }

    /// Cap on pointer-to-pointer chains (default 16)
    pub fn max_pointer_depth(mut self, depth: usize) -> Self {
        self.options.max_pointer_depth = depth;
        self
    }

    /// Cap on values produced by one record decode (default 262144)
    ///
    /// Records reuse values through pointers, so a few hundred bytes can
    /// describe billions of values. Decodes past the cap fail with
    /// [`DecodeError::TooManyValues`].
    pub fn max_decoded_values(mut self, max_values: usize) -> Self {
        self.options.max_decoded_values = max_values;
        self
    }

    /// Bytes from the end of the file searched for the metadata marker
    /// (default 128KB)
    pub fn metadata_search_window(mut self, bytes: usize) -> Self {
        self.options.metadata_search_window = bytes;
        self
    }

    /// Configured options
    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// Open a database file
    ///
    /// Plain files are memory-mapped. Files ending in `.gz` are inflated
    /// into memory.
    pub fn open(self, path: impl AsRef<Path>) -> Result<Database, OpenError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| OpenError::Io(format!("Failed to open {}: {}", path.display(), e)))?;

        let storage = if is_gzip(path) {
            let mut bytes = Vec::new();
            GzDecoder::new(file).read_to_end(&mut bytes).map_err(|e| {
                OpenError::Io(format!("Failed to decompress {}: {}", path.display(), e))
            })?;
            DatabaseStorage::Owned(bytes)
        } else {
            // SAFETY: the map is read-only and owned by the Database; a file
            // truncated underneath it is outside what this crate can guard.
            let mmap = unsafe { Mmap::map(&file) }
                .map_err(|e| OpenError::Io(format!("Failed to mmap {}: {}", path.display(), e)))?;
            DatabaseStorage::Mmap(mmap)
        };

        Database::from_storage(storage, self.options)
    }

    /// Load a database from an in-memory image
    pub fn from_bytes(self, bytes: Vec<u8>) -> Result<Database, OpenError> {
        Database::from_storage(DatabaseStorage::Owned(bytes), self.options)
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

/// An open MaxMind DB
///
/// Read-only after open. `Send + Sync`: share it behind an `Arc` and look up
/// from any number of threads.
pub struct Database {
    storage: DatabaseStorage,
    metadata: Metadata,
    /// First byte of the data section
    data_start: usize,
    /// Offset of the metadata marker, which ends the data section
    data_end: usize,
    ipv4_root: u32,
    options: DatabaseOptions,
    cache: Option<Mutex<RecordCache>>,
}

impl Database {
    /// Open a database file with default options
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OpenError> {
        Self::opener().open(path)
    }

    /// Load a database from an in-memory image with default options
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, OpenError> {
        Self::opener().from_bytes(bytes)
    }

    /// Start configuring how a database is opened
    pub fn opener() -> DatabaseOpener {
        DatabaseOpener::default()
    }

    fn from_storage(storage: DatabaseStorage, options: DatabaseOptions) -> Result<Self, OpenError> {
        let data = storage.as_slice();
        let reader = MetadataReader::new(options.metadata_search_window, options.max_pointer_depth);
        let (metadata, marker_offset) = reader.read(data)?;

        let tree_size = metadata.tree_size();
        let data_start = tree_size
            .checked_add(DATA_SECTION_SEPARATOR_SIZE)
            .filter(|&start| start <= marker_offset)
            .ok_or_else(|| {
                OpenError::InvalidLayout(format!(
                    "search tree of {} bytes and separator do not fit before metadata at offset {}",
                    tree_size, marker_offset
                ))
            })?;

        let tree = SearchTree::new(
            &data[..tree_size],
            metadata.node_count,
            metadata.record_size,
            metadata.ip_version,
            marker_offset - data_start,
        )?;
        let ipv4_root = tree.ipv4_root();

        debug!(
            database_type = %metadata.database_type,
            node_count = metadata.node_count,
            record_size = metadata.record_size.bits(),
            ip_version = ?metadata.ip_version,
            file_size = data.len(),
            data_section_size = marker_offset - data_start,
            "opened MaxMind DB"
        );

        let cache = NonZeroUsize::new(options.cache_capacity)
            .map(|capacity| Mutex::new(LruCache::with_hasher(capacity, BuildHasherDefault::default())));

        Ok(Self {
            storage,
            metadata,
            data_start,
            data_end: marker_offset,
            ipv4_root,
            options,
            cache,
        })
    }

    /// Parsed metadata
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The raw metadata map, decoded on demand
    pub fn metadata_value(&self) -> Result<DecodedValue, DecodeError> {
        let block = &self.as_bytes()[self.data_end + METADATA_MARKER.len()..];
        DataDecoder::new(block)
            .with_max_pointer_depth(self.options.max_pointer_depth)
            .with_max_decoded_values(self.options.max_decoded_values)
            .decode_at(0)
    }

    /// Options the database was opened with
    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// The whole file image
    pub fn as_bytes(&self) -> &[u8] {
        self.storage.as_slice()
    }

    /// The search tree
    pub fn search_tree(&self) -> SearchTree<'_> {
        SearchTree::from_parts(
            &self.as_bytes()[..self.metadata.tree_size()],
            self.metadata.node_count,
            self.metadata.record_size,
            self.metadata.ip_version,
            self.data_section().len(),
            self.ipv4_root,
        )
    }

    /// Bytes of the data section
    pub fn data_section(&self) -> &[u8] {
        &self.as_bytes()[self.data_start..self.data_end]
    }

    /// Decoder over the data section
    pub fn decoder(&self) -> DataDecoder<'_> {
        DataDecoder::new(self.data_section())
            .with_max_pointer_depth(self.options.max_pointer_depth)
            .with_max_decoded_values(self.options.max_decoded_values)
    }

    /// Look up an IP address
    ///
    /// `Ok(None)` means the address is in no network of this database.
    pub fn lookup(&self, ip: IpAddr) -> Result<Option<LookupResult<'_>>, LookupError> {
        let hit = self.search_tree().locate(ip).inspect_err(|err| {
            if err.is_corruption() {
                warn!(%ip, error = %err, "corrupt search tree");
            }
        })?;

        trace!(%ip, ?hit, "tree lookup");
        Ok(hit.map(|hit| LookupResult {
            db: self,
            ip,
            data_offset: hit.data_offset,
            prefix_len: hit.prefix_len,
        }))
    }

    /// Parse `ip` and look it up
    pub fn lookup_str(&self, ip: &str) -> Result<Option<LookupResult<'_>>, LookupError> {
        let addr = ip
            .trim()
            .parse::<IpAddr>()
            .map_err(|_| LookupError::InvalidAddress(ip.to_string()))?;
        self.lookup(addr)
    }

    /// Check the whole database: tree structure, separator, every record
    pub fn verify(&self) -> ValidationReport {
        validation::verify(self)
    }

    /// Decode the record at a data-section offset, through the cache when
    /// one is configured. Cache hits share the cached value.
    pub fn record(&self, offset: usize) -> Result<Arc<DecodedValue>, DecodeError> {
        let Some(cache) = &self.cache else {
            return self.decode_record(offset).map(Arc::new);
        };

        if let Some(hit) = lock(cache).get(&offset) {
            return Ok(Arc::clone(hit));
        }
        let value = Arc::new(self.decode_record(offset)?);
        lock(cache).put(offset, Arc::clone(&value));
        Ok(value)
    }

    /// Number of records currently cached
    pub fn cached_records(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| lock(cache).len())
    }

    fn decode_record(&self, offset: usize) -> Result<DecodedValue, DecodeError> {
        self.decoder().decode_at(offset).inspect_err(|err| {
            warn!(offset, error = %err, "corrupt data record");
        })
    }
}

fn lock(cache: &Mutex<RecordCache>) -> MutexGuard<'_, RecordCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("database_type", &self.metadata.database_type)
            .field("ip_version", &self.metadata.ip_version)
            .field("node_count", &self.metadata.node_count)
            .field("record_size", &self.metadata.record_size)
            .field("file_size", &self.as_bytes().len())
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

/// ISO 3166-1 country of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Country {
    /// Two-letter country code
    pub iso_code: String,
}

/// ISO 3166-2 subdivision of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Subdivision code without the country prefix, e.g. "NY"
    pub iso_code: String,
}

/// An address masked to a prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Network {
    addr: IpAddr,
    prefix_len: u8,
}

impl Network {
    /// Mask `ip` to its first `prefix_len` bits
    pub fn new(ip: IpAddr, prefix_len: u8) -> Self {
        let addr = match ip {
            IpAddr::V4(v4) => {
                let bits = u32::from(v4);
                let mask = u32::MAX.checked_shl(32 - prefix_len.min(32) as u32).unwrap_or(0);
                IpAddr::V4((bits & mask).into())
            }
            IpAddr::V6(v6) => {
                let bits = u128::from(v6);
                let mask = u128::MAX.checked_shl(128 - prefix_len.min(128) as u32).unwrap_or(0);
                IpAddr::V6((bits & mask).into())
            }
        };
        Self { addr, prefix_len }
    }

    /// First address of the network
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Prefix length
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// True if `ip` falls inside this network
    pub fn contains(&self, ip: IpAddr) -> bool {
        let same_family = self.addr.is_ipv4() == ip.is_ipv4();
        same_family && Network::new(ip, self.prefix_len).addr == self.addr
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

/// A successful lookup
///
/// Holds only the record's offset; every accessor decodes on demand.
#[derive(Debug, Clone, Copy)]
pub struct LookupResult<'db> {
    db: &'db Database,
    ip: IpAddr,
    data_offset: usize,
    prefix_len: u8,
}

impl<'db> LookupResult<'db> {
    /// The queried address
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Offset of the record in the data section
    pub fn offset(&self) -> usize {
        self.data_offset
    }

    /// Prefix length of the matched network, in the queried address family
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// The matched network
    pub fn network(&self) -> Network {
        Network::new(self.ip, self.prefix_len)
    }

    /// The full decoded record
    pub fn value(&self) -> Result<Arc<DecodedValue>, DecodeError> {
        self.db.record(self.data_offset)
    }

    /// Depth-first sequence of the record's entries
    pub fn iterate(&self) -> Result<EntryList<'db>, DecodeError> {
        self.db.decoder().decode_chain(self.data_offset)
    }

    /// Value at `path`, decoding only what the walk needs
    pub fn path(&self, path: &[PathSegment]) -> Result<Option<DecodedValue>, DecodeError> {
        PathResolver::new(self.db.decoder()).resolve(self.data_offset, path)
    }

    /// Value at a path of strings; segments meeting an array are indices
    pub fn path_str(&self, path: &[&str]) -> Result<Option<DecodedValue>, DecodeError> {
        PathResolver::new(self.db.decoder()).resolve_str(self.data_offset, path)
    }

    /// `country.iso_code`
    pub fn country(&self) -> Result<Option<Country>, DecodeError> {
        Ok(self.iso_code(&["country", "iso_code"])?.map(|iso_code| Country { iso_code }))
    }

    /// `subdivisions.0.iso_code`
    pub fn region(&self) -> Result<Option<Region>, DecodeError> {
        Ok(self
            .iso_code(&["subdivisions", "0", "iso_code"])?
            .map(|iso_code| Region { iso_code }))
    }

    fn iso_code(&self, path: &[&str]) -> Result<Option<String>, DecodeError> {
        Ok(self
            .path_str(path)?
            .and_then(|value| value.as_str().map(str::to_string)))
    }

    /// Write an `mmdblookup`-style dump of the record
    pub fn dump<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        let entries = self
            .iterate()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        write_dump(entries, out)
    }

    /// The record as JSON
    pub fn to_json(&self) -> Result<serde_json::Value, DecodeError> {
        Ok(self.value()?.value().to_json())
    }
}
