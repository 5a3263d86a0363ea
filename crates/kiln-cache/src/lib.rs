//! On-disk cache for transformed sources.
//!
//! ## On-disk layout
//!
//! Each project gets `<cache_directory>/jest-transform-cache-<project id>-<kiln version>/`:
//! - `<2-char shard>/<file stem>_<key>`: `checksum + "\n" + code`, verified on read
//! - `<2-char shard>/<file stem>_<key>.map`: the serialized source map, if any
//!
//! All writes go through a temp file and a rename, so concurrent processes
//! sharing one cache directory never observe partial entries.

mod disk;
mod error;
mod key;
mod util;

pub use disk::{CacheEntryPaths, DiskCache};
pub use error::{CacheError, Result};
pub use key::{digest, CacheKey, CACHE_VERSION, DIGEST_LEN};
pub use util::atomic_write;
