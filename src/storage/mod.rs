//! Persistent stores for peer addresses and content-hash records
//!
//! Uses sled embedded databases; every store owns its own directory.

pub mod cacher;
pub mod hash_cache;
pub mod records;

pub use cacher::{load_record, Cacher, Marshaler, SledCacher, StorageError, Unmarshaler};
pub use hash_cache::HashCache;
pub use records::{AddrInfo, ContentHash, HashRecord, RECORD_VERSION};
