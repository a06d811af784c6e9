//! Content-hash provenance cache

use std::sync::Arc;
use tracing::{debug, warn};

use super::cacher::{load_record, Cacher, StorageError};
use super::records::{ContentHash, HashRecord};

/// Maps a content hash to the best-known record of where it lives.
///
/// The newest advertisement wins, except that a record with no provider
/// address never displaces one that has an address.
pub struct HashCache {
    cacher: Arc<dyn Cacher>,
}

impl HashCache {
    pub fn new(cacher: Arc<dyn Cacher>) -> Self {
        Self { cacher }
    }

    /// Record an advertisement. Returns whether the stored record changed.
    pub fn put(&self, record: &HashRecord) -> Result<bool, StorageError> {
        let key = record.hash.to_hex();

        if let Some(existing) = self.get(&record.hash)? {
            if existing.provider.has_addrs() && !record.provider.has_addrs() {
                debug!("Keeping reachable provider for {}", record.hash);
                return Ok(false);
            }
            if existing.updated_at > record.updated_at {
                debug!("Ignoring stale advertisement for {}", record.hash);
                return Ok(false);
            }
        }

        self.cacher.store(&key, record)?;
        Ok(true)
    }

    pub fn get(&self, hash: &ContentHash) -> Result<Option<HashRecord>, StorageError> {
        match load_record::<HashRecord>(self.cacher.as_ref(), &hash.to_hex()) {
            Ok(record) => Ok(Some(record)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn remove(&self, hash: &ContentHash) -> Result<(), StorageError> {
        self.cacher.remove(&hash.to_hex())
    }

    /// Every cached hash; keys that do not parse as hashes are skipped
    pub fn hashes(&self) -> Result<Vec<ContentHash>, StorageError> {
        Ok(self
            .cacher
            .keys()?
            .into_iter()
            .filter_map(|key| match ContentHash::from_hex(&key) {
                Ok(hash) => Some(hash),
                Err(e) => {
                    warn!("Skipping malformed hash key {}: {}", key, e);
                    None
                }
            })
            .collect())
    }

    pub fn close(&self) -> Result<(), StorageError> {
        self.cacher.close()
    }
}
