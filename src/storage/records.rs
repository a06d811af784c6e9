//! Persisted record shapes
//!
//! Both stores hold JSON documents; each carries a `version` so that the
//! layout can evolve without a separate schema table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Layout version written into every record
pub const RECORD_VERSION: u32 = 1;

/// A content hash (BLAKE3, 32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Hash the given content
    pub fn from_data(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({}...)", &self.to_hex()[..8])
    }
}

/// A peer id and the addresses it can be reached at
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrInfo {
    #[serde(default = "record_version")]
    pub version: u32,
    pub id: String,
    pub addrs: BTreeSet<String>,
}

impl AddrInfo {
    pub fn new<I, S>(id: impl Into<String>, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            version: RECORD_VERSION,
            id: id.into(),
            addrs: addrs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_addrs(&self) -> bool {
        !self.addrs.is_empty()
    }
}

/// Where a piece of content can be fetched from, and what is known about it
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HashRecord {
    #[serde(default = "record_version")]
    pub version: u32,
    pub hash: ContentHash,
    /// Opaque metadata supplied by the storage layer
    pub info: serde_json::Value,
    /// The peer that advertised this hash
    pub provider: AddrInfo,
    /// Unix seconds of the advertisement
    pub updated_at: u64,
}

impl HashRecord {
    pub fn new(hash: ContentHash, info: serde_json::Value, provider: AddrInfo) -> Self {
        Self {
            version: RECORD_VERSION,
            hash,
            info,
            provider,
            updated_at: unix_now(),
        }
    }
}

fn record_version() -> u32 {
    RECORD_VERSION
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
