//! Key-value cache over a sled embedded database

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionResult, TransactionError};
use sled::{Db, Tree};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store is closed")]
    Closed,
}

/// Values that can be written to a [`Cacher`]
pub trait Marshaler {
    fn marshal(&self) -> Result<Vec<u8>, StorageError>;
}

/// Values that can be filled from a [`Cacher`]
pub trait Unmarshaler {
    fn unmarshal(&mut self, bytes: &[u8]) -> Result<(), StorageError>;
}

impl<T: Serialize> Marshaler for T {
    fn marshal(&self) -> Result<Vec<u8>, StorageError> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl<T: DeserializeOwned> Unmarshaler for T {
    fn unmarshal(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        *self = serde_json::from_slice(bytes)?;
        Ok(())
    }
}

/// Minimal persistent store contract
pub trait Cacher: Send + Sync {
    /// Serialize `value` and write it under `key`
    fn store(&self, key: &str, value: &dyn Marshaler) -> Result<(), StorageError>;

    /// Read `key` into `out`; `StorageError::NotFound` if absent
    fn load(&self, key: &str, out: &mut dyn Unmarshaler) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// All keys, in key order
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Release the database handle. Safe to call more than once.
    fn close(&self) -> Result<(), StorageError>;
}

/// Typed convenience over [`Cacher::load`]
pub fn load_record<T>(cacher: &dyn Cacher, key: &str) -> Result<T, StorageError>
where
    T: DeserializeOwned + Default,
{
    let mut out = T::default();
    cacher.load(key, &mut out)?;
    Ok(out)
}

/// A [`Cacher`] owning one sled database and one named tree inside it
pub struct SledCacher {
    path: PathBuf,
    namespace: String,
    handle: RwLock<Option<(Db, Tree)>>,
}

impl SledCacher {
    /// Open or create the store at `path`. Each path may be opened by one
    /// handle at a time.
    pub fn open(path: impl AsRef<Path>, namespace: &str) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path)?;
        let tree = db.open_tree(namespace)?;

        info!("Opened {} store at {:?} ({} records)", namespace, path, tree.len());

        Ok(Self {
            path,
            namespace: namespace.to_string(),
            handle: RwLock::new(Some((db, tree))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_closed(&self) -> bool {
        self.handle.read().is_none()
    }

    /// Number of records, 0 once closed
    pub fn len(&self) -> usize {
        self.tree().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn tree(&self) -> Result<Tree, StorageError> {
        self.handle
            .read()
            .as_ref()
            .map(|(_, tree)| tree.clone())
            .ok_or(StorageError::Closed)
    }
}

impl Cacher for SledCacher {
    fn store(&self, key: &str, value: &dyn Marshaler) -> Result<(), StorageError> {
        let bytes = value.marshal()?;
        let tree = self.tree()?;

        tree.transaction(|tx| -> ConflictableTransactionResult<(), sled::Error> {
            tx.insert(key.as_bytes(), bytes.as_slice())?;
            Ok(())
        })
        .map_err(|err| match err {
            TransactionError::Abort(e) | TransactionError::Storage(e) => StorageError::Database(e),
        })?;

        debug!("{}: stored {} ({} bytes)", self.namespace, key, bytes.len());
        Ok(())
    }

    fn load(&self, key: &str, out: &mut dyn Unmarshaler) -> Result<(), StorageError> {
        let value = self
            .tree()?
            .get(key.as_bytes())?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        out.unmarshal(&value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.tree()?.remove(key.as_bytes())?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for item in self.tree()?.iter().keys() {
            let key = item?;
            match String::from_utf8(key.to_vec()) {
                Ok(k) => keys.push(k),
                Err(_) => warn!("{}: skipping non-UTF-8 key", self.namespace),
            }
        }
        Ok(keys)
    }

    fn close(&self) -> Result<(), StorageError> {
        let Some((db, tree)) = self.handle.write().take() else {
            return Ok(());
        };
        tree.flush()?;
        db.flush()?;
        drop(tree);
        drop(db);
        info!("Closed {} store at {:?}", self.namespace, self.path);
        Ok(())
    }
}
