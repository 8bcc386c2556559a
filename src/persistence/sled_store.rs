//! Persistent store backed by `sled`
//!
//! All message entries live in the default tree of one sled database. sled
//! keeps keys sorted, which is what restore relies on for publish order.

use std::sync::atomic::{AtomicBool, Ordering};

use sled::Db;
use tracing::debug;

use super::{DbStorage, StorageError};

pub struct SledStore {
    db: Db,
    closed: AtomicBool,
}

impl SledStore {
    /// Open or create a sled database at `path`.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| StorageError::Open {
            path: path.to_string(),
            source: Box::new(e),
        })?;
        debug!(path, recovered = db.was_recovered(), "opened sled store");
        Ok(Self {
            db,
            closed: AtomicBool::new(false),
        })
    }

    /// Open a throwaway database that is removed when dropped.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StorageError::Open {
                path: "<temporary>".to_string(),
                source: Box::new(e),
            })?;
        Ok(Self {
            db,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl DbStorage for SledStore {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.db
            .insert(key, value)
            .map(|_| ())
            .map_err(|e| StorageError::StoreWrite(Box::new(e)))
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.db
            .remove(key)
            .map(|_| ())
            .map_err(|e| StorageError::StoreWrite(Box::new(e)))
    }

    fn iterate(&self, visit: &mut dyn FnMut(&[u8], &[u8])) -> Result<(), StorageError> {
        self.ensure_open()?;
        for entry in self.db.iter() {
            let (key, value) = entry.map_err(|e| StorageError::StoreRead(Box::new(e)))?;
            visit(&key, &value);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.db
            .flush()
            .map(|_| ())
            .map_err(|e| StorageError::StoreWrite(Box::new(e)))
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
