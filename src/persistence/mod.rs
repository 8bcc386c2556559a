//! The `persistence` module keeps durable messages across broker restarts.
//!
//! It is split in two layers:
//!
//! - `DbStorage`: the ordered key-value store contract (set, delete, iterate,
//!   close) with a `sled` backed implementation and an in-memory one.
//! - `MsgStorage`: translates messages to and from store entries keyed by
//!   queue name and message id, and replays them into live queues on startup.
//!
//! Entries are written only for persistent messages published to durable
//! queues and deleted again once the message is acknowledged.

pub mod keys;
pub mod memory_store;
pub mod msg_storage;
pub mod sled_store;

pub use memory_store::MemoryStore;
pub use msg_storage::{MsgStorage, RestoreReport};
pub use sled_store::SledStore;

use crate::amqp::message::CodecError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to open store at `{path}`: {source}")]
    Open {
        path: String,
        #[source]
        source: BoxError,
    },
    #[error("serialization failed: {0}")]
    Serialization(#[from] CodecError),
    #[error("store write failed: {0}")]
    StoreWrite(#[source] BoxError),
    #[error("store read failed: {0}")]
    StoreRead(#[source] BoxError),
    #[error("store is closed")]
    Closed,
}

/// Ordered byte key-value store shared by every queue.
///
/// Implementations must iterate in ascending key order and tolerate
/// concurrent calls from restore and live traffic.
pub trait DbStorage: Send + Sync {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    fn delete(&self, key: &[u8]) -> Result<(), StorageError>;

    /// Visit every entry once, in key order.
    fn iterate(&self, visit: &mut dyn FnMut(&[u8], &[u8])) -> Result<(), StorageError>;

    fn close(&self) -> Result<(), StorageError>;
}
