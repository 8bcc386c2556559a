//! Message storage
//!
//! Durability layer between queues and the persistent store. A message is
//! written under `(queue, id)` before it becomes visible in a durable queue
//! and deleted once it has been acknowledged. On startup `restore` replays
//! every entry into the live queue of the same name.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use super::keys::{message_key, parse_message_key};
use super::{DbStorage, StorageError};
use crate::amqp::{Message, ProtoVersion};
use crate::queue::Queue;

/// Outcome of replaying the store into live queues.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    /// Entries whose queue is not declared (deleted administratively).
    pub skipped: usize,
    /// Entries that could not be decoded.
    pub corrupt: usize,
    /// Highest restored message id, if anything was restored.
    pub max_id: Option<u64>,
    pub per_queue: BTreeMap<String, usize>,
}

pub struct MsgStorage {
    db: Arc<dyn DbStorage>,
    proto: ProtoVersion,
    closed: AtomicBool,
}

impl MsgStorage {
    pub fn new(db: Arc<dyn DbStorage>, proto: ProtoVersion) -> Self {
        Self {
            db,
            proto,
            closed: AtomicBool::new(false),
        }
    }

    /// Persist `message` for `queue`. On error the message must not be
    /// treated as durable.
    pub fn add(&self, message: &Message, queue: &str) -> Result<(), StorageError> {
        let data = message.marshal(self.proto)?;
        self.db.set(&message_key(queue, message.id), &data)
    }

    pub fn delete(&self, id: u64, queue: &str) -> Result<(), StorageError> {
        self.db.delete(&message_key(queue, id))
    }

    /// Replay every persisted message into the matching live queue, in key
    /// order (publish order within a queue).
    pub fn restore(
        &self,
        queues: &HashMap<String, Arc<Queue>>,
    ) -> Result<RestoreReport, StorageError> {
        let mut report = RestoreReport::default();
        let proto = self.proto;

        self.db.iterate(&mut |key, value| {
            let Some((queue_name, id)) = parse_message_key(key) else {
                return;
            };
            let Some(queue) = queues.get(queue_name) else {
                debug!(queue = queue_name, id, "skipping entry for unknown queue");
                report.skipped += 1;
                return;
            };
            match Message::unmarshal(value, proto) {
                Ok(message) => {
                    report.max_id = Some(report.max_id.map_or(message.id, |m| m.max(message.id)));
                    *report.per_queue.entry(queue_name.to_string()).or_default() += 1;
                    report.restored += 1;
                    queue.push_from_storage(message);
                }
                Err(e) => {
                    warn!(queue = queue_name, id, error = %e, "failed to decode stored message");
                    report.corrupt += 1;
                }
            }
        })?;

        info!(
            restored = report.restored,
            skipped = report.skipped,
            corrupt = report.corrupt,
            "restored messages from storage"
        );
        Ok(report)
    }

    /// Remove every entry stored for `queue`. Returns how many were removed.
    pub fn purge(&self, queue: &str) -> Result<usize, StorageError> {
        let mut keys = Vec::new();
        self.db.iterate(&mut |key, _| {
            if matches!(parse_message_key(key), Some((name, _)) if name == queue) {
                keys.push(key.to_vec());
            }
        })?;
        for key in &keys {
            self.db.delete(key)?;
        }
        Ok(keys.len())
    }

    /// Per-queue count of persisted entries, regardless of declared queues.
    pub fn counts(&self) -> Result<BTreeMap<String, usize>, StorageError> {
        let mut counts = BTreeMap::new();
        self.db.iterate(&mut |key, _| {
            if let Some((name, _)) = parse_message_key(key) {
                *counts.entry(name.to_string()).or_default() += 1;
            }
        })?;
        Ok(counts)
    }

    /// Release the underlying store. Later calls are no-ops.
    pub fn close(&self) -> Result<(), StorageError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.db.close()
    }
}

impl std::fmt::Debug for MsgStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgStorage")
            .field("proto", &self.proto)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
