//! Broker engine
//!
//! Owns what the delivery core needs from a virtual host:
//! - the name -> queue mapping and the set of known exchanges
//! - the message id generator
//! - the publish path (persist first, then make visible)
//! - startup recovery from `MsgStorage`
//!
//! Run `restore` before accepting any publish or consume so replayed and
//! live messages never interleave.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use super::router::{DefaultExchangeRouter, Router};
use crate::amqp::{Message, MessageIdGenerator, Properties};
use crate::persistence::{MsgStorage, RestoreReport, StorageError};
use crate::queue::Queue;

/// Longest queue name a short string can carry.
pub const MAX_QUEUE_NAME_LEN: usize = 255;

const DEFAULT_EXCHANGES: [&str; 5] = ["", "amq.direct", "amq.fanout", "amq.topic", "amq.headers"];

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("invalid queue name `{0}`")]
    InvalidQueueName(String),
    #[error("queue `{0}` not found")]
    QueueNotFound(String),
    #[error("queue `{name}` has {consumers} consumer(s)")]
    QueueInUse { name: String, consumers: usize },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Basic.Publish staged on a channel until its content arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPublish {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
}

#[derive(Debug)]
pub enum PublishOutcome {
    Routed { id: u64, queues: usize },
    /// No queue matched; the message is handed back for a Basic.Return.
    Unroutable(Message),
}

pub struct Broker {
    exchanges: RwLock<HashSet<String>>,
    queues: RwLock<HashMap<String, Arc<Queue>>>,
    storage: Option<Arc<MsgStorage>>,
    ids: MessageIdGenerator,
    router: Box<dyn Router>,
    default_prefetch: (u16, u32),
}

impl Broker {
    /// Create a broker. Without `storage` every queue behaves as transient.
    pub fn new(storage: Option<Arc<MsgStorage>>) -> Self {
        Self {
            exchanges: RwLock::new(DEFAULT_EXCHANGES.iter().map(|e| e.to_string()).collect()),
            queues: RwLock::new(HashMap::new()),
            storage,
            ids: MessageIdGenerator::from_clock(),
            router: Box::new(DefaultExchangeRouter),
            default_prefetch: (0, 0),
        }
    }

    pub fn with_router(mut self, router: impl Router + 'static) -> Self {
        self.router = Box::new(router);
        self
    }

    /// Limits applied to the QoS of every newly opened channel.
    pub fn with_default_prefetch(mut self, prefetch_count: u16, prefetch_size: u32) -> Self {
        self.default_prefetch = (prefetch_count, prefetch_size);
        self
    }

    pub fn default_prefetch(&self) -> (u16, u32) {
        self.default_prefetch
    }

    pub fn storage(&self) -> Option<&Arc<MsgStorage>> {
        self.storage.as_ref()
    }

    pub fn declare_exchange(&self, name: &str) {
        self.exchanges.write().insert(name.to_string());
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.exchanges.read().contains(name)
    }

    /// Declare a queue, or return the existing one of that name. An empty
    /// name gets a server-generated one.
    pub fn declare_queue(&self, name: &str, durable: bool) -> Result<Arc<Queue>, BrokerError> {
        let name = if name.is_empty() {
            format!("amq.gen-{}", uuid::Uuid::new_v4())
        } else {
            name.to_string()
        };
        if name.len() > MAX_QUEUE_NAME_LEN {
            return Err(BrokerError::InvalidQueueName(name));
        }

        let mut queues = self.queues.write();
        if let Some(existing) = queues.get(&name) {
            return Ok(existing.clone());
        }
        let queue = Arc::new(Queue::new(name.clone(), durable, self.storage.clone()));
        queues.insert(name.clone(), queue.clone());
        debug!(queue = %name, durable, "queue declared");
        Ok(queue)
    }

    pub fn get_queue(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.read().get(name).cloned()
    }

    /// Snapshot of the name -> queue mapping.
    pub fn queues(&self) -> HashMap<String, Arc<Queue>> {
        self.queues.read().clone()
    }

    /// Remove an unused queue together with its persisted messages.
    /// Returns the number of ready messages dropped.
    pub fn delete_queue(&self, name: &str) -> Result<usize, BrokerError> {
        let not_found = || BrokerError::QueueNotFound(name.to_string());
        let queue = {
            let mut queues = self.queues.write();
            let consumers = queues.get(name).ok_or_else(not_found)?.consumer_count();
            if consumers > 0 {
                return Err(BrokerError::QueueInUse {
                    name: name.to_string(),
                    consumers,
                });
            }
            queues.remove(name).ok_or_else(not_found)?
        };

        let dropped = queue.purge();
        if let Some(storage) = queue.storage() {
            let leftover = storage.purge(name)?;
            if leftover > 0 {
                debug!(queue = name, leftover, "removed leftover storage entries");
            }
        }
        info!(queue = name, dropped, "queue deleted");
        Ok(dropped)
    }

    /// Replay persisted messages into the declared queues.
    pub fn restore(&self) -> Result<RestoreReport, BrokerError> {
        let Some(storage) = &self.storage else {
            return Ok(RestoreReport::default());
        };
        let queues = self.queues();
        let report = storage.restore(&queues)?;
        if let Some(max_id) = report.max_id {
            self.ids.advance_past(max_id);
        }
        if report.skipped > 0 {
            warn!(skipped = report.skipped, "stored messages for undeclared queues were not restored");
        }
        Ok(report)
    }

    pub fn next_message_id(&self) -> u64 {
        self.ids.next_id()
    }

    /// Complete a publish: assign the id, route, persist for every durable
    /// destination and only then enqueue everywhere. If any write fails the
    /// entries already written are removed and nothing is enqueued.
    pub fn publish(
        &self,
        publish: PendingPublish,
        properties: Properties,
        body: Vec<u8>,
    ) -> Result<PublishOutcome, BrokerError> {
        let mut message = Message::new(
            self.ids.next_id(),
            publish.exchange,
            publish.routing_key,
            properties,
            body,
        );
        message.mandatory = publish.mandatory;
        message.immediate = publish.immediate;

        let targets: Vec<Arc<Queue>> = {
            let queues = self.queues.read();
            let mut seen = HashSet::new();
            self.router
                .route(&message.exchange, &message.routing_key)
                .into_iter()
                .filter(|name| seen.insert(name.clone()))
                .filter_map(|name| queues.get(&name).cloned())
                .collect()
        };
        if targets.is_empty() {
            debug!(exchange = %message.exchange, routing_key = %message.routing_key, "message unroutable");
            return Ok(PublishOutcome::Unroutable(message));
        }

        let mut persisted: Vec<&Arc<Queue>> = Vec::new();
        for queue in &targets {
            let Some(storage) = queue.storage().filter(|_| message.is_persistent()) else {
                continue;
            };
            if let Err(e) = storage.add(&message, queue.name()) {
                error!(queue = %queue.name(), id = message.id, error = %e, "failed to persist message");
                for done in persisted {
                    if let Some(storage) = done.storage() {
                        if let Err(e) = storage.delete(message.id, done.name()) {
                            warn!(queue = %done.name(), id = message.id, error = %e, "failed to roll back persisted message");
                        }
                    }
                }
                return Err(e.into());
            }
            persisted.push(queue);
        }

        let id = message.id;
        let count = targets.len();
        for queue in targets {
            queue.push(message.clone());
        }
        Ok(PublishOutcome::Routed { id, queues: count })
    }

    /// Release the message store. Safe to call more than once.
    pub fn close(&self) -> Result<(), BrokerError> {
        if let Some(storage) = &self.storage {
            storage.close()?;
        }
        Ok(())
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("exchanges", &self.exchanges.read().len())
            .field("queues", &self.queues.read().len())
            .field("storage", &self.storage)
            .finish()
    }
}
