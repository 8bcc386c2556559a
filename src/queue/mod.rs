//! Queue management
//!
//! A `Queue` holds its ready messages in delivery order and the consumers
//! attached to it. Consumers pull from the head; the queue only tells them
//! when there may be something to pull.
//!
//! Concurrency note: ready list and consumer registry sit behind one mutex
//! that is never held across storage I/O or a send to a client.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::amqp::Message;
use crate::persistence::MsgStorage;
use crate::qos::{CreditGate, try_consume_all};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("consumer tag `{0}` is already attached to the queue")]
    DuplicateConsumer(String),
}

/// Result of trying to take the head message under flow control.
#[derive(Debug)]
pub enum PopOutcome {
    Message(Message),
    Empty,
    /// A message is ready but the credit gate at this index refused it.
    NoCredit(usize),
}

#[derive(Debug)]
struct ConsumerSlot {
    tag: String,
    wake: Arc<Notify>,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Message>,
    consumers: Vec<ConsumerSlot>,
    // Rotates so each push wakes consumers starting from a different one.
    cursor: usize,
}

#[derive(Debug)]
pub struct Queue {
    name: String,
    durable: bool,
    storage: Option<Arc<MsgStorage>>,
    state: Mutex<QueueState>,
}

impl Queue {
    /// Create a queue. `storage` is only kept for durable queues.
    pub fn new(name: impl Into<String>, durable: bool, storage: Option<Arc<MsgStorage>>) -> Self {
        Self {
            name: name.into(),
            durable,
            storage: if durable { storage } else { None },
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn storage(&self) -> Option<&Arc<MsgStorage>> {
        self.storage.as_ref()
    }

    /// Whether `message` has (or would have) a storage entry under this queue.
    pub fn persists(&self, message: &Message) -> bool {
        self.storage.is_some() && message.is_persistent()
    }

    /// Append to the ready list. For durable queues the caller must already
    /// have persisted the message.
    pub fn push(&self, message: Message) {
        self.state.lock().ready.push_back(message);
        self.wake_consumers();
    }

    /// Append a message replayed from storage during startup.
    pub fn push_from_storage(&self, message: Message) {
        self.push(message);
    }

    pub fn pop(&self) -> Option<Message> {
        self.state.lock().ready.pop_front()
    }

    /// Take the head message if every gate grants credit for it.
    pub fn pop_with_credit(&self, gates: &[Arc<dyn CreditGate>]) -> PopOutcome {
        let mut state = self.state.lock();
        let Some(head) = state.ready.front() else {
            return PopOutcome::Empty;
        };
        if let Err(gate) = try_consume_all(gates, head.body_size()) {
            return PopOutcome::NoCredit(gate);
        }
        match state.ready.pop_front() {
            Some(message) => PopOutcome::Message(message),
            None => PopOutcome::Empty,
        }
    }

    /// Put a message back at the head, flagged as redelivered.
    pub fn requeue(&self, mut message: Message) {
        message.redelivered = true;
        self.state.lock().ready.push_front(message);
        self.wake_consumers();
    }

    /// Put several messages back at the head keeping their relative order.
    pub fn requeue_all(&self, messages: Vec<Message>) {
        if messages.is_empty() {
            return;
        }
        {
            let mut state = self.state.lock();
            for mut message in messages.into_iter().rev() {
                message.redelivered = true;
                state.ready.push_front(message);
            }
        }
        self.wake_consumers();
    }

    /// Return a message that was popped but never reached the client.
    pub fn return_undelivered(&self, message: Message) {
        self.state.lock().ready.push_front(message);
        self.wake_consumers();
    }

    pub fn add_consumer(&self, tag: &str, wake: Arc<Notify>) -> Result<(), QueueError> {
        let has_ready = {
            let mut state = self.state.lock();
            if state.consumers.iter().any(|c| c.tag == tag) {
                return Err(QueueError::DuplicateConsumer(tag.to_string()));
            }
            state.consumers.push(ConsumerSlot {
                tag: tag.to_string(),
                wake: wake.clone(),
            });
            !state.ready.is_empty()
        };
        debug!(queue = %self.name, consumer_tag = tag, "consumer attached");
        if has_ready {
            wake.notify_one();
        }
        Ok(())
    }

    pub fn remove_consumer(&self, tag: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.consumers.len();
        state.consumers.retain(|c| c.tag != tag);
        let removed = state.consumers.len() != before;
        if removed {
            debug!(queue = %self.name, consumer_tag = tag, "consumer detached");
        }
        removed
    }

    pub fn consumer_count(&self) -> usize {
        self.state.lock().consumers.len()
    }

    pub fn consumer_tags(&self) -> Vec<String> {
        self.state.lock().consumers.iter().map(|c| c.tag.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().ready.is_empty()
    }

    /// Copy of the ready list, head first.
    pub fn ready_messages(&self) -> Vec<Message> {
        self.state.lock().ready.iter().cloned().collect()
    }

    /// Drop every ready message and its storage entry. Messages held by
    /// consumers are not touched.
    pub fn purge(&self) -> usize {
        let drained: Vec<Message> = self.state.lock().ready.drain(..).collect();
        if let Some(storage) = &self.storage {
            for message in drained.iter().filter(|m| m.is_persistent()) {
                if let Err(e) = storage.delete(message.id, &self.name) {
                    warn!(queue = %self.name, id = message.id, error = %e, "failed to delete purged message");
                }
            }
        }
        drained.len()
    }

    fn wake_consumers(&self) {
        let wakers: Vec<Arc<Notify>> = {
            let mut state = self.state.lock();
            let n = state.consumers.len();
            if n == 0 {
                return;
            }
            let start = state.cursor % n;
            state.cursor = state.cursor.wrapping_add(1);
            (0..n)
                .map(|i| state.consumers[(start + i) % n].wake.clone())
                .collect()
        };
        for wake in wakers {
            wake.notify_one();
        }
    }
}
