//! Consumer delivery loop
//!
//! One tokio task per Basic.Consume subscription. The task pulls the head
//! of its queue whenever both credit pools allow it, sends a Basic.Deliver
//! to the client and, unless the consumer is no-ack, keeps the message until
//! the client acknowledges it.
//!
//! ```text
//! Idle -> WaitingForCredit -> Delivering -> AwaitingAck -> Idle
//!   \__________________________|_______________________/
//!                              v
//!                          Cancelled
//! ```
//!
//! Cancellation is observed at every suspension point. The task itself runs
//! the teardown (detach, requeue unacknowledged messages) so nothing it has
//! popped can be lost between a delivery and a cancel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::amqp::{Content, Frame, Message, Method};
use crate::channel::ChannelLink;
use crate::qos::{CreditGate, release_all};
use crate::queue::{PopOutcome, Queue, QueueError};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AckError {
    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    WaitingForCredit,
    Delivering,
    AwaitingAck,
    Cancelled,
}

pub struct Consumer {
    tag: String,
    queue: Arc<Queue>,
    no_ack: bool,
    // [channel scope, connection scope]
    credit: [Arc<dyn CreditGate>; 2],
    link: Arc<ChannelLink>,
    unacked: Mutex<BTreeMap<u64, Message>>,
    wake: Arc<Notify>,
    cancel: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    state: Mutex<ConsumerState>,
    torn_down: AtomicBool,
}

impl Consumer {
    pub fn new(
        queue: Arc<Queue>,
        tag: impl Into<String>,
        no_ack: bool,
        link: Arc<ChannelLink>,
        channel_qos: Arc<dyn CreditGate>,
        connection_qos: Arc<dyn CreditGate>,
    ) -> Arc<Self> {
        let (cancel, _) = watch::channel(false);
        Arc::new(Self {
            tag: tag.into(),
            queue,
            no_ack,
            credit: [channel_qos, connection_qos],
            link,
            unacked: Mutex::new(BTreeMap::new()),
            wake: Arc::new(Notify::new()),
            cancel,
            task: Mutex::new(None),
            state: Mutex::new(ConsumerState::Idle),
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub fn is_no_ack(&self) -> bool {
        self.no_ack
    }

    pub fn state(&self) -> ConsumerState {
        let state = *self.state.lock();
        match state {
            // Acks settle outside the delivery loop.
            ConsumerState::Idle | ConsumerState::AwaitingAck => self.settled_state(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub fn unacked_count(&self) -> usize {
        self.unacked.lock().len()
    }

    pub fn owns_delivery(&self, delivery_tag: u64) -> bool {
        self.unacked.lock().contains_key(&delivery_tag)
    }

    /// Register with the queue so pushes wake this consumer.
    pub fn attach(&self) -> Result<(), QueueError> {
        self.queue.add_consumer(&self.tag, self.wake.clone())
    }

    /// Spawn the delivery loop on the current tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() || self.is_cancelled() {
            return;
        }
        *task = Some(tokio::spawn(Arc::clone(self).run()));
    }

    /// Stop the delivery loop and wait for its teardown to finish.
    pub async fn cancel(&self) {
        self.cancel.send_replace(true);
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(consumer_tag = %self.tag, error = %e, "delivery task ended abnormally");
            }
        }
        self.teardown();
    }

    /// Acknowledge one delivery, or with `multiple` every delivery up to and
    /// including `delivery_tag` (all of them when the tag is 0).
    pub fn handle_ack(&self, delivery_tag: u64, multiple: bool) -> Result<usize, AckError> {
        let acked = self.take_unacked(delivery_tag, multiple);
        if acked.is_empty() {
            return Err(AckError::UnknownDeliveryTag(delivery_tag));
        }
        self.release_credit(&acked);
        for message in &acked {
            self.forget(message);
        }
        debug!(consumer_tag = %self.tag, delivery_tag, multiple, count = acked.len(), "acked");
        Ok(acked.len())
    }

    /// Reject deliveries: requeue them, or drop them for good.
    pub fn handle_reject(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<usize, AckError> {
        let rejected = self.take_unacked(delivery_tag, multiple);
        if rejected.is_empty() {
            return Err(AckError::UnknownDeliveryTag(delivery_tag));
        }
        let count = rejected.len();
        self.release_credit(&rejected);
        if requeue {
            self.queue.requeue_all(rejected);
        } else {
            for message in &rejected {
                self.forget(message);
            }
        }
        debug!(consumer_tag = %self.tag, delivery_tag, multiple, requeue, count, "rejected");
        Ok(count)
    }

    fn take_unacked(&self, delivery_tag: u64, multiple: bool) -> Vec<Message> {
        let mut unacked = self.unacked.lock();
        if !multiple {
            return unacked.remove(&delivery_tag).into_iter().collect();
        }
        let rest = match delivery_tag {
            0 | u64::MAX => BTreeMap::new(),
            tag => unacked.split_off(&(tag + 1)),
        };
        std::mem::replace(&mut *unacked, rest).into_values().collect()
    }

    fn release_credit(&self, messages: &[Message]) {
        if self.no_ack || messages.is_empty() {
            return;
        }
        let size = messages.iter().map(Message::body_size).sum();
        let count = u32::try_from(messages.len()).unwrap_or(u32::MAX);
        release_all(&self.credit, count, size);
    }

    /// Drop the storage entry of a message that is done with.
    fn forget(&self, message: &Message) {
        if !self.queue.persists(message) {
            return;
        }
        if let Some(storage) = self.queue.storage() {
            if let Err(e) = storage.delete(message.id, self.queue.name()) {
                // The entry resurfaces on the next restore.
                warn!(queue = %self.queue.name(), id = message.id, error = %e, "failed to delete acknowledged message");
            }
        }
    }

    fn set_state(&self, state: ConsumerState) {
        *self.state.lock() = state;
    }

    fn settled_state(&self) -> ConsumerState {
        if self.unacked.lock().is_empty() {
            ConsumerState::Idle
        } else {
            ConsumerState::AwaitingAck
        }
    }

    async fn run(self: Arc<Self>) {
        let mut cancelled = self.cancel.subscribe();
        debug!(consumer_tag = %self.tag, queue = %self.queue.name(), "delivery loop started");

        loop {
            if *cancelled.borrow_and_update() {
                break;
            }

            // Register interest before looking at the queue so a push or a
            // release between the check and the wait is not missed.
            let queue_ready = self.wake.notified();
            let channel_credit = self.credit[0].credit_signal().notified();
            let connection_credit = self.credit[1].credit_signal().notified();

            let outcome = if self.no_ack {
                match self.queue.pop() {
                    Some(message) => PopOutcome::Message(message),
                    None => PopOutcome::Empty,
                }
            } else {
                self.queue.pop_with_credit(&self.credit)
            };

            match outcome {
                PopOutcome::Message(message) => {
                    if !self.deliver(message) {
                        break;
                    }
                }
                PopOutcome::Empty => {
                    self.set_state(self.settled_state());
                    tokio::select! {
                        _ = queue_ready => {}
                        _ = cancelled.changed() => {}
                    }
                }
                PopOutcome::NoCredit(refused) => {
                    self.set_state(ConsumerState::WaitingForCredit);
                    // Only the refusing pool matters. The others were charged
                    // and refunded by this attempt, which signalled them.
                    let credit = if refused == 0 { channel_credit } else { connection_credit };
                    tokio::select! {
                        _ = credit => {}
                        _ = queue_ready => {}
                        _ = cancelled.changed() => {}
                    }
                }
            }
        }

        self.teardown();
    }

    /// Send one message to the client. Returns false when the channel is gone.
    fn deliver(&self, message: Message) -> bool {
        self.set_state(ConsumerState::Delivering);
        let delivery_tag = self.link.next_delivery_tag();
        let frame = Frame::with_content(
            self.link.channel_id(),
            Method::BasicDeliver {
                consumer_tag: self.tag.clone(),
                delivery_tag,
                redelivered: message.redelivered,
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
            },
            Content {
                properties: message.properties.clone(),
                body: message.body.clone(),
            },
        );

        // Recorded before sending so an ack racing the send finds it.
        if !self.no_ack {
            self.unacked.lock().insert(delivery_tag, message.clone());
        }

        if let Err(e) = self.link.send(frame) {
            warn!(consumer_tag = %self.tag, delivery_tag, error = %e, "client gone, returning message to queue");
            if !self.no_ack {
                self.unacked.lock().remove(&delivery_tag);
                self.release_credit(std::slice::from_ref(&message));
            }
            self.queue.return_undelivered(message);
            return false;
        }

        if self.no_ack {
            self.forget(&message);
        }
        self.set_state(self.settled_state());
        true
    }

    /// Detach from the queue and hand every unacknowledged message back to
    /// it. Runs once.
    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.remove_consumer(&self.tag);

        let pending: Vec<Message> = std::mem::take(&mut *self.unacked.lock())
            .into_values()
            .collect();
        let requeued = pending.len();
        self.release_credit(&pending);
        self.queue.requeue_all(pending);

        self.set_state(ConsumerState::Cancelled);
        info!(consumer_tag = %self.tag, queue = %self.queue.name(), requeued, "consumer cancelled");
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("tag", &self.tag)
            .field("queue", &self.queue.name())
            .field("no_ack", &self.no_ack)
            .field("state", &self.state())
            .field("unacked", &self.unacked_count())
            .finish()
    }
}
