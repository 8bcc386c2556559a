//! Channel-level command dispatch
//!
//! A `Channel` receives decoded Basic-class methods from the protocol layer,
//! turns them into calls on queues, consumers and QoS pools, and turns
//! domain failures into `AmqpError`s carrying the right reply code.

pub mod connection;
pub mod link;

pub use connection::Connection;
pub use link::ChannelLink;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::amqp::methods::{BASIC_CANCEL, BASIC_CONSUME, BASIC_PUBLISH, CLASS_BASIC};
use crate::amqp::{AmqpError, Content, Frame, Method, Properties, ReplyCode};
use crate::broker::{Broker, PendingPublish, PublishOutcome};
use crate::consumer::{AckError, Consumer};
use crate::qos::{AmqpQos, CreditGate};
use crate::queue::QueueError;

pub struct Channel {
    id: u16,
    broker: Arc<Broker>,
    qos: Arc<AmqpQos>,
    connection_qos: Arc<AmqpQos>,
    link: Arc<ChannelLink>,
    consumers: Mutex<HashMap<String, Arc<Consumer>>>,
    current_message: Mutex<Option<PendingPublish>>,
}

impl Channel {
    pub fn new(
        id: u16,
        broker: Arc<Broker>,
        connection_qos: Arc<AmqpQos>,
        link: Arc<ChannelLink>,
    ) -> Self {
        let (prefetch_count, prefetch_size) = broker.default_prefetch();
        Self {
            id,
            broker,
            qos: AmqpQos::channel(prefetch_count, prefetch_size),
            connection_qos,
            link,
            consumers: Mutex::new(HashMap::new()),
            current_message: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn qos(&self) -> &Arc<AmqpQos> {
        &self.qos
    }

    pub fn consumer(&self, tag: &str) -> Option<Arc<Consumer>> {
        self.consumers.lock().get(tag).cloned()
    }

    pub fn consumer_tags(&self) -> Vec<String> {
        self.consumers.lock().keys().cloned().collect()
    }

    /// Route one Basic-class method.
    pub async fn handle_method(&self, method: Method) -> Result<(), AmqpError> {
        let (class_id, method_id) = (method.class_id(), method.method_id());
        match method {
            Method::BasicQos {
                prefetch_size,
                prefetch_count,
                global,
            } => self.basic_qos(prefetch_count, prefetch_size, global),
            Method::BasicPublish {
                exchange,
                routing_key,
                mandatory,
                immediate,
            } => self.basic_publish(exchange, routing_key, mandatory, immediate),
            Method::BasicConsume {
                queue,
                consumer_tag,
                no_ack,
                no_wait,
                ..
            } => self.basic_consume(&queue, consumer_tag, no_ack, no_wait),
            Method::BasicAck {
                delivery_tag,
                multiple,
            } => self
                .settle(delivery_tag, multiple, |c| c.handle_ack(delivery_tag, multiple))
                .map(|_| ())
                .map_err(|e| unknown_tag(e, class_id, method_id)),
            Method::BasicReject {
                delivery_tag,
                requeue,
            } => self
                .settle(delivery_tag, false, |c| {
                    c.handle_reject(delivery_tag, false, requeue)
                })
                .map(|_| ())
                .map_err(|e| unknown_tag(e, class_id, method_id)),
            Method::BasicNack {
                delivery_tag,
                multiple,
                requeue,
            } => self
                .settle(delivery_tag, multiple, |c| {
                    c.handle_reject(delivery_tag, multiple, requeue)
                })
                .map(|_| ())
                .map_err(|e| unknown_tag(e, class_id, method_id)),
            Method::BasicCancel {
                consumer_tag,
                no_wait,
            } => self.basic_cancel(consumer_tag, no_wait).await,
            other => Err(AmqpError::connection(
                ReplyCode::NotImplemented,
                format!("unable to route basic method {}", other.name()),
                class_id,
                method_id,
            )),
        }
    }

    /// Complete the publish staged by the last Basic.Publish with its
    /// content header and body.
    pub fn handle_content(&self, properties: Properties, body: Vec<u8>) -> Result<(), AmqpError> {
        let Some(pending) = self.current_message.lock().take() else {
            return Err(AmqpError::connection(
                ReplyCode::UnexpectedFrame,
                "content received without basic.publish",
                CLASS_BASIC,
                BASIC_PUBLISH,
            ));
        };

        let outcome = self.broker.publish(pending, properties, body).map_err(|e| {
            AmqpError::connection(
                ReplyCode::InternalError,
                format!("unable to store message: {e}"),
                CLASS_BASIC,
                BASIC_PUBLISH,
            )
        })?;

        match outcome {
            PublishOutcome::Routed { id, queues } => {
                debug!(channel = self.id, id, queues, "message published");
            }
            PublishOutcome::Unroutable(message) if message.mandatory => {
                let frame = Frame::with_content(
                    self.id,
                    Method::BasicReturn {
                        reply_code: ReplyCode::NoRoute.code(),
                        reply_text: ReplyCode::NoRoute.name().to_string(),
                        exchange: message.exchange,
                        routing_key: message.routing_key,
                    },
                    Content {
                        properties: message.properties,
                        body: message.body,
                    },
                );
                if let Err(e) = self.link.send(frame) {
                    warn!(channel = self.id, error = %e, "failed to send basic.return");
                }
            }
            PublishOutcome::Unroutable(_) => {}
        }
        Ok(())
    }

    /// Cancel every consumer; unacknowledged messages go back to their queues.
    pub async fn close(&self) {
        self.current_message.lock().take();
        let consumers: Vec<Arc<Consumer>> = self.consumers.lock().drain().map(|(_, c)| c).collect();
        for consumer in consumers {
            consumer.cancel().await;
        }
        debug!(channel = self.id, "channel closed");
    }

    fn basic_qos(&self, prefetch_count: u16, prefetch_size: u32, global: bool) -> Result<(), AmqpError> {
        if global {
            self.connection_qos.update(prefetch_count, prefetch_size);
        } else {
            self.qos.update(prefetch_count, prefetch_size);
        }
        self.send_method(Method::BasicQosOk);
        Ok(())
    }

    fn basic_publish(
        &self,
        exchange: String,
        routing_key: String,
        mandatory: bool,
        immediate: bool,
    ) -> Result<(), AmqpError> {
        if immediate {
            return Err(AmqpError::channel(
                ReplyCode::NotImplemented,
                "Immediate = true",
                CLASS_BASIC,
                BASIC_PUBLISH,
            ));
        }
        if !self.broker.has_exchange(&exchange) {
            return Err(AmqpError::channel(
                ReplyCode::NotFound,
                "exchange not found",
                CLASS_BASIC,
                BASIC_PUBLISH,
            ));
        }

        *self.current_message.lock() = Some(PendingPublish {
            exchange,
            routing_key,
            mandatory,
            immediate,
        });
        Ok(())
    }

    fn basic_consume(
        &self,
        queue_name: &str,
        consumer_tag: String,
        no_ack: bool,
        no_wait: bool,
    ) -> Result<(), AmqpError> {
        let Some(queue) = self.broker.get_queue(queue_name) else {
            return Err(AmqpError::channel(
                ReplyCode::NotFound,
                "Queue not found",
                CLASS_BASIC,
                BASIC_CONSUME,
            ));
        };

        let tag = if consumer_tag.is_empty() {
            format!("amq.ctag-{}", uuid::Uuid::new_v4())
        } else {
            consumer_tag
        };

        let consumer = {
            let mut consumers = self.consumers.lock();
            if consumers.contains_key(&tag) {
                return Err(AmqpError::connection(
                    ReplyCode::NotAllowed,
                    format!("consumer tag `{tag}` already in use on channel"),
                    CLASS_BASIC,
                    BASIC_CONSUME,
                ));
            }
            let channel_qos: Arc<dyn CreditGate> = self.qos.clone();
            let connection_qos: Arc<dyn CreditGate> = self.connection_qos.clone();
            let consumer = Consumer::new(
                queue,
                tag.clone(),
                no_ack,
                self.link.clone(),
                channel_qos,
                connection_qos,
            );
            consumer.attach().map_err(|QueueError::DuplicateConsumer(tag)| {
                AmqpError::connection(
                    ReplyCode::NotAllowed,
                    format!("consumer tag `{tag}` already attached to queue"),
                    CLASS_BASIC,
                    BASIC_CONSUME,
                )
            })?;
            consumers.insert(tag.clone(), consumer.clone());
            consumer
        };

        if !no_wait {
            self.send_method(Method::BasicConsumeOk {
                consumer_tag: tag.clone(),
            });
        }
        consumer.start();
        debug!(channel = self.id, consumer_tag = %tag, queue = queue_name, no_ack, "consumer started");
        Ok(())
    }

    async fn basic_cancel(&self, consumer_tag: String, no_wait: bool) -> Result<(), AmqpError> {
        let removed = self.consumers.lock().remove(&consumer_tag);
        let Some(consumer) = removed else {
            return Err(AmqpError::channel(
                ReplyCode::NotFound,
                "Consumer not found",
                CLASS_BASIC,
                BASIC_CANCEL,
            ));
        };
        consumer.cancel().await;
        if !no_wait {
            self.send_method(Method::BasicCancelOk { consumer_tag });
        }
        Ok(())
    }

    /// Apply an ack/reject to the consumer holding `delivery_tag`, or with
    /// `multiple` to every consumer on the channel. A `multiple` that settles
    /// nothing is an unknown tag like any other.
    fn settle(
        &self,
        delivery_tag: u64,
        multiple: bool,
        op: impl Fn(&Consumer) -> Result<usize, AckError>,
    ) -> Result<usize, AckError> {
        let consumers: Vec<Arc<Consumer>> = self.consumers.lock().values().cloned().collect();
        if !multiple {
            let owner = consumers
                .iter()
                .find(|c| c.owns_delivery(delivery_tag))
                .ok_or(AckError::UnknownDeliveryTag(delivery_tag))?;
            return op(owner);
        }
        let settled: usize = consumers.iter().filter_map(|c| op(c).ok()).sum();
        if settled == 0 {
            return Err(AckError::UnknownDeliveryTag(delivery_tag));
        }
        Ok(settled)
    }

    fn send_method(&self, method: Method) {
        if let Err(e) = self.link.send_method(method) {
            warn!(channel = self.id, error = %e, "failed to send reply, client gone");
        }
    }
}

fn unknown_tag(err: AckError, class_id: u16, method_id: u16) -> AmqpError {
    AmqpError::channel(ReplyCode::PreconditionFailed, err.to_string(), class_id, method_id)
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("qos", &self.qos)
            .field("consumers", &self.consumer_tags())
            .finish()
    }
}

#[cfg(test)]
mod tests;
