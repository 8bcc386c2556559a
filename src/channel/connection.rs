use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use super::{Channel, ChannelLink};
use crate::amqp::Frame;
use crate::broker::Broker;
use crate::qos::AmqpQos;

/// One client connection: the connection-scope credit pool shared by all of
/// its channels and the outbound frame sender they write to.
pub struct Connection {
    broker: Arc<Broker>,
    qos: Arc<AmqpQos>,
    channels: Mutex<HashMap<u16, Arc<Channel>>>,
    sender: UnboundedSender<Frame>,
}

impl Connection {
    pub fn new(broker: Arc<Broker>, sender: UnboundedSender<Frame>) -> Self {
        Self {
            broker,
            qos: AmqpQos::connection(),
            channels: Mutex::new(HashMap::new()),
            sender,
        }
    }

    pub fn qos(&self) -> &Arc<AmqpQos> {
        &self.qos
    }

    /// Open channel `id`, or return it if already open.
    pub fn open_channel(&self, id: u16) -> Arc<Channel> {
        self.channels
            .lock()
            .entry(id)
            .or_insert_with(|| {
                debug!(channel = id, "channel opened");
                let link = Arc::new(ChannelLink::new(id, self.sender.clone()));
                Arc::new(Channel::new(id, self.broker.clone(), self.qos.clone(), link))
            })
            .clone()
    }

    pub fn channel(&self, id: u16) -> Option<Arc<Channel>> {
        self.channels.lock().get(&id).cloned()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    pub async fn close_channel(&self, id: u16) -> bool {
        let removed = self.channels.lock().remove(&id);
        match removed {
            Some(channel) => {
                channel.close().await;
                true
            }
            None => false,
        }
    }

    /// Close every channel, returning all unacknowledged deliveries to their
    /// queues.
    pub async fn close(&self) {
        let channels: Vec<Arc<Channel>> = self.channels.lock().drain().map(|(_, c)| c).collect();
        let count = channels.len();
        for channel in channels {
            channel.close().await;
        }
        info!(channels = count, "connection closed");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("qos", &self.qos)
            .field("channels", &self.channel_count())
            .finish()
    }
}
