use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::mpsc::error::SendError;

use crate::amqp::{Frame, Method};

/// Outbound side of a channel shared with its consumers: the frame sender
/// towards the protocol writer and the channel-scoped delivery tag counter.
#[derive(Debug)]
pub struct ChannelLink {
    channel_id: u16,
    delivery_tags: AtomicU64,
    sender: UnboundedSender<Frame>,
}

impl ChannelLink {
    pub fn new(channel_id: u16, sender: UnboundedSender<Frame>) -> Self {
        Self {
            channel_id,
            delivery_tags: AtomicU64::new(1),
            sender,
        }
    }

    pub fn channel_id(&self) -> u16 {
        self.channel_id
    }

    /// Delivery tags start at 1 and grow for the lifetime of the channel.
    pub fn next_delivery_tag(&self) -> u64 {
        self.delivery_tags.fetch_add(1, Ordering::Relaxed)
    }

    pub fn send(&self, frame: Frame) -> Result<(), Box<SendError<Frame>>> {
        self.sender.send(frame).map_err(Box::new)
    }

    pub fn send_method(&self, method: Method) -> Result<(), Box<SendError<Frame>>> {
        self.send(Frame::method(self.channel_id, method))
    }
}
