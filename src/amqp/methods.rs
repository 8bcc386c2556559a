//! Basic-class methods
//!
//! The wire codec decodes method frames into `Method` values; the channel
//! dispatcher matches on them. Every variant knows its class and method
//! identifiers so an error reply can always name the command it refers to.

use super::message::Properties;

pub const CLASS_BASIC: u16 = 60;

pub const BASIC_CONSUME: u16 = 20;
pub const BASIC_CANCEL: u16 = 30;
pub const BASIC_PUBLISH: u16 = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    BasicQos {
        prefetch_size: u32,
        prefetch_count: u16,
        global: bool,
    },
    BasicQosOk,
    BasicConsume {
        queue: String,
        consumer_tag: String,
        no_local: bool,
        no_ack: bool,
        exclusive: bool,
        no_wait: bool,
    },
    BasicConsumeOk {
        consumer_tag: String,
    },
    BasicCancel {
        consumer_tag: String,
        no_wait: bool,
    },
    BasicCancelOk {
        consumer_tag: String,
    },
    BasicPublish {
        exchange: String,
        routing_key: String,
        mandatory: bool,
        immediate: bool,
    },
    BasicReturn {
        reply_code: u16,
        reply_text: String,
        exchange: String,
        routing_key: String,
    },
    BasicDeliver {
        consumer_tag: String,
        delivery_tag: u64,
        redelivered: bool,
        exchange: String,
        routing_key: String,
    },
    BasicGet {
        queue: String,
        no_ack: bool,
    },
    BasicAck {
        delivery_tag: u64,
        multiple: bool,
    },
    BasicReject {
        delivery_tag: u64,
        requeue: bool,
    },
    BasicRecoverAsync {
        requeue: bool,
    },
    BasicRecover {
        requeue: bool,
    },
    BasicNack {
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    },
}

impl Method {
    pub fn class_id(&self) -> u16 {
        CLASS_BASIC
    }

    pub fn method_id(&self) -> u16 {
        match self {
            Method::BasicQos { .. } => 10,
            Method::BasicQosOk => 11,
            Method::BasicConsume { .. } => BASIC_CONSUME,
            Method::BasicConsumeOk { .. } => 21,
            Method::BasicCancel { .. } => BASIC_CANCEL,
            Method::BasicCancelOk { .. } => 31,
            Method::BasicPublish { .. } => BASIC_PUBLISH,
            Method::BasicReturn { .. } => 50,
            Method::BasicDeliver { .. } => 60,
            Method::BasicGet { .. } => 70,
            Method::BasicAck { .. } => 80,
            Method::BasicReject { .. } => 90,
            Method::BasicRecoverAsync { .. } => 100,
            Method::BasicRecover { .. } => 110,
            Method::BasicNack { .. } => 120,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Method::BasicQos { .. } => "BasicQos",
            Method::BasicQosOk => "BasicQosOk",
            Method::BasicConsume { .. } => "BasicConsume",
            Method::BasicConsumeOk { .. } => "BasicConsumeOk",
            Method::BasicCancel { .. } => "BasicCancel",
            Method::BasicCancelOk { .. } => "BasicCancelOk",
            Method::BasicPublish { .. } => "BasicPublish",
            Method::BasicReturn { .. } => "BasicReturn",
            Method::BasicDeliver { .. } => "BasicDeliver",
            Method::BasicGet { .. } => "BasicGet",
            Method::BasicAck { .. } => "BasicAck",
            Method::BasicReject { .. } => "BasicReject",
            Method::BasicRecoverAsync { .. } => "BasicRecoverAsync",
            Method::BasicRecover { .. } => "BasicRecover",
            Method::BasicNack { .. } => "BasicNack",
        }
    }
}

/// Content header and body following a content-bearing method.
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub properties: Properties,
    pub body: Vec<u8>,
}

/// Outbound unit handed to the protocol writer of a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub channel_id: u16,
    pub method: Method,
    pub content: Option<Content>,
}

impl Frame {
    pub fn method(channel_id: u16, method: Method) -> Self {
        Self {
            channel_id,
            method,
            content: None,
        }
    }

    pub fn with_content(channel_id: u16, method: Method, content: Content) -> Self {
        Self {
            channel_id,
            method,
            content: Some(content),
        }
    }
}
