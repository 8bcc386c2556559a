//! Messages and their storage encoding
//!
//! A `Message` is created by the publish path once the content of a
//! Basic.Publish has been received. It is owned by one queue at a time and
//! handed to at most one consumer per delivery.
//!
//! The persisted form is versioned:
//!
//! ```text
//! +----------------+--------------+------------------------+
//! | format version | protocol tag | JSON-encoded message   |
//! +----------------+--------------+------------------------+
//!       u8               u8             remaining bytes
//! ```
//!
//! Values written under one protocol version are refused by a broker running
//! another, so a build never misreads header tables it did not write.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Current layout of an encoded message value.
pub const MESSAGE_FORMAT_VERSION: u8 = 1;

/// Delivery mode marking a message as persistent.
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Protocol dialect the broker speaks. It selects how header tables are
/// typed and therefore how stored messages are tagged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtoVersion {
    /// Plain AMQP 0-9-1 field table types.
    Amqp091,
    /// The RabbitMQ errata variant of the field table types.
    #[default]
    AmqpRabbit,
}

impl ProtoVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtoVersion::Amqp091 => "amqp-0-9-1",
            ProtoVersion::AmqpRabbit => "amqp-rabbit",
        }
    }

    fn tag(self) -> u8 {
        match self {
            ProtoVersion::Amqp091 => 1,
            ProtoVersion::AmqpRabbit => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ProtoVersion::Amqp091),
            2 => Some(ProtoVersion::AmqpRabbit),
            _ => None,
        }
    }
}

impl fmt::Display for ProtoVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtoVersion {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "amqp-0-9-1" => Ok(ProtoVersion::Amqp091),
            "amqp-rabbit" => Ok(ProtoVersion::AmqpRabbit),
            other => Err(CodecError::UnknownProtoVersion(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unknown protocol version `{0}`")]
    UnknownProtoVersion(String),
    #[error("encoded value is empty or truncated")]
    Truncated,
    #[error("unsupported message format version {0}")]
    FormatVersion(u8),
    #[error("message was encoded for {found}, broker runs {expected}")]
    ProtoMismatch {
        expected: ProtoVersion,
        found: String,
    },
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Basic-class content header properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub headers: Option<BTreeMap<String, serde_json::Value>>,
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<u64>,
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Broker-assigned id. Unique within the queue the message is stored under.
    pub id: u64,
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
    pub properties: Properties,
    pub body: Vec<u8>,
    #[serde(default)]
    pub redelivered: bool,
}

impl Message {
    pub fn new(
        id: u64,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        properties: Properties,
        body: Vec<u8>,
    ) -> Self {
        Self {
            id,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            mandatory: false,
            immediate: false,
            properties,
            body,
            redelivered: false,
        }
    }

    /// Body length in octets, the unit prefetch-size limits are counted in.
    pub fn body_size(&self) -> u64 {
        self.body.len() as u64
    }

    pub fn is_persistent(&self) -> bool {
        self.properties.delivery_mode == Some(DELIVERY_MODE_PERSISTENT)
    }

    pub fn marshal(&self, proto: ProtoVersion) -> Result<Vec<u8>, CodecError> {
        let body = serde_json::to_vec(self)?;
        let mut out = Vec::with_capacity(body.len() + 2);
        out.push(MESSAGE_FORMAT_VERSION);
        out.push(proto.tag());
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn unmarshal(data: &[u8], proto: ProtoVersion) -> Result<Self, CodecError> {
        let [format, tag, body @ ..] = data else {
            return Err(CodecError::Truncated);
        };
        if *format != MESSAGE_FORMAT_VERSION {
            return Err(CodecError::FormatVersion(*format));
        }
        match ProtoVersion::from_tag(*tag) {
            Some(found) if found == proto => {}
            Some(found) => {
                return Err(CodecError::ProtoMismatch {
                    expected: proto,
                    found: found.to_string(),
                });
            }
            None => {
                return Err(CodecError::ProtoMismatch {
                    expected: proto,
                    found: format!("tag {tag}"),
                });
            }
        }
        Ok(serde_json::from_slice(body)?)
    }
}

/// Monotonic source of message ids.
///
/// Seeded from the wall clock so ids keep growing across restarts, and
/// bumped past the highest restored id after recovery.
#[derive(Debug)]
pub struct MessageIdGenerator {
    next: AtomicU64,
}

impl MessageIdGenerator {
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start.max(1)),
        }
    }

    pub fn from_clock() -> Self {
        let micros = chrono::Utc::now().timestamp_micros();
        Self::new(u64::try_from(micros).unwrap_or(1))
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Guarantee every future id is greater than `id`.
    pub fn advance_past(&self, id: u64) {
        self.next.fetch_max(id.saturating_add(1), Ordering::Relaxed);
    }
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::from_clock()
    }
}
