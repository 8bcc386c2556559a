//! Protocol-side types shared by the delivery core.
//!
//! Frame encoding and the generated method codecs live outside this crate.
//! What the core needs from the protocol is collected here:
//!
//! - `message`: the `Message` owned by queues and consumers, plus the
//!   protocol-version dependent storage codec.
//! - `methods`: the closed set of Basic-class methods the channel dispatcher
//!   routes, each carrying its class/method identifiers.
//! - `error`: reply codes and the `AmqpError` handed back to the protocol layer.

pub mod error;
pub mod message;
pub mod methods;

pub use error::{AmqpError, ErrorScope, ReplyCode};
pub use message::{Message, MessageIdGenerator, Properties, ProtoVersion};
pub use methods::{Content, Frame, Method};
