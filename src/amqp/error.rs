//! Reply codes and protocol errors.
//!
//! An `AmqpError` is what a handler returns when a command cannot be
//! honoured. The protocol layer turns it into a Channel.Close or
//! Connection.Close carrying the same code and the class/method of the
//! offending command.

use std::fmt;

/// Reply codes from the AMQP 0-9-1 constant table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyCode {
    ReplySuccess,
    ContentTooLarge,
    NoRoute,
    NoConsumers,
    ConnectionForced,
    InvalidPath,
    AccessRefused,
    NotFound,
    ResourceLocked,
    PreconditionFailed,
    FrameError,
    SyntaxError,
    CommandInvalid,
    ChannelError,
    UnexpectedFrame,
    ResourceError,
    NotAllowed,
    NotImplemented,
    InternalError,
}

impl ReplyCode {
    pub fn code(self) -> u16 {
        match self {
            ReplyCode::ReplySuccess => 200,
            ReplyCode::ContentTooLarge => 311,
            ReplyCode::NoRoute => 312,
            ReplyCode::NoConsumers => 313,
            ReplyCode::ConnectionForced => 320,
            ReplyCode::InvalidPath => 402,
            ReplyCode::AccessRefused => 403,
            ReplyCode::NotFound => 404,
            ReplyCode::ResourceLocked => 405,
            ReplyCode::PreconditionFailed => 406,
            ReplyCode::FrameError => 501,
            ReplyCode::SyntaxError => 502,
            ReplyCode::CommandInvalid => 503,
            ReplyCode::ChannelError => 504,
            ReplyCode::UnexpectedFrame => 505,
            ReplyCode::ResourceError => 506,
            ReplyCode::NotAllowed => 530,
            ReplyCode::NotImplemented => 540,
            ReplyCode::InternalError => 541,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ReplyCode::ReplySuccess => "REPLY_SUCCESS",
            ReplyCode::ContentTooLarge => "CONTENT_TOO_LARGE",
            ReplyCode::NoRoute => "NO_ROUTE",
            ReplyCode::NoConsumers => "NO_CONSUMERS",
            ReplyCode::ConnectionForced => "CONNECTION_FORCED",
            ReplyCode::InvalidPath => "INVALID_PATH",
            ReplyCode::AccessRefused => "ACCESS_REFUSED",
            ReplyCode::NotFound => "NOT_FOUND",
            ReplyCode::ResourceLocked => "RESOURCE_LOCKED",
            ReplyCode::PreconditionFailed => "PRECONDITION_FAILED",
            ReplyCode::FrameError => "FRAME_ERROR",
            ReplyCode::SyntaxError => "SYNTAX_ERROR",
            ReplyCode::CommandInvalid => "COMMAND_INVALID",
            ReplyCode::ChannelError => "CHANNEL_ERROR",
            ReplyCode::UnexpectedFrame => "UNEXPECTED_FRAME",
            ReplyCode::ResourceError => "RESOURCE_ERROR",
            ReplyCode::NotAllowed => "NOT_ALLOWED",
            ReplyCode::NotImplemented => "NOT_IMPLEMENTED",
            ReplyCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.name())
    }
}

/// Whether an error closes only the channel or the whole connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    Channel,
    Connection,
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorScope::Channel => f.write_str("channel"),
            ErrorScope::Connection => f.write_str("connection"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{scope} error {reply_code}: {reply_text} (class {class_id}, method {method_id})")]
pub struct AmqpError {
    pub scope: ErrorScope,
    pub reply_code: ReplyCode,
    pub reply_text: String,
    pub class_id: u16,
    pub method_id: u16,
}

impl AmqpError {
    pub fn channel(
        reply_code: ReplyCode,
        reply_text: impl Into<String>,
        class_id: u16,
        method_id: u16,
    ) -> Self {
        Self {
            scope: ErrorScope::Channel,
            reply_code,
            reply_text: reply_text.into(),
            class_id,
            method_id,
        }
    }

    pub fn connection(
        reply_code: ReplyCode,
        reply_text: impl Into<String>,
        class_id: u16,
        method_id: u16,
    ) -> Self {
        Self {
            scope: ErrorScope::Connection,
            reply_code,
            reply_text: reply_text.into(),
            class_id,
            method_id,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        self.scope == ErrorScope::Connection
    }
}
