//! Crate-level error used by the binary and anything that drives the broker
//! end to end.

use crate::amqp::message::CodecError;
use crate::broker::BrokerError;
use crate::persistence::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
