pub mod engine;
pub mod router;

pub use engine::{Broker, BrokerError, PendingPublish, PublishOutcome};
pub use router::{DefaultExchangeRouter, Router};
