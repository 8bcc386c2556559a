//! Exchange routing hook.
//!
//! Binding tables and exchange types are handled outside the core; the
//! broker only asks a `Router` which queues a publish should land in.

/// Resolves a publish to the names of the queues it is delivered to.
pub trait Router: Send + Sync {
    fn route(&self, exchange: &str, routing_key: &str) -> Vec<String>;
}

/// The AMQP default exchange: the nameless exchange delivers to the queue
/// named by the routing key. Named exchanges route nowhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExchangeRouter;

impl Router for DefaultExchangeRouter {
    fn route(&self, exchange: &str, routing_key: &str) -> Vec<String> {
        if exchange.is_empty() {
            vec![routing_key.to_string()]
        } else {
            Vec::new()
        }
    }
}
