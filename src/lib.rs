//! # mqcore
//!
//! `mqcore` is the delivery and durability core of an AMQP 0-9-1 message
//! broker: queues with consumer delivery loops, two-scope QoS flow control,
//! and persistence of durable messages across restarts.
//!
//! ## Core Modules
//!
//! - `amqp`: messages, Basic-class methods, reply codes and protocol errors.
//! - `persistence`: the key-value store contract, its sled and in-memory
//!   backends, and `MsgStorage` which stores messages per queue.
//! - `qos`: prefetch credit pools for channels and connections.
//! - `queue`: ready lists and consumer registries.
//! - `consumer`: the per-subscription delivery task.
//! - `channel`: Basic command dispatch and connection bookkeeping.
//! - `broker`: queue/exchange registry, publish path and startup restore.
//! - `config`: layered settings.
//! - `utils`: logging and the crate-level error.

pub mod amqp;
pub mod broker;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod persistence;
pub mod qos;
pub mod queue;
pub mod utils;
