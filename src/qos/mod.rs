//! Flow-control credit (Basic.Qos)
//!
//! Every channel and every connection owns one `AmqpQos` pool. A consumer
//! holds both and may only take a message when each pool grants credit for
//! it. Acknowledgments give the credit back.
//!
//! Counters are guarded by a per-pool mutex; releasing or refunding credit,
//! or raising a limit, wakes every delivery loop waiting on that pool.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

/// A pool of delivery credit. Implemented by `AmqpQos`; tests substitute
/// their own gates.
pub trait CreditGate: Send + Sync + fmt::Debug {
    /// Replace both limits. Zero means unlimited.
    fn update(&self, prefetch_count: u16, prefetch_size: u32);

    /// Whether one more message of `size` octets fits under the limits.
    fn can_consume(&self, size: u64) -> bool;

    /// Check and take credit for one message in a single step.
    fn try_consume(&self, size: u64) -> bool;

    /// Add to the in-flight counters unconditionally.
    fn consumed(&self, count: u32, size: u64);

    /// Give credit back and wake waiters.
    fn released(&self, count: u32, size: u64);

    /// Undo a `try_consume` that could not be completed. Wakes waiters:
    /// anyone refused while the credit was held may now be admitted.
    fn refund(&self, count: u32, size: u64);

    /// Signalled whenever credit is released or limits change.
    fn credit_signal(&self) -> &Notify;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QosSnapshot {
    pub prefetch_count: u16,
    pub prefetch_size: u32,
    pub in_flight_count: u32,
    pub in_flight_size: u64,
}

#[derive(Debug, Default)]
struct QosState {
    prefetch_count: u16,
    prefetch_size: u32,
    count: u32,
    size: u64,
}

impl QosState {
    fn admits(&self, size: u64) -> bool {
        let count_ok = self.prefetch_count == 0 || self.count < u32::from(self.prefetch_count);
        let size_ok =
            self.prefetch_size == 0 || self.size.saturating_add(size) <= u64::from(self.prefetch_size);
        count_ok && size_ok
    }

    fn subtract(&mut self, count: u32, size: u64) -> bool {
        let underflow = count > self.count || size > self.size;
        self.count = self.count.saturating_sub(count);
        self.size = self.size.saturating_sub(size);
        underflow
    }
}

/// Credit pool for one scope (a channel or a whole connection).
pub struct AmqpQos {
    scope: &'static str,
    state: Mutex<QosState>,
    signal: Notify,
}

impl AmqpQos {
    pub fn new(scope: &'static str, prefetch_count: u16, prefetch_size: u32) -> Self {
        Self {
            scope,
            state: Mutex::new(QosState {
                prefetch_count,
                prefetch_size,
                ..QosState::default()
            }),
            signal: Notify::new(),
        }
    }

    pub fn channel(prefetch_count: u16, prefetch_size: u32) -> Arc<Self> {
        Arc::new(Self::new("channel", prefetch_count, prefetch_size))
    }

    pub fn connection() -> Arc<Self> {
        Arc::new(Self::new("connection", 0, 0))
    }

    /// True when at least one limit is set.
    pub fn is_active(&self) -> bool {
        let state = self.state.lock();
        state.prefetch_count != 0 || state.prefetch_size != 0
    }

    pub fn snapshot(&self) -> QosSnapshot {
        let state = self.state.lock();
        QosSnapshot {
            prefetch_count: state.prefetch_count,
            prefetch_size: state.prefetch_size,
            in_flight_count: state.count,
            in_flight_size: state.size,
        }
    }
}

impl CreditGate for AmqpQos {
    fn update(&self, prefetch_count: u16, prefetch_size: u32) {
        {
            let mut state = self.state.lock();
            state.prefetch_count = prefetch_count;
            state.prefetch_size = prefetch_size;
        }
        self.signal.notify_waiters();
    }

    fn can_consume(&self, size: u64) -> bool {
        self.state.lock().admits(size)
    }

    fn try_consume(&self, size: u64) -> bool {
        let mut state = self.state.lock();
        if !state.admits(size) {
            return false;
        }
        state.count += 1;
        state.size = state.size.saturating_add(size);
        true
    }

    fn consumed(&self, count: u32, size: u64) {
        let mut state = self.state.lock();
        state.count = state.count.saturating_add(count);
        state.size = state.size.saturating_add(size);
    }

    fn released(&self, count: u32, size: u64) {
        let underflow = self.state.lock().subtract(count, size);
        if underflow {
            warn!(scope = self.scope, count, size, "qos credit released below zero, clamped");
        }
        self.signal.notify_waiters();
    }

    fn refund(&self, count: u32, size: u64) {
        let underflow = self.state.lock().subtract(count, size);
        if underflow {
            warn!(scope = self.scope, count, size, "qos credit refunded below zero, clamped");
        }
        self.signal.notify_waiters();
    }

    fn credit_signal(&self) -> &Notify {
        &self.signal
    }
}

impl fmt::Debug for AmqpQos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmqpQos")
            .field("scope", &self.scope)
            .field("state", &self.snapshot())
            .finish()
    }
}

/// Take credit for one message of `size` octets from every gate, or from
/// none of them. On refusal returns the index of the gate that refused.
pub fn try_consume_all(gates: &[Arc<dyn CreditGate>], size: u64) -> Result<(), usize> {
    for (taken, gate) in gates.iter().enumerate() {
        if !gate.try_consume(size) {
            for granted in &gates[..taken] {
                granted.refund(1, size);
            }
            return Err(taken);
        }
    }
    Ok(())
}

pub fn release_all(gates: &[Arc<dyn CreditGate>], count: u32, size: u64) {
    for gate in gates {
        gate.released(count, size);
    }
}

#[cfg(test)]
mod tests;
