// Event bus connecting the Health Monitor to the Reconciliation Workers
// (spec.md §9 design note). Delivery is at-least-once: a lagged
// subscriber drops the oldest events rather than blocking the publisher,
// so handlers must be idempotent — replaying a recovery for an instance
// that is already caught up is a no-op, not an error.
//
// Grounded on the teacher's `HealthEvent`/`HealthEventListener` pair in
// `networking/health/mod.rs`, adapted from a listener-trait fan-out to a
// `tokio::sync::broadcast` channel since our subscribers are independent
// background tasks rather than objects registered on the monitor.

use crate::common::InstanceRole;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// An instance that was unhealthy has passed its probes again.
    InstanceRecovered { instance: InstanceRole },
    /// An instance just crossed the failure threshold.
    InstanceDown { instance: InstanceRole, reason: String },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        // No subscribers is a valid state at startup; a send error here
        // just means nobody is listening yet.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
