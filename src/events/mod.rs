//! Event bus for bridge state notifications

pub mod types;

pub use types::BridgeEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcasts [`BridgeEvent`]s to every subscriber
///
/// ```
/// use omt_bridge::events::{BridgeEvent, EventBus};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
/// bus.publish(BridgeEvent::ConnectionRejected {
///     peer: "10.0.0.9:50412".to_string(),
///     reason: "all slots occupied".to_string(),
/// });
/// assert!(matches!(rx.try_recv(), Ok(BridgeEvent::ConnectionRejected { .. })));
/// ```
pub struct EventBus {
    tx: broadcast::Sender<BridgeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event; dropped silently when nobody listens
    pub fn publish(&self, event: BridgeEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to future events
    ///
    /// A subscriber that falls more than the channel capacity behind gets
    /// `Lagged` and misses events.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
