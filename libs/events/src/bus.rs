//! Notification bus contract and in-process implementations.

use tokio::sync::broadcast;
use tracing::trace;

use crate::{ContainerEvent, EventEnvelope};

/// Default number of events buffered per subscriber.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Destination for container lifecycle events.
///
/// Publishing is fire-and-forget: implementations must not block and must not
/// surface delivery failures to the publisher.
pub trait EventSink: Send + Sync {
    /// Publish a single event.
    fn publish(&self, event: ContainerEvent);
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn publish(&self, _event: ContainerEvent) {}
}

/// Broadcast-channel backed bus.
///
/// Each subscriber receives every event published after it subscribed. Slow
/// subscribers observe `RecvError::Lagged` rather than slowing the publisher.
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    source: String,
    tx: broadcast::Sender<EventEnvelope>,
}

impl BroadcastBus {
    /// Create a bus stamping events with `source`.
    pub fn new(source: impl Into<String>) -> Self {
        Self::with_capacity(source, DEFAULT_BUS_CAPACITY)
    }

    /// Create a bus with an explicit per-subscriber buffer.
    pub fn with_capacity(source: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            source: source.into(),
            tx,
        }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastBus {
    fn publish(&self, event: ContainerEvent) {
        let envelope = EventEnvelope::new(self.source.clone(), event);
        // No subscribers is not an error for a fire-and-forget bus.
        if self.tx.send(envelope).is_err() {
            trace!("no subscribers for container event");
        }
    }
}
