//! Event sinks
//!
//! Emission never fails from the producer's point of view: a sink that
//! cannot deliver drops the event and logs at debug level.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::ArbiterEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Receiver of engine events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ArbiterEvent);
}

/// Shared reference to an event sink
pub type SharedEventSink = Arc<dyn EventSink>;

/// Sink that discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &ArbiterEvent) {}
}

impl<F> EventSink for F
where
    F: Fn(&ArbiterEvent) + Send + Sync,
{
    fn emit(&self, event: &ArbiterEvent) {
        self(event)
    }
}

/// Broadcast fan-out to any number of subscribers
pub struct BroadcastSink {
    sender: broadcast::Sender<ArbiterEvent>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Create with a custom channel capacity (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a shared reference to this sink
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<ArbiterEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: &ArbiterEvent) {
        let event_type = event.event_type();
        match self.sender.send(event.clone()) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            // No receivers is not an error
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitration::ArbitrationMethod;
    use chrono::Utc;
    use std::sync::Mutex;

    fn decision_event() -> ArbiterEvent {
        ArbiterEvent::DecisionMade {
            method: ArbitrationMethod::HighestConfidence,
            confidence: 0.3,
            elapsed_ms: 0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let sink: SharedEventSink = Arc::new(move |event: &ArbiterEvent| {
            captured.lock().unwrap().push(event.event_type());
        });

        sink.emit(&decision_event());
        assert_eq!(*seen.lock().unwrap(), vec!["decision:made"]);
    }

    #[test]
    fn test_noop_sink() {
        NoopSink.emit(&decision_event());
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers() {
        let sink = BroadcastSink::new();
        let mut rx = sink.subscribe();
        assert_eq!(sink.subscriber_count(), 1);

        sink.emit(&decision_event());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "decision:made");
    }

    #[test]
    fn test_broadcast_sink_without_subscribers() {
        let sink = BroadcastSink::with_capacity(0);
        assert_eq!(sink.subscriber_count(), 0);
        sink.emit(&decision_event());
    }
}
