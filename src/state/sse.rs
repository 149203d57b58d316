use std::sync::Arc;

use tokio::sync::broadcast;

/// Broadcast hub fanning serialized snapshots out to every push stream.
pub struct SseHub {
    sender: broadcast::Sender<Arc<str>>,
}

impl SseHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.sender.subscribe()
    }

    /// Send a payload to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, payload: Arc<str>) {
        let _ = self.sender.send(payload);
    }

    /// Number of connected streams.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
