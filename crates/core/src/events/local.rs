//! In-process event bus backed by one broadcast channel per topic.

use tokio::sync::broadcast;

use super::{EventBus, GridEvent, Topic};

/// Per-subscriber buffer; a receiver this far behind starts losing its
/// oldest deliveries, which is the bus contract.
const TOPIC_BUFFER: usize = 256;

pub struct LocalEventBus {
    channels: [broadcast::Sender<GridEvent>; Topic::COUNT],
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self {
            channels: std::array::from_fn(|_| broadcast::channel(TOPIC_BUFFER).0),
        }
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for LocalEventBus {
    fn publish(&self, event: GridEvent) {
        let topic = event.topic();
        // send only fails when nobody subscribes to the topic
        if let Err(dropped) = self.channels[topic.index()].send(event) {
            tracing::trace!(topic = topic.as_str(), "event had no subscribers: {dropped}");
        }
    }

    fn subscribe(&self, topic: Topic) -> broadcast::Receiver<GridEvent> {
        self.channels[topic.index()].subscribe()
    }
}
