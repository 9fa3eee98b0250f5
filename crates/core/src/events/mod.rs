//! Topic-addressed, fire-and-forget pub/sub carrying grid lifecycle events.
//!
//! Node lifecycle flows node -> bus -> registry -> distributor; session
//! lifecycle flows the other way. The bus is the one pluggable seam of the
//! control plane: `LocalEventBus` dispatches in-process, and a
//! network-backed implementation can satisfy the same trait.

mod local;

pub use local::LocalEventBus;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::node::NodeStatus;

/// Topics carried by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    NodeHeartbeat,
    NodeDrainComplete,
    NodeRejected,
    NodeRemoved,
    SessionStarted,
    SessionEnded,
}

impl Topic {
    pub const COUNT: usize = 6;

    pub const ALL: [Topic; Topic::COUNT] = [
        Topic::NodeHeartbeat,
        Topic::NodeDrainComplete,
        Topic::NodeRejected,
        Topic::NodeRemoved,
        Topic::SessionStarted,
        Topic::SessionEnded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::NodeHeartbeat => "node.heartbeat",
            Topic::NodeDrainComplete => "node.drain-complete",
            Topic::NodeRejected => "node.rejected",
            Topic::NodeRemoved => "node.removed",
            Topic::SessionStarted => "session.started",
            Topic::SessionEnded => "session.ended",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Topic::NodeHeartbeat => 0,
            Topic::NodeDrainComplete => 1,
            Topic::NodeRejected => 2,
            Topic::NodeRemoved => 3,
            Topic::SessionStarted => 4,
            Topic::SessionEnded => 5,
        }
    }
}

/// A lifecycle event together with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GridEvent {
    NodeHeartbeat(NodeStatus),
    NodeRejected {
        node_id: String,
        reason: String,
    },
    NodeRemoved {
        node_id: String,
        reason: String,
    },
    NodeDrainComplete {
        node_id: String,
    },
    SessionStarted {
        session_id: String,
        node_id: String,
    },
    SessionEnded {
        session_id: String,
        node_id: String,
        reason: String,
    },
}

impl GridEvent {
    /// The topic this event is published on.
    pub fn topic(&self) -> Topic {
        match self {
            GridEvent::NodeHeartbeat(_) => Topic::NodeHeartbeat,
            GridEvent::NodeRejected { .. } => Topic::NodeRejected,
            GridEvent::NodeRemoved { .. } => Topic::NodeRemoved,
            GridEvent::NodeDrainComplete { .. } => Topic::NodeDrainComplete,
            GridEvent::SessionStarted { .. } => Topic::SessionStarted,
            GridEvent::SessionEnded { .. } => Topic::SessionEnded,
        }
    }
}

/// Fire-and-forget pub/sub.
///
/// Publishing returns after the payload is handed to the bus; failures are
/// logged and swallowed. Subscribers observe per-topic publish order, and a
/// slow subscriber loses its oldest deliveries rather than stalling the
/// publisher.
pub trait EventBus: Send + Sync {
    /// Hand the event to the bus.
    fn publish(&self, event: GridEvent);

    /// Receive every subsequent event published on `topic`.
    fn subscribe(&self, topic: Topic) -> broadcast::Receiver<GridEvent>;
}
