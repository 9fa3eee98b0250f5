//! Node and slot records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::capabilities::Capabilities;

/// The unit of session capacity on a node.
///
/// Occupancy is carried by `session_id` (busy) and `reserved_at` (a
/// hub-side reservation awaiting the node's create-session reply); a slot
/// with neither is idle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    /// Slot id, unique within its node
    pub id: String,
    /// What kinds of sessions this slot can host
    pub stereotype: Capabilities,
    /// When a session last started on this slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started: Option<DateTime<Utc>>,
    /// Session currently bound to the slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Set between a successful reserve and the node's create-session reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_at: Option<DateTime<Utc>>,
}

impl Slot {
    pub fn new(id: impl Into<String>, stereotype: Capabilities) -> Self {
        Self {
            id: id.into(),
            stereotype,
            last_started: None,
            session_id: None,
            reserved_at: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.session_id.is_none() && self.reserved_at.is_none()
    }

    pub fn is_busy(&self) -> bool {
        self.session_id.is_some()
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved_at.is_some() && self.session_id.is_none()
    }
}

/// The status snapshot a node publishes on every heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub external_uri: String,
    pub max_sessions: usize,
    pub slots: Vec<Slot>,
    #[serde(default)]
    pub draining: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_secret: Option<String>,
}

/// A registered node as tracked by the registry.
#[derive(Debug, Clone)]
pub struct Node {
    pub node_id: String,
    pub external_uri: String,
    pub max_sessions: usize,
    pub slots: Vec<Slot>,
    pub draining: bool,
    /// Monotonic arrival time of the most recent heartbeat
    pub last_heartbeat: Instant,
}

impl Node {
    pub(crate) fn from_status(status: &NodeStatus) -> Self {
        Self {
            node_id: status.node_id.clone(),
            external_uri: status.external_uri.clone(),
            max_sessions: status.max_sessions,
            slots: status.slots.clone(),
            draining: status.draining,
            last_heartbeat: Instant::now(),
        }
    }

    /// Slots currently bound to a session
    pub fn busy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_busy()).count()
    }

    /// Busy plus reserved slots
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_idle()).count()
    }
}

/// Serializable per-node summary for the management surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub node_id: String,
    pub external_uri: String,
    pub max_sessions: usize,
    pub draining: bool,
    pub slot_count: usize,
    pub busy_slots: usize,
}

impl From<&Node> for NodeSummary {
    fn from(node: &Node) -> Self {
        Self {
            node_id: node.node_id.clone(),
            external_uri: node.external_uri.clone(),
            max_sessions: node.max_sessions,
            draining: node.draining,
            slot_count: node.slots.len(),
            busy_slots: node.busy_count(),
        }
    }
}
