//! Fleet directory: registration, slot accounting, draining, eviction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use url::Url;

use crate::events::{EventBus, GridEvent, Topic};
use crate::node::{Node, NodeStatus, NodeSummary};

/// The set of known nodes plus the slot bookkeeping the distributor places
/// against.
///
/// One readers-writer lock guards the whole directory: `snapshot` takes the
/// read guard; registration, eviction and the slot transitions take the
/// write guard. Each slot transition touches a single slot and returns
/// immediately, keeping write contention short.
pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, Node>>,
    bus: Arc<dyn EventBus>,
    registration_secret: String,
}

impl NodeRegistry {
    pub fn new(bus: Arc<dyn EventBus>, registration_secret: impl Into<String>) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            bus,
            registration_secret: registration_secret.into(),
        }
    }

    /// Apply one heartbeat payload: validate the secret, then create or
    /// update the node record. A known URI under a fresh node id is a
    /// restart, so the stale record is evicted first.
    pub async fn process_heartbeat(&self, status: NodeStatus) {
        let presented = status.registration_secret.clone().unwrap_or_default();
        if presented != self.registration_secret {
            tracing::warn!(node_id = %status.node_id, "node rejected: registration secret mismatch");
            self.bus.publish(GridEvent::NodeRejected {
                node_id: status.node_id,
                reason: "registration secret mismatch".to_string(),
            });
            return;
        }
        if Url::parse(&status.external_uri).is_err() {
            tracing::warn!(
                node_id = %status.node_id,
                uri = %status.external_uri,
                "node rejected: unparseable external URI"
            );
            self.bus.publish(GridEvent::NodeRejected {
                node_id: status.node_id,
                reason: "invalid external URI".to_string(),
            });
            return;
        }

        let mut drained = None;
        let mut replaced = None;
        {
            let mut nodes = self.nodes.write().await;
            if let Some(existing) = nodes.get_mut(&status.node_id) {
                Self::apply_update(existing, &status);
                if existing.draining && existing.active_count() == 0 {
                    drained = Some(existing.node_id.clone());
                }
            } else {
                let stale: Option<String> = nodes
                    .values()
                    .find(|n| n.external_uri == status.external_uri)
                    .map(|n| n.node_id.clone());
                if let Some(stale_id) = stale {
                    nodes.remove(&stale_id);
                    replaced = Some(stale_id);
                }
                tracing::info!(
                    node_id = %status.node_id,
                    uri = %status.external_uri,
                    slots = status.slots.len(),
                    "node registered"
                );
                let node = Node::from_status(&status);
                if node.draining && node.active_count() == 0 {
                    drained = Some(node.node_id.clone());
                }
                nodes.insert(status.node_id.clone(), node);
            }
        }
        if let Some(stale_id) = replaced {
            tracing::info!(
                node_id = %stale_id,
                uri = %status.external_uri,
                "node replaced by a new registration on the same URI"
            );
            self.bus.publish(GridEvent::NodeRemoved {
                node_id: stale_id,
                reason: "restarted".to_string(),
            });
        }
        if let Some(node_id) = drained {
            self.finish_drain(&node_id).await;
        }
    }

    /// Fold a heartbeat into an existing record.
    ///
    /// The node is authoritative for busy/idle occupancy; the hub is
    /// authoritative for in-flight reservations, which a lagging heartbeat
    /// must not erase.
    fn apply_update(existing: &mut Node, status: &NodeStatus) {
        let mut slots = status.slots.clone();
        for slot in &mut slots {
            if slot.session_id.is_none() {
                if let Some(prior) = existing.slots.iter().find(|s| s.id == slot.id) {
                    if prior.is_reserved() {
                        slot.reserved_at = prior.reserved_at;
                    }
                    if slot.last_started.is_none() {
                        slot.last_started = prior.last_started;
                    }
                }
            }
        }
        existing.external_uri = status.external_uri.clone();
        existing.max_sessions = status.max_sessions;
        existing.draining = status.draining;
        existing.slots = slots;
        existing.last_heartbeat = Instant::now();
    }

    /// Atomically flip a single idle slot to Reserved. Fails when the slot
    /// is no longer idle, the node drains, or either id is unknown.
    pub async fn reserve(&self, node_id: &str, slot_id: &str) -> bool {
        let mut nodes = self.nodes.write().await;
        let Some(node) = nodes.get_mut(node_id) else {
            return false;
        };
        if node.draining {
            return false;
        }
        let Some(slot) = node.slots.iter_mut().find(|s| s.id == slot_id) else {
            return false;
        };
        if !slot.is_idle() {
            return false;
        }
        slot.reserved_at = Some(Utc::now());
        true
    }

    /// Reserved becomes Busy once the node confirms the session.
    pub async fn confirm(&self, node_id: &str, slot_id: &str, session_id: &str) -> bool {
        let mut nodes = self.nodes.write().await;
        let Some(node) = nodes.get_mut(node_id) else {
            return false;
        };
        let Some(slot) = node.slots.iter_mut().find(|s| s.id == slot_id) else {
            return false;
        };
        slot.reserved_at = None;
        slot.session_id = Some(session_id.to_string());
        slot.last_started = Some(Utc::now());
        true
    }

    /// Return a slot to Idle (failed create, ended session, janitor sweep).
    pub async fn release(&self, node_id: &str, slot_id: &str) -> bool {
        let mut drained = None;
        let released = {
            let mut nodes = self.nodes.write().await;
            match nodes.get_mut(node_id) {
                Some(node) => {
                    match node.slots.iter_mut().find(|s| s.id == slot_id) {
                        Some(slot) => {
                            slot.reserved_at = None;
                            slot.session_id = None;
                            if node.draining && node.active_count() == 0 {
                                drained = Some(node_id.to_string());
                            }
                            true
                        }
                        None => false,
                    }
                }
                None => false,
            }
        };
        if let Some(node_id) = drained {
            self.finish_drain(&node_id).await;
        }
        released
    }

    /// A draining node with no remaining work leaves the fleet.
    async fn finish_drain(&self, node_id: &str) {
        let removed = { self.nodes.write().await.remove(node_id).is_some() };
        if removed {
            tracing::info!(node_id = %node_id, "drain complete");
            self.bus.publish(GridEvent::NodeDrainComplete {
                node_id: node_id.to_string(),
            });
            self.bus.publish(GridEvent::NodeRemoved {
                node_id: node_id.to_string(),
                reason: "drained".to_string(),
            });
        }
    }

    /// Remove a node outright, cascading through `node.removed`.
    pub async fn evict(&self, node_id: &str, reason: &str) -> bool {
        let removed = { self.nodes.write().await.remove(node_id).is_some() };
        if removed {
            tracing::warn!(node_id = %node_id, reason = %reason, "node evicted");
            self.bus.publish(GridEvent::NodeRemoved {
                node_id: node_id.to_string(),
                reason: reason.to_string(),
            });
        }
        removed
    }

    /// A consistent view of the fleet under one read guard.
    pub async fn snapshot(&self) -> Vec<Node> {
        self.nodes.read().await.values().cloned().collect()
    }

    pub async fn get(&self, node_id: &str) -> Option<Node> {
        self.nodes.read().await.get(node_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }

    pub async fn summaries(&self) -> Vec<NodeSummary> {
        let nodes = self.nodes.read().await;
        let mut out: Vec<NodeSummary> = nodes.values().map(NodeSummary::from).collect();
        out.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        out
    }

    /// Forcibly release reservations older than `max_age`; returns how
    /// many were released.
    pub async fn sweep_stale_reservations(&self, max_age: Duration) -> usize {
        let mut drained = Vec::new();
        let swept = {
            let mut nodes = self.nodes.write().await;
            let mut count = 0;
            for node in nodes.values_mut() {
                for slot in &mut node.slots {
                    let stale = slot
                        .reserved_at
                        .map(|at| {
                            (Utc::now() - at)
                                .to_std()
                                .map(|age| age >= max_age)
                                .unwrap_or(false)
                        })
                        .unwrap_or(false);
                    if stale && slot.session_id.is_none() {
                        tracing::warn!(
                            node_id = %node.node_id,
                            slot_id = %slot.id,
                            "releasing orphaned reservation"
                        );
                        slot.reserved_at = None;
                        count += 1;
                    }
                }
                if node.draining && node.active_count() == 0 {
                    drained.push(node.node_id.clone());
                }
            }
            count
        };
        for node_id in drained {
            self.finish_drain(&node_id).await;
        }
        swept
    }

    /// Consume `node.heartbeat` events until shutdown.
    pub fn spawn_heartbeat_listener(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let mut events = registry.bus.subscribe(Topic::NodeHeartbeat);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(GridEvent::NodeHeartbeat(status)) => {
                            registry.process_heartbeat(status).await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "heartbeat listener lagged; continuing from latest");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}
