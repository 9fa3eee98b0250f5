//! Admission, matching, placement, and capacity accounting.
//!
//! The distributor turns an incoming capability request into a created
//! session on a concrete slot, or refuses. It holds no long-lived lock of
//! its own; it samples the registry under a read guard, reserves under the
//! registry's write guard, and only then talks to the chosen node.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::capabilities::Capabilities;
use crate::client::NodeClientFactory;
use crate::config::GridConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, GridEvent};
use crate::node::Node;
use crate::registry::NodeRegistry;
use crate::session::{Dialect, Session};
use crate::sessionmap::SessionMap;

/// A parsed new-session request: the always-match overlay plus the
/// alternatives the caller will accept, in preference order.
#[derive(Debug, Clone, Default)]
pub struct NewSessionRequest {
    pub always_match: Capabilities,
    pub first_match: Vec<Capabilities>,
    pub dialect: Dialect,
}

/// One matchable (node, slot) pair with its placement score.
#[derive(Debug, Clone)]
struct Candidate {
    node_id: String,
    node_uri: String,
    slot_id: String,
    stereotype: Capabilities,
    score: i64,
    busy_slots: usize,
    last_started: Option<DateTime<Utc>>,
}

pub struct Distributor {
    registry: Arc<NodeRegistry>,
    sessions: Arc<SessionMap>,
    bus: Arc<dyn EventBus>,
    clients: Arc<dyn NodeClientFactory>,
    config: GridConfig,
}

impl Distributor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        sessions: Arc<SessionMap>,
        bus: Arc<dyn EventBus>,
        clients: Arc<dyn NodeClientFactory>,
        config: GridConfig,
    ) -> Self {
        Self {
            registry,
            sessions,
            bus,
            clients,
            config,
        }
    }

    /// Whether the grid can take traffic.
    pub async fn ready(&self) -> bool {
        !self.registry.is_empty().await
    }

    /// Place a new session somewhere in the fleet.
    ///
    /// Alternatives are tried in order; within one alternative a lost
    /// reservation race resamples the fleet up to the configured attempt
    /// ceiling. The whole call honors the new-session deadline.
    pub async fn create_session(&self, request: NewSessionRequest) -> Result<Session> {
        let deadline = Instant::now() + self.config.new_session_timeout();
        let alternatives = merge_alternatives(&request)?;

        for blob in &alternatives {
            if let Some(session) = self.place(blob, request.dialect, deadline).await? {
                return Ok(session);
            }
        }
        Err(Error::SessionNotCreated("no slot matched".to_string()))
    }

    /// Try to place one alternative. `Ok(None)` means this blob found no
    /// capacity and the caller should move on to the next one.
    async fn place(
        &self,
        blob: &Capabilities,
        dialect: Dialect,
        deadline: Instant,
    ) -> Result<Option<Session>> {
        let mut attempts = 0u32;
        loop {
            if Instant::now() >= deadline {
                return Err(Error::SessionNotCreated(
                    "new session request timed out".to_string(),
                ));
            }

            let nodes = self.registry.snapshot().await;
            let Some(candidate) = self.best_candidate(&nodes, blob) else {
                return Ok(None);
            };

            if !self
                .registry
                .reserve(&candidate.node_id, &candidate.slot_id)
                .await
            {
                // lost the race; resample from a fresh snapshot
                attempts += 1;
                if attempts >= self.config.max_placement_attempts {
                    return Ok(None);
                }
                continue;
            }

            let client = self.clients.client_for(&candidate.node_uri);
            match client.create_session(blob).await {
                Ok(created) => {
                    self.registry
                        .confirm(&candidate.node_id, &candidate.slot_id, &created.session_id)
                        .await;
                    let session = Session {
                        session_id: created.session_id.clone(),
                        node_id: candidate.node_id.clone(),
                        slot_id: candidate.slot_id.clone(),
                        node_uri: candidate.node_uri.clone(),
                        stereotype: candidate.stereotype.clone(),
                        capabilities: created.capabilities,
                        started_at: Utc::now(),
                        dialect,
                    };
                    if let Err(err) = self.sessions.add(session.clone()).await {
                        // an id collision is a node misbehaving; back out
                        self.registry
                            .release(&candidate.node_id, &candidate.slot_id)
                            .await;
                        let _ = client.delete_session(&created.session_id).await;
                        return Err(err);
                    }
                    self.bus.publish(GridEvent::SessionStarted {
                        session_id: session.session_id.clone(),
                        node_id: session.node_id.clone(),
                    });
                    tracing::info!(
                        session_id = %session.session_id,
                        node_id = %session.node_id,
                        slot_id = %session.slot_id,
                        "session created"
                    );
                    return Ok(Some(session));
                }
                Err(err) => {
                    // the health loop owns eviction; here we only give the
                    // slot back and move on
                    tracing::warn!(
                        node_id = %candidate.node_id,
                        error = %err,
                        "node did not produce a session; releasing reservation"
                    );
                    self.registry
                        .release(&candidate.node_id, &candidate.slot_id)
                        .await;
                    return Ok(None);
                }
            }
        }
    }

    /// Filter live, non-draining nodes, enumerate idle slots whose
    /// stereotype satisfies the blob, and keep the best-scoring pair.
    fn best_candidate(&self, nodes: &[Node], blob: &Capabilities) -> Option<Candidate> {
        let unhealthy_after = self.config.unhealthy_after();
        let informational = &self.config.informational_keys;
        let mut best: Option<Candidate> = None;
        for node in nodes {
            if node.draining || node.last_heartbeat.elapsed() > unhealthy_after {
                continue;
            }
            if node.active_count() >= node.max_sessions {
                continue;
            }
            let busy_slots = node.busy_count();
            // untouched nodes outrank used ones; among used nodes, fewer busy slots wins
            let headroom_bonus: i64 = if busy_slots > 0 { 0 } else { 1_000_000 };
            let score = headroom_bonus - busy_slots as i64;
            for slot in &node.slots {
                if !slot.is_idle() || !slot.stereotype.satisfies(blob, informational) {
                    continue;
                }
                let candidate = Candidate {
                    node_id: node.node_id.clone(),
                    node_uri: node.external_uri.clone(),
                    slot_id: slot.id.clone(),
                    stereotype: slot.stereotype.clone(),
                    score,
                    busy_slots,
                    last_started: slot.last_started,
                };
                let replace = match &best {
                    Some(incumbent) => placement_order(&candidate, incumbent) == Ordering::Less,
                    None => true,
                };
                if replace {
                    best = Some(candidate);
                }
            }
        }
        best
    }

    /// Tear down a session: forward the delete to the owning node, then
    /// drop the binding and free the slot. A vanished node only skips the
    /// forwarding step.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let session = self.sessions.get(session_id).await?;
        let client = self.clients.client_for(&session.node_uri);
        if let Err(err) = client.delete_session(session_id).await {
            tracing::warn!(
                session_id = %session_id,
                node_id = %session.node_id,
                error = %err,
                "node-side delete failed; dropping the binding anyway"
            );
        }
        self.sessions.remove(session_id).await;
        self.registry
            .release(&session.node_id, &session.slot_id)
            .await;
        self.bus.publish(GridEvent::SessionEnded {
            session_id: session_id.to_string(),
            node_id: session.node_id.clone(),
            reason: "deleted".to_string(),
        });
        tracing::info!(session_id = %session_id, "session deleted");
        Ok(())
    }
}

/// Merge the always-match overlay into each alternative. An empty request
/// is refused at admission.
fn merge_alternatives(request: &NewSessionRequest) -> Result<Vec<Capabilities>> {
    if request.first_match.is_empty() {
        if request.always_match.is_empty() {
            return Err(Error::SessionNotCreated(
                "no capabilities supplied".to_string(),
            ));
        }
        return Ok(vec![request.always_match.clone()]);
    }
    let mut merged = Vec::with_capacity(request.first_match.len());
    for alternative in &request.first_match {
        merged.push(alternative.merged_with(&request.always_match)?);
    }
    if merged.iter().all(|blob| blob.is_empty()) {
        return Err(Error::SessionNotCreated(
            "no capabilities supplied".to_string(),
        ));
    }
    Ok(merged)
}

/// Total order over candidates: highest score first, ties broken by fewest
/// busy slots, then the least-recently-started slot, then the smallest
/// node id. The trailing slot-id comparison keeps the choice deterministic
/// within a node.
fn placement_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .cmp(&a.score)
        .then(a.busy_slots.cmp(&b.busy_slots))
        .then(cmp_last_started(a.last_started, b.last_started))
        .then(a.node_id.cmp(&b.node_id))
        .then(a.slot_id.cmp(&b.slot_id))
}

/// Never-used slots sort before any used one.
fn cmp_last_started(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.cmp(&b),
    }
}
