//! Authoritative session-to-node binding.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::events::{EventBus, GridEvent, Topic};
use crate::session::Session;

/// Keyed store of live sessions.
///
/// Exactly one record per live session; operations are linearizable per
/// session id under a single readers-writer lock. Reads dominate: every
/// forwarded request takes the read guard, only create/delete take the
/// write guard.
pub struct SessionMap {
    sessions: RwLock<HashMap<String, Session>>,
    bus: Arc<dyn EventBus>,
}

impl SessionMap {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Insert a freshly created session.
    pub async fn add(&self, session: Session) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.session_id) {
            return Err(Error::DuplicateSession(session.session_id));
        }
        sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::NoSuchSession(session_id.to_string()))
    }

    /// Idempotent delete; returns whether a record was removed.
    pub async fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    /// All sessions currently bound to the node.
    pub async fn list_by_node(&self, node_id: &str) -> Vec<Session> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.node_id == node_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop every session bound to a dead node, announcing each end.
    pub async fn remove_for_node(&self, node_id: &str, reason: &str) -> Vec<Session> {
        let removed: Vec<Session> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<String> = sessions
                .values()
                .filter(|s| s.node_id == node_id)
                .map(|s| s.session_id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        for session in &removed {
            tracing::info!(
                session_id = %session.session_id,
                node_id = %node_id,
                reason = %reason,
                "session ended"
            );
            self.bus.publish(GridEvent::SessionEnded {
                session_id: session.session_id.clone(),
                node_id: node_id.to_string(),
                reason: reason.to_string(),
            });
        }
        removed
    }

    /// Consume `node.removed` events until shutdown, cascading each
    /// eviction into the sessions it strands.
    pub fn spawn_node_removed_listener(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let map = Arc::clone(self);
        let mut events = map.bus.subscribe(Topic::NodeRemoved);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(GridEvent::NodeRemoved { node_id, .. }) => {
                            map.remove_for_node(&node_id, "node removed").await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "node-removed listener lagged; continuing");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}
