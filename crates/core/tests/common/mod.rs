//! Shared test doubles: in-process nodes behind the `NodeClient` trait, and
//! a fully wired control plane with no sockets anywhere.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use browsergrid_core::capabilities::Capabilities;
use browsergrid_core::client::{CreatedSession, NodeClient, NodeClientFactory};
use browsergrid_core::config::GridConfig;
use browsergrid_core::distributor::{Distributor, NewSessionRequest};
use browsergrid_core::error::{Error, Result};
use browsergrid_core::events::{EventBus, LocalEventBus};
use browsergrid_core::node::{NodeStatus, Slot};
use browsergrid_core::registry::NodeRegistry;
use browsergrid_core::session::Dialect;
use browsergrid_core::sessionmap::SessionMap;

/// An in-process stand-in for a node's HTTP surface.
pub struct FakeNode {
    status: NodeStatus,
    fail_creates: AtomicBool,
    pub created: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    counter: AtomicUsize,
}

impl FakeNode {
    pub fn new(status: NodeStatus) -> Arc<Self> {
        Arc::new(Self {
            status,
            fail_creates: AtomicBool::new(false),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
        })
    }

    /// Make every subsequent create-session call fail.
    pub fn refuse_sessions(&self) {
        self.fail_creates.store(true, Ordering::SeqCst);
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl NodeClient for FakeNode {
    async fn status(&self) -> Result<NodeStatus> {
        Ok(self.status.clone())
    }

    async fn create_session(&self, capabilities: &Capabilities) -> Result<CreatedSession> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(Error::NodeUnreachable("fake node refused".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let session_id = format!("{}-{n}", uuid::Uuid::new_v4());
        self.created.lock().unwrap().push(session_id.clone());
        Ok(CreatedSession {
            session_id,
            capabilities: capabilities.clone(),
        })
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.deleted.lock().unwrap().push(session_id.to_string());
        Ok(())
    }
}

/// A node that dropped off the network.
pub struct DeadNode;

#[async_trait]
impl NodeClient for DeadNode {
    async fn status(&self) -> Result<NodeStatus> {
        Err(Error::NodeUnreachable("connection refused".to_string()))
    }

    async fn create_session(&self, _capabilities: &Capabilities) -> Result<CreatedSession> {
        Err(Error::NodeUnreachable("connection refused".to_string()))
    }

    async fn delete_session(&self, _session_id: &str) -> Result<()> {
        Err(Error::NodeUnreachable("connection refused".to_string()))
    }
}

/// Routes client lookups to registered fakes; unknown URIs behave like a
/// machine that went away.
pub struct FakeFactory {
    nodes: Mutex<HashMap<String, Arc<FakeNode>>>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(HashMap::new()),
        })
    }

    pub fn register(&self, uri: &str, node: Arc<FakeNode>) {
        self.nodes.lock().unwrap().insert(uri.to_string(), node);
    }

    pub fn forget(&self, uri: &str) {
        self.nodes.lock().unwrap().remove(uri);
    }
}

impl NodeClientFactory for FakeFactory {
    fn client_for(&self, external_uri: &str) -> Arc<dyn NodeClient> {
        let nodes = self.nodes.lock().unwrap();
        match nodes.get(external_uri) {
            Some(node) => node.clone() as Arc<dyn NodeClient>,
            None => Arc::new(DeadNode) as Arc<dyn NodeClient>,
        }
    }
}

/// A wired control plane over fake nodes.
pub struct Grid {
    pub bus: Arc<LocalEventBus>,
    pub registry: Arc<NodeRegistry>,
    pub sessions: Arc<SessionMap>,
    pub distributor: Arc<Distributor>,
    pub factory: Arc<FakeFactory>,
}

pub fn grid(config: GridConfig) -> Grid {
    let bus = Arc::new(LocalEventBus::new());
    let registry = Arc::new(NodeRegistry::new(
        bus.clone() as Arc<dyn EventBus>,
        config.registration_secret.clone(),
    ));
    let sessions = Arc::new(SessionMap::new(bus.clone() as Arc<dyn EventBus>));
    let factory = FakeFactory::new();
    let distributor = Arc::new(Distributor::new(
        registry.clone(),
        sessions.clone(),
        bus.clone() as Arc<dyn EventBus>,
        factory.clone(),
        config,
    ));
    Grid {
        bus,
        registry,
        sessions,
        distributor,
        factory,
    }
}

impl Grid {
    /// Register a fake node and deliver its first heartbeat.
    pub async fn add_node(&self, status: NodeStatus) -> Arc<FakeNode> {
        let fake = FakeNode::new(status.clone());
        self.factory.register(&status.external_uri, fake.clone());
        self.registry.process_heartbeat(status).await;
        fake
    }
}

pub fn caps(value: Value) -> Capabilities {
    Capabilities::from_value(value).expect("capabilities literal")
}

pub fn slot(id: &str, stereotype: Value) -> Slot {
    Slot::new(id, caps(stereotype))
}

pub fn chrome_slot(id: &str) -> Slot {
    slot(id, json!({"browserName": "chrome"}))
}

pub fn node_status(node_id: &str, uri: &str, slots: Vec<Slot>) -> NodeStatus {
    NodeStatus {
        node_id: node_id.to_string(),
        external_uri: uri.to_string(),
        max_sessions: slots.len(),
        slots,
        draining: false,
        registration_secret: None,
    }
}

pub fn w3c_request(always_match: Value, first_match: Vec<Value>) -> NewSessionRequest {
    NewSessionRequest {
        always_match: caps(always_match),
        first_match: first_match.into_iter().map(caps).collect(),
        dialect: Dialect::W3c,
    }
}
