//! The capability set the control plane holds against a node.
//!
//! Local (in-process) and remote (HTTP) nodes implement the same trait, so
//! the distributor and the health monitor never name a transport. A factory
//! turns a node's advertised URI into a client for it.

use async_trait::async_trait;
use std::sync::Arc;

use crate::capabilities::Capabilities;
use crate::error::Result;
use crate::node::NodeStatus;

/// The descriptor a node returns from a successful create-session call.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedSession {
    /// Fleet-unique id assigned by the node
    pub session_id: String,
    /// The capabilities the node actually negotiated
    pub capabilities: Capabilities,
}

/// Operations the control plane invokes on a node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Fetch the node's current status snapshot.
    async fn status(&self) -> Result<NodeStatus>;

    /// Ask the node to start a session for the merged capability blob.
    async fn create_session(&self, capabilities: &Capabilities) -> Result<CreatedSession>;

    /// Ask the node to terminate a session.
    async fn delete_session(&self, session_id: &str) -> Result<()>;
}

/// Builds a client for a node endpoint.
pub trait NodeClientFactory: Send + Sync {
    fn client_for(&self, external_uri: &str) -> Arc<dyn NodeClient>;
}
