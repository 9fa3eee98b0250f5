//! Session records and downstream dialects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capabilities::Capabilities;

/// The request/response shape negotiated with the caller, fixed per
/// session at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    W3c,
    Legacy,
}

impl Default for Dialect {
    fn default() -> Self {
        Dialect::W3c
    }
}

/// The authoritative record binding a session to its owning node.
///
/// `node_id` is a relation, never an ownership claim: the registry owns
/// node records. `node_uri` is cached here so routing an existing-session
/// request needs only the session map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub node_id: String,
    pub slot_id: String,
    pub node_uri: String,
    pub stereotype: Capabilities,
    pub capabilities: Capabilities,
    pub started_at: DateTime<Utc>,
    pub dialect: Dialect,
}
