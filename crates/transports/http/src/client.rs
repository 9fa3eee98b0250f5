//! Upstream RPCs: the reqwest-backed node client.
//!
//! One client per node endpoint, all sharing a single connection pool
//! through the factory. Timeouts are per call: the longer RPC budget for
//! session create/delete, the short probe budget for status checks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use browsergrid_core::capabilities::Capabilities;
use browsergrid_core::client::{CreatedSession, NodeClient, NodeClientFactory};
use browsergrid_core::error::{Error, Result};
use browsergrid_core::node::NodeStatus;

/// HTTP client for one node endpoint.
pub struct HttpNodeClient {
    base: String,
    http: reqwest::Client,
    rpc_timeout: Duration,
    probe_timeout: Duration,
}

impl HttpNodeClient {
    pub fn new(
        external_uri: &str,
        http: reqwest::Client,
        rpc_timeout: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            base: external_uri.trim_end_matches('/').to_string(),
            http,
            rpc_timeout,
            probe_timeout,
        }
    }

    fn transport_error(context: &str, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout(format!("{context}: {err}"))
        } else {
            Error::NodeUnreachable(format!("{context}: {err}"))
        }
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn status(&self) -> Result<NodeStatus> {
        let url = format!("{}/status", self.base);
        let response = self
            .http
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| Self::transport_error("status probe", e))?;
        if !response.status().is_success() {
            return Err(Error::NodeUnreachable(format!(
                "status probe returned {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| Self::transport_error("status body", e))?;
        // nodes reply with the bare snapshot or wrap it in "value"
        let snapshot = body.get("value").cloned().unwrap_or(body);
        serde_json::from_value(snapshot).map_err(Error::from)
    }

    async fn create_session(&self, capabilities: &Capabilities) -> Result<CreatedSession> {
        let url = format!("{}/session", self.base);
        let payload = json!({
            "capabilities": { "alwaysMatch": capabilities, "firstMatch": [{}] }
        });
        let response = self
            .http
            .post(&url)
            .timeout(self.rpc_timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Self::transport_error("create session", e))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| Self::transport_error("create session body", e))?;
        if !status.is_success() {
            let message = body
                .pointer("/value/message")
                .and_then(Value::as_str)
                .unwrap_or("node refused the session")
                .to_string();
            return Err(Error::SessionNotCreated(message));
        }
        parse_created(&body)
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let url = format!("{}/session/{session_id}", self.base);
        let response = self
            .http
            .delete(&url)
            .timeout(self.rpc_timeout)
            .send()
            .await
            .map_err(|e| Self::transport_error("delete session", e))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Err(Error::NoSuchSession(session_id.to_string()))
        } else {
            Err(Error::NodeUnreachable(format!(
                "delete session returned {status}"
            )))
        }
    }
}

/// Accept both reply dialects from nodes: the W3C envelope or the legacy
/// flat shape.
fn parse_created(body: &Value) -> Result<CreatedSession> {
    if let Some(value) = body.get("value") {
        if let Some(session_id) = value.get("sessionId").and_then(Value::as_str) {
            let capabilities = value.get("capabilities").cloned().unwrap_or_else(|| json!({}));
            return Ok(CreatedSession {
                session_id: session_id.to_string(),
                capabilities: Capabilities::from_value(capabilities)?,
            });
        }
    }
    if let Some(session_id) = body.get("sessionId").and_then(Value::as_str) {
        let capabilities = body.get("value").cloned().unwrap_or_else(|| json!({}));
        return Ok(CreatedSession {
            session_id: session_id.to_string(),
            capabilities: Capabilities::from_value(capabilities)?,
        });
    }
    Err(Error::SessionNotCreated(
        "node reply carried no session id".to_string(),
    ))
}

/// Builds per-node clients sharing one connection pool.
pub struct HttpNodeClientFactory {
    http: reqwest::Client,
    rpc_timeout: Duration,
    probe_timeout: Duration,
}

impl HttpNodeClientFactory {
    pub fn new(rpc_timeout: Duration, probe_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            rpc_timeout,
            probe_timeout,
        }
    }
}

impl NodeClientFactory for HttpNodeClientFactory {
    fn client_for(&self, external_uri: &str) -> Arc<dyn NodeClient> {
        Arc::new(HttpNodeClient::new(
            external_uri,
            self.http.clone(),
            self.rpc_timeout,
            self.probe_timeout,
        ))
    }
}
