//! The public router.
//!
//! Stateless with respect to sessions: new-session and delete-session
//! requests go to the distributor, every other `/session/{id}/...` request
//! is forwarded verbatim to the node the session map names, and the
//! status/management routes read the registry. All state lives behind the
//! handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Path, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use browsergrid_core::distributor::Distributor;
use browsergrid_core::error::Error;
use browsergrid_core::events::{EventBus, GridEvent};
use browsergrid_core::node::NodeStatus;
use browsergrid_core::registry::NodeRegistry;
use browsergrid_core::session::Dialect;
use browsergrid_core::sessionmap::SessionMap;

use crate::dialect;

/// Largest request body the hub will buffer when forwarding.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// State shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub distributor: Arc<Distributor>,
    pub sessions: Arc<SessionMap>,
    pub registry: Arc<NodeRegistry>,
    pub bus: Arc<dyn EventBus>,
    /// Connection pool for forwarding existing-session traffic
    proxy: reqwest::Client,
}

impl AppState {
    pub fn new(
        distributor: Arc<Distributor>,
        sessions: Arc<SessionMap>,
        registry: Arc<NodeRegistry>,
        bus: Arc<dyn EventBus>,
        node_rpc_timeout: Duration,
    ) -> Self {
        let proxy = reqwest::Client::builder()
            .timeout(node_rpc_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            distributor,
            sessions,
            registry,
            bus,
            proxy,
        }
    }
}

/// Build the downstream router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/session", post(new_session))
        .route("/session/:session_id", any(session_root))
        .route("/session/:session_id/*tail", any(session_tail))
        .route("/status", get(grid_status))
        .route("/se/grid/nodes", get(list_nodes))
        .route("/se/grid/node/heartbeat", post(node_heartbeat))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_response(error: &Error, dialect: Dialect) -> Response {
    let status = StatusCode::from_u16(dialect::error_status(error))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(dialect::error_body(error, dialect))).into_response()
}

/// POST /session
async fn new_session(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match dialect::parse_new_session(&body) {
        Ok(request) => request,
        Err(err) => return error_response(&err, Dialect::W3c),
    };
    let dialect = request.dialect;
    match state.distributor.create_session(request).await {
        Ok(session) => (StatusCode::OK, Json(dialect::created_body(&session))).into_response(),
        Err(err) => error_response(&err, dialect),
    }
}

/// DELETE /session/{id} ends the session; every other method on the bare
/// session path rides through to the owning node.
async fn session_root(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    request: Request,
) -> Response {
    if request.method() == Method::DELETE {
        let dialect = state
            .sessions
            .get(&session_id)
            .await
            .map(|s| s.dialect)
            .unwrap_or_default();
        return match state.distributor.delete_session(&session_id).await {
            Ok(()) => (StatusCode::OK, Json(dialect::deleted_body(dialect))).into_response(),
            Err(err) => error_response(&err, dialect),
        };
    }
    forward(state, session_id, String::new(), request).await
}

/// Any /session/{id}/... request rides through to the owning node.
async fn session_tail(
    State(state): State<AppState>,
    Path((session_id, tail)): Path<(String, String)>,
    request: Request,
) -> Response {
    forward(state, session_id, format!("/{tail}"), request).await
}

/// Look up the owning node and replay the request against it.
async fn forward(state: AppState, session_id: String, tail: String, request: Request) -> Response {
    let session = match state.sessions.get(&session_id).await {
        Ok(session) => session,
        Err(err) => return error_response(&err, Dialect::W3c),
    };
    let url = format!(
        "{}/session/{session_id}{tail}",
        session.node_uri.trim_end_matches('/')
    );

    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return error_response(
                &Error::InvalidArgument(format!("unreadable request body: {err}")),
                session.dialect,
            )
        }
    };
    let method = match reqwest::Method::from_bytes(parts.method.as_str().as_bytes()) {
        Ok(method) => method,
        Err(_) => {
            return error_response(
                &Error::InvalidArgument("unsupported method".to_string()),
                session.dialect,
            )
        }
    };

    tracing::debug!(
        session_id = %session_id,
        node_id = %session.node_id,
        method = %method,
        "forwarding session request"
    );

    let mut upstream = state.proxy.request(method, url).body(body.to_vec());
    if let Some(content_type) = parts.headers.get(header::CONTENT_TYPE) {
        if let Ok(value) = content_type.to_str() {
            upstream = upstream.header(reqwest::header::CONTENT_TYPE, value);
        }
    }

    let reply = match upstream.send().await {
        Ok(reply) => reply,
        Err(err) => {
            return error_response(
                &Error::NodeUnreachable(format!("forwarding to node: {err}")),
                session.dialect,
            )
        }
    };

    let status =
        StatusCode::from_u16(reply.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = reply
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    match reply.bytes().await {
        Ok(bytes) => {
            let mut response = Response::builder().status(status);
            if let Some(content_type) = content_type {
                response = response.header(header::CONTENT_TYPE, content_type);
            }
            response
                .body(Body::from(bytes))
                .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
        }
        Err(err) => error_response(
            &Error::NodeUnreachable(format!("reading node reply: {err}")),
            session.dialect,
        ),
    }
}

/// GET /status - aggregate readiness report.
async fn grid_status(State(state): State<AppState>) -> Response {
    let nodes = state.registry.summaries().await;
    let ready = state.distributor.ready().await;
    let message = if ready {
        "hub is ready"
    } else {
        "no nodes registered"
    };
    (
        StatusCode::OK,
        Json(json!({
            "value": { "ready": ready, "message": message, "nodes": nodes }
        })),
    )
        .into_response()
}

/// GET /se/grid/nodes - management listing.
async fn list_nodes(State(state): State<AppState>) -> Response {
    let nodes = state.registry.summaries().await;
    (StatusCode::OK, Json(json!({ "value": { "nodes": nodes } }))).into_response()
}

/// POST /se/grid/node/heartbeat - the HTTP path by which nodes reach the
/// hub's event bus. Secret validation happens in the registry.
async fn node_heartbeat(State(state): State<AppState>, body: Bytes) -> Response {
    let status: NodeStatus = match serde_json::from_slice(&body) {
        Ok(status) => status,
        Err(err) => {
            return error_response(
                &Error::InvalidArgument(format!("malformed node status: {err}")),
                Dialect::W3c,
            )
        }
    };
    state.bus.publish(GridEvent::NodeHeartbeat(status));
    (StatusCode::OK, Json(json!({ "value": null }))).into_response()
}
