//! HTTP boundary for the grid hub.
//!
//! Downstream, an axum router implements the public URL space: session
//! creation and deletion, verbatim forwarding of per-session traffic to
//! the owning node, the readiness report, and the management surface.
//! Upstream, a reqwest-backed `NodeClient` carries the hub's RPCs to
//! nodes. Dialect handling (W3C vs. legacy request and reply shapes)
//! lives in `dialect`.

pub mod client;
pub mod dialect;
pub mod server;

pub use client::{HttpNodeClient, HttpNodeClientFactory};
pub use server::{build_router, AppState};
