//! BrowserGrid control plane.
//!
//! The hub side of a browser-automation grid: admission and placement of
//! new sessions (distributor), the authoritative session-to-node binding
//! (session map), the fleet directory with health tracking (node registry),
//! and the lifecycle event bus tying them together. Transports live in
//! sibling crates; this crate never opens a socket.

pub mod capabilities;
pub mod client;
pub mod config;
pub mod distributor;
pub mod error;
pub mod events;
pub mod health;
pub mod node;
pub mod registry;
pub mod session;
pub mod sessionmap;

pub use error::{Error, Result};
