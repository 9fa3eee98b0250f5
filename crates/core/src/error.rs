//! Error types for the BrowserGrid control plane.

use thiserror::Error;

/// Result type alias for control-plane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the control plane.
///
/// Transport failures during placement are translated into
/// `SessionNotCreated` before they reach the routing boundary; the HTTP
/// layer maps each remaining kind onto one downstream status code.
#[derive(Debug, Error)]
pub enum Error {
    /// Matching failed, every alternative was exhausted, or the chosen node refused
    #[error("session not created: {0}")]
    SessionNotCreated(String),

    /// The referenced session id is unknown (ended, never existed, or cleaned up)
    #[error("no such session: {0}")]
    NoSuchSession(String),

    /// A session with this id is already tracked
    #[error("duplicate session: {0}")]
    DuplicateSession(String),

    /// Malformed request body, or capabilities violating schema
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An upstream node RPC failed at the transport level
    #[error("node unreachable: {0}")]
    NodeUnreachable(String),

    /// A control-plane deadline expired
    #[error("timed out: {0}")]
    Timeout(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}
