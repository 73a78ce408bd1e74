//! Error types for the worldgraph environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Network send failed (buffer full, router gone, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The connection handle does not refer to a live connection
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    /// Target node is unreachable (simulated partition)
    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),

    /// Hostname lookup failed or yielded no addresses
    #[error("Resolution failed for {0}")]
    ResolutionError(String),

    /// Packet serialization/deserialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Creates an unreachable error.
    pub fn unreachable(node: impl std::fmt::Display) -> Self {
        Self::NodeUnreachable(node.to_string())
    }

    /// Creates an unknown-connection error.
    pub fn unknown_connection(conn: impl std::fmt::Display) -> Self {
        Self::UnknownConnection(conn.to_string())
    }

    /// Creates a resolution error for `host`.
    pub fn resolution(host: impl Into<String>) -> Self {
        Self::ResolutionError(host.into())
    }
}
