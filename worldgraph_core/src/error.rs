//! Error types for the deployment orchestrator.

use thiserror::Error;
use worldgraph_env::{EnvError, NodeId};

/// Errors surfaced by graph loading, the protocol codec and the driver.
///
/// None of these abort the tick loop. Callers log them and carry on;
/// only the experiment `Duration` expiry shuts a node down on purpose.
#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("Failed to read deployment document {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid deployment document: {0}")]
    Document(#[from] serde_json::Error),

    #[error("Node {0} is declared more than once")]
    DuplicateNode(NodeId),

    #[error("Protocol codec error: {0}")]
    Codec(String),

    /// A hostname yielded zero addresses.
    #[error("No addresses resolved for {0}")]
    Resolution(String),

    /// A live world already carries this name.
    #[error("World name already in use: {0}")]
    DuplicateWorld(String),

    #[error(transparent)]
    Env(#[from] EnvError),
}

impl DeploymentError {
    /// Creates a codec error.
    pub fn codec(msg: impl std::fmt::Display) -> Self {
        Self::Codec(msg.to_string())
    }

    /// Creates a resolution error for `host`.
    pub fn resolution(host: impl Into<String>) -> Self {
        Self::Resolution(host.into())
    }
}
