//! Common types for the worldgraph environment abstraction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a deployment node.
///
/// Assigned out of band (command line or deployment document) and unique
/// within one deployment graph.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Returns the raw integer id.
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to one transport connection.
///
/// Only valid while the connection is open; a reconnect yields a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Creates a new random ConnectionId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic ConnectionId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Opaque handle to a world owned by the simulation substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorldHandle(pub u64);

/// Envelope for protocol messages transmitted between nodes.
///
/// The payload is opaque to the transport; the orchestrator encodes its
/// logical messages into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketEnvelope {
    /// The encoded message bytes
    pub payload: Vec<u8>,

    /// Timestamp when the packet was created (sender's clock)
    pub timestamp_ms: u64,
}

impl PacketEnvelope {
    /// Creates a new envelope from payload bytes.
    pub fn new(payload: Vec<u8>, timestamp_ms: u64) -> Self {
        Self {
            payload,
            timestamp_ms,
        }
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_from_seed_is_stable() {
        assert_eq!(ConnectionId::from_seed(7), ConnectionId::from_seed(7));
        assert_ne!(ConnectionId::from_seed(7), ConnectionId::from_seed(8));
        assert_eq!(ConnectionId::from_seed(7).to_string().len(), 8);
    }

    #[test]
    fn test_node_id_serializes_as_integer() {
        // serde is exercised through the derive; Display is what logs use
        assert_eq!(NodeId(12).to_string(), "12");
        assert!(NodeId(1) < NodeId(2));
    }
}
