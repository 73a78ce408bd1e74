//! Configuration protocol messages and the address substitution rules.
//!
//! Four logical messages travel between the authority and its members:
//!
//! ```text
//! Member                                   Authority
//!   |-- RequestConfig{nodeID} ---------------->|
//!   |<------------- ConfigMessage (per world) -|   or ConfigError{UnknownID|DuplicateID}
//!   |                 ...                      |
//!   |<------------- WorldActionMessage --------|   (experiment timeline)
//!   |-- ConfigError{UnknownWorld} ------------>|   (world name not found)
//! ```
//!
//! Messages are encoded as tagged JSON inside a [`PacketEnvelope`].

use crate::error::DeploymentError;
use crate::graph::{InitializationMode, StreamingRole, WorldAction, WorldType};

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use worldgraph_env::{EmulationType, NodeId, PacketEnvelope};

/// Address token meaning "the observed address of whoever sent this".
pub const SOURCE_ADDRESS: &str = "source";

/// Which lifecycle steps a configuration message asks for.
///
/// Applied with a fixed priority: `create` wins over `start`, which wins
/// over `connect`. A create that also sets `start`/`connect` performs
/// them as part of creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigActions {
    pub create: bool,
    pub start: bool,
    pub connect: bool,
}

impl ConfigActions {
    pub fn from_mode(mode: InitializationMode) -> Self {
        match mode {
            InitializationMode::Create => Self {
                create: true,
                start: false,
                connect: false,
            },
            InitializationMode::Start => Self {
                create: true,
                start: true,
                connect: false,
            },
            InitializationMode::Connect => Self {
                create: true,
                start: true,
                connect: true,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConfig {
    #[serde(rename = "nodeID")]
    pub node_id: NodeId,
}

/// Configuration for one world of the receiving node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMessage {
    #[serde(rename = "nodeID")]
    pub node_id: NodeId,
    pub actions: ConfigActions,
    pub world_name: String,
    pub world_type: WorldType,
    pub streaming_role: StreamingRole,
    pub server_addr: String,
    pub server_port: u16,
    pub signaling_addr: String,
    pub num_simulated_clients: u32,
    pub emulation_type: EmulationType,
}

/// Runtime mutation of one named world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldActionMessage {
    #[serde(rename = "nodeID")]
    pub node_id: NodeId,
    pub world_name: String,
    pub action: WorldAction,
    pub connection_addr: String,
    pub connection_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigErrorKind {
    #[serde(rename = "UnknownID")]
    UnknownId,
    #[serde(rename = "DuplicateID")]
    DuplicateId,
    UnknownWorld,
}

impl std::fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConfigErrorKind::UnknownId => "UnknownID",
            ConfigErrorKind::DuplicateId => "DuplicateID",
            ConfigErrorKind::UnknownWorld => "UnknownWorld",
        };
        f.write_str(name)
    }
}

/// Error reply sent to the peer. Never fatal on either side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigError {
    #[serde(rename = "nodeID")]
    pub node_id: NodeId,
    pub error_type: ConfigErrorKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProtocolMessage {
    RequestConfig(RequestConfig),
    Config(ConfigMessage),
    WorldAction(WorldActionMessage),
    ConfigError(ConfigError),
}

impl ProtocolMessage {
    /// Encodes the message into a transport envelope.
    pub fn encode(&self, timestamp_ms: u64) -> Result<PacketEnvelope, DeploymentError> {
        let payload = serde_json::to_vec(self).map_err(DeploymentError::codec)?;
        Ok(PacketEnvelope::new(payload, timestamp_ms))
    }

    pub fn decode(envelope: &PacketEnvelope) -> Result<Self, DeploymentError> {
        serde_json::from_slice(&envelope.payload).map_err(DeploymentError::codec)
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolMessage::RequestConfig(_) => "RequestConfig",
            ProtocolMessage::Config(_) => "ConfigMessage",
            ProtocolMessage::WorldAction(_) => "WorldActionMessage",
            ProtocolMessage::ConfigError(_) => "ConfigError",
        }
    }
}

/// Replaces a loopback address with `fallback`.
///
/// Used both for `"source"` tokens that resolve to loopback and for literal
/// `127.0.0.1` targets in world-action connects.
pub fn resolve_loopback(addr: &str, fallback: &str) -> String {
    if is_loopback_addr(addr) {
        fallback.to_string()
    } else {
        addr.to_string()
    }
}

/// True if `addr` is a literal loopback IP.
pub fn is_loopback_addr(addr: &str) -> bool {
    addr.parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

/// Resolves the `"source"` token against the sender's observed address.
///
/// The port is dropped. Loopback senders map to `fallback`. Anything that
/// is not the token passes through unchanged.
pub fn substitute_source(addr: &str, observed: SocketAddr, fallback: &str) -> String {
    if addr == SOURCE_ADDRESS {
        resolve_loopback(&observed.ip().to_string(), fallback)
    } else {
        addr.to_string()
    }
}
