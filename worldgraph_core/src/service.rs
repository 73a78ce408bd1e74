//! Configuration Service - the authority's side of the protocol.
//!
//! Owns the deployment graph. Answers `RequestConfig` messages, tracks
//! which nodes have joined, and latches the experiment start the first
//! tick every node is connected.
//!
//! ```text
//! RequestConfig{id} on conn
//!        │
//!        ├── id not in graph ──────────► ConfigError{UnknownID}
//!        ├── id already connected ─────► ConfigError{DuplicateID}
//!        └── otherwise: connect, record endpoint + conn,
//!                       warn on address mismatch ──► ConfigMessage × worlds
//! ```

use crate::config::OrchestratorConfig;
use crate::driver::WorldLifecycleDriver;
use crate::graph::DeploymentGraph;
use crate::protocol::{ConfigError, ConfigErrorKind, ProtocolMessage, RequestConfig};

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::{error, info, warn};
use worldgraph_env::{ConnectionId, NodeId, WorldSubstrate};

/// Loopback address used as the observed source of the authority's own config.
pub(crate) fn loopback_source() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
}

pub struct ConfigService {
    local_id: NodeId,
    graph: DeploymentGraph,
    activated: bool,
    all_connected: bool,

    /// Experiment start; set once, never cleared
    started_at: Option<Duration>,
}

impl ConfigService {
    pub fn new(local_id: NodeId, graph: DeploymentGraph) -> Self {
        Self {
            local_id,
            graph,
            activated: false,
            all_connected: false,
            started_at: None,
        }
    }

    pub fn graph(&self) -> &DeploymentGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut DeploymentGraph {
        &mut self.graph
    }

    /// First-activation bootstrap. Subsequent calls do nothing.
    ///
    /// If this node is in the graph it marks itself connected and applies
    /// its own configuration with loopback as the observed source.
    /// Otherwise the worlds come from the local flags.
    pub fn activate<S: WorldSubstrate>(
        &mut self,
        driver: &mut WorldLifecycleDriver<S>,
        config: &OrchestratorConfig,
    ) {
        if self.activated {
            return;
        }
        self.activated = true;

        if self.graph.get_node(self.local_id).is_some() {
            info!("Overriding local config from deployment graph for node {}", self.local_id);
            self.graph.set_connected(self.local_id);
            for msg in self.graph.node_to_config_messages(self.local_id) {
                match driver.apply_config_message(&msg, loopback_source()) {
                    Ok(created) => {
                        if let Some(e) = &created.connect_error {
                            error!("Failed to connect local worlds for {}: {}", msg.world_name, e);
                        }
                        driver.request_content_load(&created.handles);
                    }
                    Err(e) => error!("Failed to apply local config for {}: {}", msg.world_name, e),
                }
            }
        } else {
            info!("Node {} not in deployment graph, using local configuration", self.local_id);
            match driver.setup_worlds_from_local_config(config) {
                Ok(created) => {
                    if let Some(e) = &created.connect_error {
                        error!("Failed to connect local worlds: {}", e);
                    }
                    driver.request_content_load(&created.handles);
                }
                Err(e) => error!("Failed to set up local worlds: {}", e),
            }
        }
    }

    /// Handles one configuration request and returns the replies for `conn`.
    pub fn handle_request(
        &mut self,
        conn: ConnectionId,
        request: &RequestConfig,
        observed: SocketAddr,
    ) -> Vec<ProtocolMessage> {
        let node_id = request.node_id;
        info!("Got configuration request for node {} from {}", node_id, observed);

        let error_type = match self.graph.get_node(node_id) {
            None => Some(ConfigErrorKind::UnknownId),
            Some(node) if node.connected => Some(ConfigErrorKind::DuplicateId),
            Some(_) => None,
        };
        if let Some(error_type) = error_type {
            info!("Rejecting configuration request from node {}: {}", node_id, error_type);
            return vec![ProtocolMessage::ConfigError(ConfigError { node_id, error_type })];
        }

        self.graph.set_connected(node_id);
        if !self.graph.compare_endpoint(node_id, &observed) {
            warn!(
                "Received config request for node {} from {}, even though it is configured at {}",
                node_id,
                observed,
                self.graph
                    .get_node(node_id)
                    .and_then(|n| n.ip_address.as_deref())
                    .unwrap_or("?")
            );
        }
        self.graph.set_endpoint(node_id, observed, conn);

        self.graph
            .node_to_config_messages(node_id)
            .into_iter()
            .map(ProtocolMessage::Config)
            .collect()
    }

    /// Recomputes connectivity and latches the start time on the first
    /// all-connected tick. Returns whether every node is connected.
    pub fn refresh(&mut self, now: Duration) -> bool {
        self.all_connected = self.graph.check_all_nodes_connected();
        if self.all_connected && self.started_at.is_none() {
            info!("All deployment nodes connected, experiment starts");
            self.started_at = Some(now);
        }
        self.all_connected
    }

    pub fn all_connected(&self) -> bool {
        self.all_connected
    }

    pub fn started_at(&self) -> Option<Duration> {
        self.started_at
    }

    /// Time since the experiment started, once it has.
    pub fn elapsed(&self, now: Duration) -> Option<Duration> {
        self.started_at.map(|start| now.saturating_sub(start))
    }
}
