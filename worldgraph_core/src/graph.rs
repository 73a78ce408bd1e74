//! Deployment Graph - the declarative description of a whole deployment.
//!
//! The authority loads one of these at start-up. It lists every node, the
//! worlds each node hosts, and a timeline of experiment actions to apply
//! once everybody has joined.
//!
//! # Document format
//!
//! ```json
//! {
//!   "nodes": [
//!     { "nodeID": 0, "nodeIP": "10.0.0.1",
//!       "worldConfigs": [ { "worldName": "ServerWorld", "worldType": "Server",
//!                           "initializationMode": "Connect" } ] },
//!     { "nodeID": 1, "nodeIP": "10.0.0.2",
//!       "worldConfigs": [ { "worldName": "ClientWorld", "worldType": "Client",
//!                           "initializationMode": "Connect", "serverNodeID": 0 } ] }
//!   ],
//!   "experimentActions": [
//!     { "delay": 5, "actions": [ { "nodeID": 1, "worldNames": ["ClientWorld"],
//!                                  "actions": ["Stop"] } ] }
//!   ]
//! }
//! ```
//!
//! World names in experiment actions are resolved to indices at load time;
//! `worldConfigIndices` may be given instead.

use crate::config::DEFAULT_SERVER_PORT;
use crate::error::DeploymentError;
use crate::protocol::{ConfigActions, ConfigMessage, SOURCE_ADDRESS};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use tracing::{debug, warn};
use worldgraph_env::{ConnectionId, EmulationType, NodeId};

/// Kind of world. Exclusive per world config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorldType {
    /// No world type; messages carrying it are ignored.
    #[default]
    #[serde(rename = "None")]
    Unspecified,
    Client,
    SimulatedClient,
    Server,
}

/// How far a world is brought up when its configuration is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InitializationMode {
    #[default]
    Create,
    Start,
    Connect,
}

/// Role of a client world in render streaming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamingRole {
    #[default]
    Disabled,
    Host,
    CloudHost,
    Guest,
}

/// Runtime mutation applied to one world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorldAction {
    Stop,
    Start,
    Connect,
}

/// One world hosted by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldConfig {
    /// Unique within its node
    pub world_name: String,

    #[serde(default)]
    pub world_type: WorldType,

    #[serde(default)]
    pub initialization_mode: InitializationMode,

    #[serde(default, alias = "multiplayStreamingRoles")]
    pub streaming_role: StreamingRole,

    /// Node whose server this (non-streamed) client joins
    #[serde(default, rename = "serverNodeID")]
    pub server_node_id: NodeId,

    /// Node whose stream this guest client joins
    #[serde(default, rename = "streamingNodeID")]
    pub streaming_node_id: NodeId,

    /// Only meaningful for `SimulatedClient` worlds
    #[serde(default, alias = "numSimulatedClient")]
    pub num_simulated_clients: u32,

    #[serde(default)]
    pub emulation_type: EmulationType,
}

/// A machine taking part in the deployment.
#[derive(Debug, Clone)]
pub struct DeploymentNode {
    pub id: NodeId,

    /// Declared address from the document, if any
    pub ip_address: Option<String>,

    /// Observed address of the first successful request
    pub endpoint: Option<SocketAddr>,

    pub connected: bool,

    /// Connection the node's request arrived on; valid while connected
    pub source: Option<ConnectionId>,

    pub world_configs: Vec<WorldConfig>,
}

/// Actions applied to one node when an experiment action fires.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeAction {
    pub node_id: NodeId,

    /// `(worldConfigIndex, action)` pairs, applied in order
    pub world_actions: Vec<(usize, WorldAction)>,
}

/// A batch of node actions fired once at `delay_secs` after all nodes joined.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentAction {
    pub delay_secs: f64,
    pub node_actions: Vec<NodeAction>,

    /// Flips to true exactly once and never reverts.
    pub done: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentDocument {
    #[serde(default)]
    nodes: Vec<DocumentNode>,
    #[serde(default)]
    experiment_actions: Vec<DocumentExperimentAction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentNode {
    #[serde(rename = "nodeID")]
    node_id: NodeId,
    #[serde(default, rename = "nodeIP")]
    node_ip: Option<String>,
    #[serde(default)]
    world_configs: Vec<WorldConfig>,
}

#[derive(Debug, Deserialize)]
struct DocumentExperimentAction {
    #[serde(default)]
    delay: f64,
    #[serde(default)]
    actions: Vec<DocumentNodeAction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentNodeAction {
    #[serde(rename = "nodeID")]
    node_id: NodeId,
    #[serde(default)]
    world_names: Vec<String>,
    #[serde(default)]
    world_config_indices: Vec<usize>,
    #[serde(default)]
    actions: Vec<WorldAction>,
}

/// Nodes, their worlds, and the experiment timeline.
///
/// Pure data plus lookup and mutation. The only mutations after load are
/// the per-node connection bookkeeping and the `done` flags.
#[derive(Debug, Clone, Default)]
pub struct DeploymentGraph {
    nodes: Vec<DeploymentNode>,
    experiment_actions: Vec<ExperimentAction>,
}

impl DeploymentGraph {
    /// Creates a graph with no nodes and no experiment actions.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reads and parses a deployment document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DeploymentError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| DeploymentError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Parses a deployment document.
    ///
    /// World names in experiment actions that do not exist on their node,
    /// and actions that target undeclared nodes, are dropped with a warning.
    pub fn from_json_str(text: &str) -> Result<Self, DeploymentError> {
        let document: DeploymentDocument = serde_json::from_str(text)?;

        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(document.nodes.len());
        for node in document.nodes {
            if !seen.insert(node.node_id) {
                return Err(DeploymentError::DuplicateNode(node.node_id));
            }
            check_world_configs(node.node_id, &node.world_configs);
            nodes.push(DeploymentNode {
                id: node.node_id,
                ip_address: node.node_ip.filter(|ip| !ip.is_empty()),
                endpoint: None,
                connected: false,
                source: None,
                world_configs: node.world_configs,
            });
        }

        let mut graph = Self {
            nodes,
            experiment_actions: Vec::new(),
        };

        for action in document.experiment_actions {
            let node_actions = action
                .actions
                .into_iter()
                .filter_map(|na| graph.resolve_node_action(na))
                .collect();
            graph.experiment_actions.push(ExperimentAction {
                delay_secs: action.delay,
                node_actions,
                done: false,
            });
        }

        debug!(
            nodes = graph.nodes.len(),
            experiment_actions = graph.experiment_actions.len(),
            "Loaded deployment graph"
        );
        Ok(graph)
    }

    /// Builds a graph directly from nodes and actions.
    pub fn from_parts(nodes: Vec<DeploymentNode>, experiment_actions: Vec<ExperimentAction>) -> Self {
        Self {
            nodes,
            experiment_actions,
        }
    }

    fn resolve_node_action(&self, action: DocumentNodeAction) -> Option<NodeAction> {
        let Some(node) = self.get_node(action.node_id) else {
            warn!("Experiment action targets undeclared node {}", action.node_id);
            return None;
        };

        let indices: Vec<Option<usize>> = if action.world_names.is_empty() {
            action
                .world_config_indices
                .iter()
                .map(|&i| (i < node.world_configs.len()).then_some(i))
                .collect()
        } else {
            action
                .world_names
                .iter()
                .map(|name| node.world_configs.iter().position(|wc| &wc.world_name == name))
                .collect()
        };

        if indices.len() != action.actions.len() {
            warn!(
                "Node {} experiment action lists {} worlds but {} actions",
                node.id,
                indices.len(),
                action.actions.len()
            );
        }

        let mut world_actions = Vec::new();
        for (position, (index, world_action)) in indices.into_iter().zip(action.actions).enumerate() {
            match index {
                Some(index) => world_actions.push((index, world_action)),
                None => warn!(
                    "Node {} has no world config for experiment action entry {}",
                    node.id, position
                ),
            }
        }

        Some(NodeAction {
            node_id: action.node_id,
            world_actions,
        })
    }

    pub fn nodes(&self) -> &[DeploymentNode] {
        &self.nodes
    }

    pub fn get_node(&self, id: NodeId) -> Option<&DeploymentNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn get_node_mut(&mut self, id: NodeId) -> Option<&mut DeploymentNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Marks a node as connected. Idempotent; unknown ids are ignored.
    pub fn set_connected(&mut self, id: NodeId) {
        if let Some(node) = self.get_node_mut(id) {
            node.connected = true;
        }
    }

    /// Records where a node's request came from. Idempotent.
    pub fn set_endpoint(&mut self, id: NodeId, endpoint: SocketAddr, source: ConnectionId) {
        if let Some(node) = self.get_node_mut(id) {
            node.endpoint = Some(endpoint);
            node.source = Some(source);
        }
    }

    /// True if the node declared no address, or declared exactly the observed IP.
    pub fn compare_endpoint(&self, id: NodeId, observed: &SocketAddr) -> bool {
        match self.get_node(id).and_then(|n| n.ip_address.as_deref()) {
            None => true,
            Some(declared) => declared
                .parse::<std::net::IpAddr>()
                .map(|ip| ip == observed.ip())
                .unwrap_or(false),
        }
    }

    pub fn check_all_nodes_connected(&self) -> bool {
        self.nodes.iter().all(|n| n.connected)
    }

    /// One configuration message per world of node `id`, in declaration order.
    ///
    /// Pure: the result depends only on the loaded document.
    pub fn node_to_config_messages(&self, id: NodeId) -> Vec<ConfigMessage> {
        let Some(node) = self.get_node(id) else {
            return Vec::new();
        };

        node.world_configs
            .iter()
            .map(|wc| ConfigMessage {
                node_id: id,
                actions: ConfigActions::from_mode(wc.initialization_mode),
                world_name: wc.world_name.clone(),
                world_type: wc.world_type,
                streaming_role: wc.streaming_role,
                server_addr: self.declared_address(wc.server_node_id),
                server_port: DEFAULT_SERVER_PORT,
                signaling_addr: self.declared_address(wc.streaming_node_id),
                num_simulated_clients: wc.num_simulated_clients,
                emulation_type: wc.emulation_type,
            })
            .collect()
    }

    /// Declared IP of `id`, or the `"source"` token when it declares none.
    fn declared_address(&self, id: NodeId) -> String {
        self.get_node(id)
            .and_then(|n| n.ip_address.clone())
            .unwrap_or_else(|| SOURCE_ADDRESS.to_string())
    }

    pub fn experiment_actions(&self) -> &[ExperimentAction] {
        &self.experiment_actions
    }

    /// Mutable access for the scheduler, which only flips `done`.
    pub fn experiment_actions_mut(&mut self) -> &mut [ExperimentAction] {
        &mut self.experiment_actions
    }
}

fn check_world_configs(node: NodeId, configs: &[WorldConfig]) {
    let mut names = HashSet::new();
    for wc in configs {
        if !names.insert(wc.world_name.as_str()) {
            warn!("Node {} declares world {} more than once", node, wc.world_name);
        }
        if wc.num_simulated_clients > 0 && wc.world_type != WorldType::SimulatedClient {
            warn!(
                "World {} on node {} sets numSimulatedClients but is not a SimulatedClient world",
                wc.world_name, node
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_NODES: &str = r#"{
        "nodes": [
            { "nodeID": 0, "nodeIP": "10.0.0.1",
              "worldConfigs": [ { "worldName": "ServerWorld", "worldType": "Server",
                                  "initializationMode": "Connect" } ] },
            { "nodeID": 1, "nodeIP": "10.0.0.2",
              "worldConfigs": [ { "worldName": "ClientWorld", "worldType": "Client",
                                  "initializationMode": "Connect", "serverNodeID": 0 } ] }
        ],
        "experimentActions": [
            { "delay": 5, "actions": [ { "nodeID": 1, "worldNames": ["ClientWorld"],
                                         "actions": ["Stop"] } ] }
        ]
    }"#;

    #[test]
    fn test_load_two_node_document() {
        let graph = DeploymentGraph::from_json_str(TWO_NODES).unwrap();
        assert_eq!(graph.nodes().len(), 2);
        assert_eq!(graph.experiment_actions().len(), 1);

        let action = &graph.experiment_actions()[0];
        assert_eq!(action.delay_secs, 5.0);
        assert_eq!(
            action.node_actions,
            vec![NodeAction {
                node_id: NodeId(1),
                world_actions: vec![(0, WorldAction::Stop)],
            }]
        );
        assert!(!action.done);
    }

    #[test]
    fn test_service_lists_are_ignored() {
        let with_services = TWO_NODES.replace(
            r#""serverNodeID": 0 }"#,
            r#""serverNodeID": 0, "services": ["Physics"], "serviceFilterType": "Excludes" }"#,
        );
        let plain = DeploymentGraph::from_json_str(TWO_NODES).unwrap();
        let graph = DeploymentGraph::from_json_str(&with_services).unwrap();
        assert_eq!(
            graph.node_to_config_messages(NodeId(1)),
            plain.node_to_config_messages(NodeId(1))
        );
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let doc = r#"{ "nodes": [ { "nodeID": 3 }, { "nodeID": 3 } ] }"#;
        assert!(matches!(
            DeploymentGraph::from_json_str(doc),
            Err(DeploymentError::DuplicateNode(NodeId(3)))
        ));
    }

    #[test]
    fn test_unknown_world_name_is_dropped() {
        let doc = r#"{
            "nodes": [ { "nodeID": 0, "worldConfigs": [ { "worldName": "A", "worldType": "Client" } ] } ],
            "experimentActions": [ { "delay": 1, "actions": [
                { "nodeID": 0, "worldNames": ["A", "Missing"], "actions": ["Start", "Stop"] },
                { "nodeID": 9, "worldNames": ["A"], "actions": ["Stop"] }
            ] } ]
        }"#;
        let graph = DeploymentGraph::from_json_str(doc).unwrap();
        let node_actions = &graph.experiment_actions()[0].node_actions;
        assert_eq!(node_actions.len(), 1);
        assert_eq!(node_actions[0].world_actions, vec![(0, WorldAction::Start)]);
    }

    #[test]
    fn test_world_config_indices_accepted() {
        let doc = r#"{
            "nodes": [ { "nodeID": 0, "worldConfigs": [
                { "worldName": "A", "worldType": "Client" },
                { "worldName": "B", "worldType": "Server" } ] } ],
            "experimentActions": [ { "delay": 0, "actions": [
                { "nodeID": 0, "worldConfigIndices": [1, 7], "actions": ["Connect", "Stop"] } ] } ]
        }"#;
        let graph = DeploymentGraph::from_json_str(doc).unwrap();
        assert_eq!(
            graph.experiment_actions()[0].node_actions[0].world_actions,
            vec![(1, WorldAction::Connect)]
        );
    }

    #[test]
    fn test_connected_bookkeeping() {
        let mut graph = DeploymentGraph::from_json_str(TWO_NODES).unwrap();
        assert!(!graph.check_all_nodes_connected());

        graph.set_connected(NodeId(0));
        assert!(!graph.check_all_nodes_connected());

        let conn = ConnectionId::from_seed(1);
        let observed: SocketAddr = "10.0.0.2:41000".parse().unwrap();
        graph.set_connected(NodeId(1));
        graph.set_endpoint(NodeId(1), observed, conn);
        graph.set_connected(NodeId(1));

        assert!(graph.check_all_nodes_connected());
        let node = graph.get_node(NodeId(1)).unwrap();
        assert_eq!(node.endpoint, Some(observed));
        assert_eq!(node.source, Some(conn));
    }

    #[test]
    fn test_compare_endpoint() {
        let graph = DeploymentGraph::from_json_str(
            r#"{ "nodes": [ { "nodeID": 0, "nodeIP": "10.0.0.1" }, { "nodeID": 1 } ] }"#,
        )
        .unwrap();
        let same: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        let other: SocketAddr = "10.0.0.9:5000".parse().unwrap();

        assert!(graph.compare_endpoint(NodeId(0), &same));
        assert!(!graph.compare_endpoint(NodeId(0), &other));
        // Nothing declared
        assert!(graph.compare_endpoint(NodeId(1), &other));
    }

    #[test]
    fn test_config_messages_for_client_node() {
        let graph = DeploymentGraph::from_json_str(TWO_NODES).unwrap();
        let messages = graph.node_to_config_messages(NodeId(1));
        assert_eq!(messages.len(), 1);

        let msg = &messages[0];
        assert_eq!(msg.node_id, NodeId(1));
        assert_eq!(msg.world_name, "ClientWorld");
        assert_eq!(msg.world_type, WorldType::Client);
        assert_eq!(msg.server_addr, "10.0.0.1");
        assert_eq!(msg.server_port, DEFAULT_SERVER_PORT);
        assert!(msg.actions.create && msg.actions.start && msg.actions.connect);
    }

    #[test]
    fn test_undeclared_server_address_uses_source_token() {
        let doc = r#"{ "nodes": [
            { "nodeID": 0, "worldConfigs": [ { "worldName": "ServerWorld", "worldType": "Server" } ] },
            { "nodeID": 1, "worldConfigs": [ { "worldName": "C", "worldType": "Client",
                                               "initializationMode": "Start", "serverNodeID": 0 } ] }
        ] }"#;
        let graph = DeploymentGraph::from_json_str(doc).unwrap();
        let msg = &graph.node_to_config_messages(NodeId(1))[0];
        assert_eq!(msg.server_addr, SOURCE_ADDRESS);
        assert_eq!(msg.signaling_addr, SOURCE_ADDRESS);
        assert!(msg.actions.create && msg.actions.start && !msg.actions.connect);
    }

    #[test]
    fn test_config_messages_are_pure() {
        let mut graph = DeploymentGraph::from_json_str(TWO_NODES).unwrap();
        let before = graph.node_to_config_messages(NodeId(1));
        graph.set_connected(NodeId(1));
        assert_eq!(graph.node_to_config_messages(NodeId(1)), before);
        assert_eq!(graph.node_to_config_messages(NodeId(1)), before);
        assert!(graph.node_to_config_messages(NodeId(42)).is_empty());
    }
}
