//! Experiment Scheduler - fires the timed experiment actions.
//!
//! Level-triggered and one-shot: on every evaluation, each action whose
//! delay has passed and that is not yet done fires and is marked done.
//! The caller only evaluates once the experiment start has latched.

use crate::config::DEFAULT_SIGNALING_PORT;
use crate::graph::{DeploymentGraph, NodeAction, StreamingRole, WorldAction, WorldType};
use crate::protocol::WorldActionMessage;

use std::time::Duration;
use tracing::{info, warn};
use worldgraph_env::{ConnectionId, NodeId};

/// Where a fired world action has to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchTarget {
    /// This node; applied directly with loopback as the source
    Local,
    /// Sent over the node's recorded connection
    Remote(ConnectionId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledDispatch {
    pub target: DispatchTarget,
    pub message: WorldActionMessage,
}

pub struct ExperimentScheduler {
    local_id: NodeId,
    default_addr: String,
    default_port: u16,
}

impl ExperimentScheduler {
    pub fn new(local_id: NodeId, default_addr: impl Into<String>, default_port: u16) -> Self {
        Self {
            local_id,
            default_addr: default_addr.into(),
            default_port,
        }
    }

    /// Fires every due action in declaration order and marks it done.
    ///
    /// A node action for a node that has not connected is skipped with a
    /// warning; its batch is still marked done.
    pub fn evaluate(&self, graph: &mut DeploymentGraph, elapsed: Duration) -> Vec<ScheduledDispatch> {
        let elapsed_secs = elapsed.as_secs_f64();
        let mut dispatches = Vec::new();

        for index in 0..graph.experiment_actions().len() {
            let action = &graph.experiment_actions()[index];
            if action.done || elapsed_secs <= action.delay_secs {
                continue;
            }

            info!(
                "Experiment action {} fires at {:.2}s (delay {}s)",
                index, elapsed_secs, action.delay_secs
            );
            let node_actions = action.node_actions.clone();
            for node_action in &node_actions {
                self.dispatch_node_action(graph, node_action, &mut dispatches);
            }
            graph.experiment_actions_mut()[index].done = true;
        }

        dispatches
    }

    fn dispatch_node_action(
        &self,
        graph: &DeploymentGraph,
        node_action: &NodeAction,
        out: &mut Vec<ScheduledDispatch>,
    ) {
        let Some(node) = graph.get_node(node_action.node_id) else {
            warn!("NodeAction failed, node {} does not exist", node_action.node_id);
            return;
        };
        if !node.connected {
            warn!("NodeAction failed, node {} has not connected", node.id);
            return;
        }

        let target = if node.id == self.local_id {
            DispatchTarget::Local
        } else {
            match node.source {
                Some(conn) => DispatchTarget::Remote(conn),
                None => {
                    warn!("NodeAction failed, node {} has no recorded connection", node.id);
                    return;
                }
            }
        };

        for &(world_index, action) in &node_action.world_actions {
            let Some(world) = node.world_configs.get(world_index) else {
                warn!("Node {} has no world config {}", node.id, world_index);
                continue;
            };

            let mut connection_addr = self.default_addr.clone();
            let mut connection_port = self.default_port;

            if action == WorldAction::Connect && world.world_type == WorldType::Client {
                let peer = if world.streaming_role == StreamingRole::Guest {
                    connection_port = DEFAULT_SIGNALING_PORT;
                    world.streaming_node_id
                } else {
                    world.server_node_id
                };
                match graph.get_node(peer) {
                    None => warn!("Target node {} for world {} does not exist", peer, world.world_name),
                    Some(peer_node) => {
                        if let Some(endpoint) = peer_node.endpoint {
                            connection_addr = endpoint.ip().to_string();
                        }
                    }
                }
            }

            out.push(ScheduledDispatch {
                target,
                message: WorldActionMessage {
                    node_id: node.id,
                    world_name: world.world_name.clone(),
                    action,
                    connection_addr,
                    connection_port,
                },
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    const GRAPH: &str = r#"{
        "nodes": [
            { "nodeID": 0, "nodeIP": "10.0.0.1",
              "worldConfigs": [ { "worldName": "ServerWorld", "worldType": "Server" },
                                { "worldName": "HostWorld", "worldType": "Client",
                                  "streamingRole": "Host" } ] },
            { "nodeID": 1, "nodeIP": "10.0.0.2",
              "worldConfigs": [ { "worldName": "ClientWorld", "worldType": "Client", "serverNodeID": 2 },
                                { "worldName": "GuestWorld", "worldType": "Client",
                                  "streamingRole": "Guest", "streamingNodeID": 2 } ] },
            { "nodeID": 2, "nodeIP": "10.0.0.3",
              "worldConfigs": [ { "worldName": "ServerWorld", "worldType": "Server" } ] }
        ],
        "experimentActions": [
            { "delay": 0, "actions": [ { "nodeID": 0, "worldNames": ["HostWorld"], "actions": ["Start"] } ] },
            { "delay": 5, "actions": [
                { "nodeID": 1, "worldNames": ["ClientWorld", "GuestWorld"], "actions": ["Connect", "Connect"] } ] },
            { "delay": 10, "actions": [
                { "nodeID": 2, "worldNames": ["ServerWorld"], "actions": ["Stop"] },
                { "nodeID": 1, "worldNames": ["ClientWorld"], "actions": ["Stop"] } ] }
        ]
    }"#;

    fn connected_graph() -> DeploymentGraph {
        let mut graph = DeploymentGraph::from_json_str(GRAPH).unwrap();
        graph.set_connected(NodeId(0));
        for (id, endpoint) in [(1, "10.0.0.2:40001"), (2, "10.0.0.3:40002")] {
            graph.set_connected(NodeId(id));
            graph.set_endpoint(
                NodeId(id),
                endpoint.parse::<SocketAddr>().unwrap(),
                ConnectionId::from_seed(id as u64),
            );
        }
        graph
    }

    fn scheduler() -> ExperimentScheduler {
        ExperimentScheduler::new(NodeId(0), "127.0.0.1", 7979)
    }

    #[test]
    fn test_zero_delay_fires_on_first_evaluation() {
        let mut graph = connected_graph();
        let fired = scheduler().evaluate(&mut graph, Duration::from_millis(1));

        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].target, DispatchTarget::Local);
        assert_eq!(fired[0].message.world_name, "HostWorld");
        assert!(graph.experiment_actions()[0].done);
        assert!(!graph.experiment_actions()[1].done);
    }

    #[test]
    fn test_delay_is_strict() {
        let mut graph = connected_graph();
        let scheduler = scheduler();
        scheduler.evaluate(&mut graph, Duration::from_millis(1));
        assert!(scheduler.evaluate(&mut graph, Duration::from_secs(5)).is_empty());
        assert_eq!(scheduler.evaluate(&mut graph, Duration::from_millis(5001)).len(), 2);
    }

    #[test]
    fn test_connect_targets_use_observed_endpoints() {
        let mut graph = connected_graph();
        let fired = scheduler().evaluate(&mut graph, Duration::from_secs(6));
        let connects: Vec<_> = fired.iter().filter(|d| d.message.node_id == NodeId(1)).collect();

        assert_eq!(connects.len(), 2);
        assert_eq!(connects[0].target, DispatchTarget::Remote(ConnectionId::from_seed(1)));
        assert_eq!(connects[0].message.connection_addr, "10.0.0.3");
        assert_eq!(connects[0].message.connection_port, 7979);
        assert_eq!(connects[1].message.connection_addr, "10.0.0.3");
        assert_eq!(connects[1].message.connection_port, 7981);
    }

    #[test]
    fn test_refire_never_happens() {
        let mut graph = connected_graph();
        let scheduler = scheduler();
        let first = scheduler.evaluate(&mut graph, Duration::from_secs(11));
        assert_eq!(first.len(), 5);
        assert!(graph.experiment_actions().iter().all(|a| a.done));

        for secs in 12..20 {
            assert!(scheduler.evaluate(&mut graph, Duration::from_secs(secs)).is_empty());
        }
    }

    #[test]
    fn test_disconnected_node_skipped_but_batch_done() {
        let mut graph = DeploymentGraph::from_json_str(GRAPH).unwrap();
        graph.set_connected(NodeId(0));
        graph.set_connected(NodeId(1));
        graph.set_endpoint(
            NodeId(1),
            "10.0.0.2:40001".parse().unwrap(),
            ConnectionId::from_seed(1),
        );

        let fired = scheduler().evaluate(&mut graph, Duration::from_secs(11));
        // Node 2 never connected: its Stop is skipped, node 1's still fires
        assert!(fired.iter().all(|d| d.message.node_id != NodeId(2)));
        assert!(fired
            .iter()
            .any(|d| d.message.node_id == NodeId(1) && d.message.action == WorldAction::Stop));
        assert!(graph.experiment_actions()[2].done);

        // Peer without endpoint keeps the default address
        let connect = fired
            .iter()
            .find(|d| d.message.world_name == "ClientWorld" && d.message.action == WorldAction::Connect)
            .unwrap();
        assert_eq!(connect.message.connection_addr, "127.0.0.1");
    }
}
