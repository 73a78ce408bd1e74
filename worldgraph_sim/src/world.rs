//! SimWorld - The simulation harness container.
//!
//! Holds every simulated node, the shared virtual clock and the central
//! router. One [`SimWorld::tick`] advances the clock, delivers packets
//! whose latency has elapsed, ticks every node's runtime in id order, and
//! collects what they sent.

use crate::context::SimContext;
use crate::network::{RoutedPacket, SimNetwork, SimNetworkController};
use crate::substrate::{SimSubstrate, TimedEvent};

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use worldgraph_core::{DeploymentGraph, DeploymentRuntime, OrchestratorConfig, ProtocolMessage, TickStatus};
use worldgraph_env::{ConnectionId, NodeId, PacketEnvelope};

pub type SimRuntime = DeploymentRuntime<SimContext, SimNetwork, SimSubstrate>;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Tick rate in Hz
    pub tick_rate_hz: u32,

    /// Maximum simulation duration in seconds
    pub max_duration_secs: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            tick_rate_hz: 30,
            max_duration_secs: 60.0,
        }
    }
}

/// Traffic counters kept by the router.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkMetrics {
    pub packets_sent: u64,
    pub packets_delivered: u64,

    /// Dropped by partition, loss, or a closed connection
    pub packets_dropped: u64,

    /// Routed messages per protocol message kind
    pub messages_by_kind: BTreeMap<String, u64>,
}

/// Handle to a simulated node.
pub struct SimNode {
    pub id: NodeId,
    pub ip: IpAddr,
    pub network: Arc<SimNetwork>,
    pub runtime: SimRuntime,

    /// Sender to deliver packets to this node
    inbox_tx: mpsc::UnboundedSender<(ConnectionId, PacketEnvelope)>,
}

impl SimNode {
    pub fn substrate(&self) -> &SimSubstrate {
        self.runtime.driver().substrate()
    }
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// Network controller for fault injection
    pub network_controller: SimNetworkController,

    pub metrics: NetworkMetrics,

    nodes: BTreeMap<NodeId, SimNode>,

    router_tx: mpsc::UnboundedSender<RoutedPacket>,
    router_rx: mpsc::UnboundedReceiver<RoutedPacket>,

    /// Packets waiting out their link latency, with delivery time in ms
    in_flight: Vec<(u64, RoutedPacket)>,

    /// Open connections per node pair, both directions
    links: HashMap<(NodeId, NodeId), ConnectionId>,

    next_conn_seed: u64,
    next_port: u16,
    tick_count: u64,
}

impl SimWorld {
    pub fn new(config: SimConfig) -> Self {
        // Derive separate seeds for different subsystems
        let context = SimContext::shared(config.seed);
        let network_controller = SimNetworkController::new(config.seed.wrapping_mul(0x9e3779b97f4a7c15));
        let (router_tx, router_rx) = mpsc::unbounded_channel();

        Self {
            config,
            context,
            network_controller,
            metrics: NetworkMetrics::default(),
            nodes: BTreeMap::new(),
            router_tx,
            router_rx,
            in_flight: Vec::new(),
            links: HashMap::new(),
            next_conn_seed: 1,
            next_port: 40000,
            tick_count: 0,
        }
    }

    fn node_parts(
        &self,
        id: NodeId,
    ) -> (
        Arc<SimNetwork>,
        mpsc::UnboundedSender<(ConnectionId, PacketEnvelope)>,
        SimSubstrate,
    ) {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let network = Arc::new(SimNetwork::new(id, self.router_tx.clone(), inbox_rx));
        let substrate = SimSubstrate::new(id, self.context.clone());
        (network, inbox_tx, substrate)
    }

    /// The sim id doubles as the deployment id unless the config names one.
    fn node_config(&self, id: NodeId, mut config: OrchestratorConfig) -> OrchestratorConfig {
        config.deployment_id.get_or_insert(id);
        config.tick_rate_hz = self.config.tick_rate_hz;
        config.sanitize()
    }

    /// Spawns the node that serves `graph`.
    pub fn spawn_authority(&mut self, id: NodeId, ip: IpAddr, graph: DeploymentGraph, config: OrchestratorConfig) {
        let config = self.node_config(id, config);
        let (network, inbox_tx, substrate) = self.node_parts(id);
        let runtime = DeploymentRuntime::authority(self.context.clone(), network.clone(), substrate, graph, config);
        info!("Spawned authority node {} at {}", id, ip);
        self.nodes.insert(
            id,
            SimNode {
                id,
                ip,
                network,
                runtime,
                inbox_tx,
            },
        );
    }

    /// Spawns a node that fetches its configuration remotely.
    pub fn spawn_member(&mut self, id: NodeId, ip: IpAddr, config: OrchestratorConfig) {
        let config = self.node_config(
            id,
            OrchestratorConfig {
                remote_config: true,
                ..config
            },
        );
        let (network, inbox_tx, substrate) = self.node_parts(id);
        let runtime = DeploymentRuntime::member(self.context.clone(), network.clone(), substrate, config);
        info!("Spawned member node {} at {}", id, ip);
        self.nodes.insert(
            id,
            SimNode {
                id,
                ip,
                network,
                runtime,
                inbox_tx,
            },
        );
    }

    /// Opens a connection from `member` to the authority's deployment port.
    ///
    /// The member sees the authority at its IP and the member's configured
    /// deployment port (7980 by default); the authority sees the
    /// member at its IP with a fresh ephemeral port. Returns false if either
    /// node is unknown.
    pub fn connect(&mut self, member: NodeId, authority: NodeId) -> bool {
        let (Some(m), Some(a)) = (self.nodes.get(&member), self.nodes.get(&authority)) else {
            warn!("Cannot connect unknown nodes {} -> {}", member, authority);
            return false;
        };

        let member_conn = ConnectionId::from_seed(self.next_conn_seed);
        let authority_conn = ConnectionId::from_seed(self.next_conn_seed + 1);
        self.next_conn_seed += 2;
        let port = self.next_port;
        self.next_port = self.next_port.wrapping_add(1).max(40000);

        m.network.open_link(
            member_conn,
            authority,
            authority_conn,
            SocketAddr::new(a.ip, m.runtime.config().deployment_port),
        );
        a.network
            .open_link(authority_conn, member, member_conn, SocketAddr::new(m.ip, port));
        self.links.insert((member, authority), member_conn);
        self.links.insert((authority, member), authority_conn);

        debug!("Connected node {} to {} ({} / {})", member, authority, member_conn, authority_conn);
        true
    }

    /// Closes every connection between two nodes, both directions.
    pub fn disconnect(&mut self, a: NodeId, b: NodeId) {
        for (from, to) in [(a, b), (b, a)] {
            if let Some(node) = self.nodes.get(&from) {
                node.network.close_links_to(to);
            }
            self.links.remove(&(from, to));
        }
        debug!("Disconnected nodes {} and {}", a, b);
    }

    /// Advances simulation by one tick. Returns the nodes that requested
    /// shutdown on this tick.
    pub fn tick(&mut self) -> Vec<NodeId> {
        let dt = Duration::from_secs_f64(1.0 / self.config.tick_rate_hz.max(1) as f64);
        self.context.advance_time(dt);
        self.tick_count += 1;

        self.deliver_due();

        let mut stopped = Vec::new();
        for (id, node) in self.nodes.iter_mut() {
            if node.runtime.is_shutdown() {
                continue;
            }
            if node.runtime.tick() == TickStatus::ShutdownRequested {
                stopped.push(*id);
            }
        }

        self.collect_outgoing();
        stopped
    }

    /// Ticks until `secs` of virtual time have passed.
    pub fn run_for(&mut self, secs: f64) {
        let ticks = (secs * self.config.tick_rate_hz as f64).round() as u64;
        for _ in 0..ticks {
            self.tick();
        }
    }

    fn collect_outgoing(&mut self) {
        let now_ms = self.context.time_ms();
        while let Ok(msg) = self.router_rx.try_recv() {
            self.metrics.packets_sent += 1;
            if let Ok(decoded) = ProtocolMessage::decode(&msg.packet) {
                *self
                    .metrics
                    .messages_by_kind
                    .entry(decoded.kind().to_string())
                    .or_default() += 1;
            }

            if !self.network_controller.can_communicate(msg.from, msg.to) {
                debug!("Packet {} -> {} dropped by partition", msg.from, msg.to);
                self.metrics.packets_dropped += 1;
                continue;
            }
            if self.network_controller.should_drop(msg.from, msg.to) {
                debug!("Packet {} -> {} lost", msg.from, msg.to);
                self.metrics.packets_dropped += 1;
                continue;
            }

            let latency = self.network_controller.get_latency(msg.from, msg.to);
            self.in_flight.push((now_ms + latency, msg));
        }
    }

    fn deliver_due(&mut self) {
        let now_ms = self.context.time_ms();
        let (due, waiting): (Vec<_>, Vec<_>) = self
            .in_flight
            .drain(..)
            .partition(|(deliver_at, _)| *deliver_at <= now_ms);
        self.in_flight = waiting;

        for (_, msg) in due {
            let open = self.links.get(&(msg.to, msg.from)) == Some(&msg.to_conn);
            match self.nodes.get(&msg.to) {
                Some(node) if open => {
                    if node.inbox_tx.send((msg.to_conn, msg.packet)).is_ok() {
                        self.metrics.packets_delivered += 1;
                    } else {
                        self.metrics.packets_dropped += 1;
                    }
                }
                _ => {
                    debug!("Packet {} -> {} arrived on a closed connection", msg.from, msg.to);
                    self.metrics.packets_dropped += 1;
                }
            }
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&SimNode> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SimNode> {
        self.nodes.values()
    }

    /// Every node's substrate events, merged in time order.
    pub fn timeline(&self) -> Vec<TimedEvent> {
        let mut events: Vec<TimedEvent> = self
            .nodes
            .values()
            .flat_map(|n| n.substrate().events().iter().cloned())
            .collect();
        // Stable sort keeps per-node order for equal timestamps
        events.sort_by_key(|e| e.time_ms);
        events
    }

    /// Returns the current simulation time in seconds.
    pub fn time(&self) -> f64 {
        self.context.time_ns() as f64 / 1e9
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
