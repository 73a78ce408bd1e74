//! Simulated network transport with fault injection.
//!
//! Every node gets a [`SimNetwork`]. Sends go to the world's central
//! router as [`RoutedPacket`]s; the world applies partitions, loss and
//! latency, then pushes survivors into the receiver's inbox.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use worldgraph_env::{ConnectionId, EnvError, NetworkController, NetworkTransport, NodeId, PacketEnvelope};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A packet on its way through the router.
#[derive(Debug, Clone)]
pub struct RoutedPacket {
    pub from: NodeId,
    pub to: NodeId,

    /// Connection id on the receiving side
    pub to_conn: ConnectionId,

    pub packet: PacketEnvelope,
}

/// One end of an open connection.
#[derive(Debug, Clone, Copy)]
struct Link {
    peer: NodeId,
    peer_conn: ConnectionId,
    remote_addr: SocketAddr,
}

/// Simulated network interface for one node.
pub struct SimNetwork {
    local_id: NodeId,

    /// Sender to central router
    tx: mpsc::UnboundedSender<RoutedPacket>,

    inbox: Mutex<mpsc::UnboundedReceiver<(ConnectionId, PacketEnvelope)>>,

    /// Ordered so connection iteration is deterministic
    links: Mutex<BTreeMap<ConnectionId, Link>>,
}

impl SimNetwork {
    pub fn new(
        local_id: NodeId,
        tx: mpsc::UnboundedSender<RoutedPacket>,
        inbox: mpsc::UnboundedReceiver<(ConnectionId, PacketEnvelope)>,
    ) -> Self {
        Self {
            local_id,
            tx,
            inbox: Mutex::new(inbox),
            links: Mutex::new(BTreeMap::new()),
        }
    }

    /// Creates a stub network for testing (sends go nowhere).
    pub fn new_stub(local_id: NodeId) -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        let (_, rx) = mpsc::unbounded_channel();
        Self::new(local_id, tx, rx)
    }

    /// Registers an open connection to `peer`, seen from this node as `remote_addr`.
    pub fn open_link(&self, conn: ConnectionId, peer: NodeId, peer_conn: ConnectionId, remote_addr: SocketAddr) {
        lock(&self.links).insert(
            conn,
            Link {
                peer,
                peer_conn,
                remote_addr,
            },
        );
    }

    /// Closes every connection to `peer`. Returns how many were closed.
    pub fn close_links_to(&self, peer: NodeId) -> usize {
        let mut links = lock(&self.links);
        let before = links.len();
        links.retain(|_, link| link.peer != peer);
        before - links.len()
    }

    pub fn link_count(&self) -> usize {
        lock(&self.links).len()
    }
}

impl NetworkTransport for SimNetwork {
    fn send(&self, conn: ConnectionId, packet: PacketEnvelope) -> Result<(), EnvError> {
        let link = lock(&self.links)
            .get(&conn)
            .copied()
            .ok_or_else(|| EnvError::unknown_connection(conn))?;

        let msg = RoutedPacket {
            from: self.local_id,
            to: link.peer,
            to_conn: link.peer_conn,
            packet,
        };
        self.tx.send(msg).map_err(|_| EnvError::network("Router closed"))
    }

    fn try_recv(&self) -> Option<(ConnectionId, PacketEnvelope)> {
        lock(&self.inbox).try_recv().ok()
    }

    fn connections(&self) -> Vec<ConnectionId> {
        lock(&self.links).keys().copied().collect()
    }

    fn remote_endpoint(&self, conn: ConnectionId) -> Option<SocketAddr> {
        lock(&self.links).get(&conn).map(|link| link.remote_addr)
    }

    fn local_id(&self) -> NodeId {
        self.local_id
    }
}

/// Network controller for fault injection.
pub struct SimNetworkController {
    /// Per-link latency in milliseconds
    link_latency: Mutex<HashMap<(NodeId, NodeId), u64>>,

    /// Per-link packet loss rate (0.0 - 1.0)
    link_loss: Mutex<HashMap<(NodeId, NodeId), f64>>,

    /// Active partitions (nodes that cannot communicate)
    partitions: Mutex<Vec<(Vec<NodeId>, Vec<NodeId>)>>,

    /// Seeded source for loss decisions
    rng: Mutex<ChaCha8Rng>,
}

impl SimNetworkController {
    pub fn new(seed: u64) -> Self {
        Self {
            link_latency: Mutex::new(HashMap::new()),
            link_loss: Mutex::new(HashMap::new()),
            partitions: Mutex::new(Vec::new()),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// Checks if two nodes can communicate (not partitioned).
    pub fn can_communicate(&self, from: NodeId, to: NodeId) -> bool {
        let partitions = lock(&self.partitions);

        for (group_a, group_b) in partitions.iter() {
            let from_in_a = group_a.contains(&from);
            let from_in_b = group_b.contains(&from);
            let to_in_a = group_a.contains(&to);
            let to_in_b = group_b.contains(&to);

            // Partitioned if one is in A and other in B (or vice versa)
            if (from_in_a && to_in_b) || (from_in_b && to_in_a) {
                return false;
            }
        }

        true
    }

    /// Gets the latency for a link (default 0).
    pub fn get_latency(&self, from: NodeId, to: NodeId) -> u64 {
        *lock(&self.link_latency).get(&(from, to)).unwrap_or(&0)
    }

    /// Gets the loss rate for a link (default 0.0).
    pub fn get_loss(&self, from: NodeId, to: NodeId) -> f64 {
        *lock(&self.link_loss).get(&(from, to)).unwrap_or(&0.0)
    }

    /// Rolls the loss dice for one packet on `from → to`.
    pub fn should_drop(&self, from: NodeId, to: NodeId) -> bool {
        let loss = self.get_loss(from, to);
        loss > 0.0 && lock(&self.rng).gen::<f64>() < loss
    }
}

impl NetworkController for SimNetworkController {
    fn partition(&self, group_a: &[NodeId], group_b: &[NodeId]) {
        lock(&self.partitions).push((group_a.to_vec(), group_b.to_vec()));
    }

    fn heal_all(&self) {
        lock(&self.partitions).clear();
    }

    fn set_link_latency(&self, from: NodeId, to: NodeId, latency_ms: u64) {
        lock(&self.link_latency).insert((from, to), latency_ms);
    }

    fn set_link_loss(&self, from: NodeId, to: NodeId, loss_rate: f64) {
        lock(&self.link_loss).insert((from, to), loss_rate.clamp(0.0, 1.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_controller_partition() {
        let controller = SimNetworkController::new(1);

        let a = NodeId(1);
        let b = NodeId(2);
        let c = NodeId(3);

        // Initially all can communicate
        assert!(controller.can_communicate(a, b));
        assert!(controller.can_communicate(a, c));
        assert!(controller.can_communicate(b, c));

        // Partition: {a} vs {b, c}
        controller.partition(&[a], &[b, c]);

        assert!(!controller.can_communicate(a, b));
        assert!(!controller.can_communicate(c, a));
        assert!(controller.can_communicate(b, c));

        controller.heal_all();
        assert!(controller.can_communicate(a, b));
    }

    #[test]
    fn test_network_controller_latency() {
        let controller = SimNetworkController::new(1);
        let (a, b) = (NodeId(1), NodeId(2));

        assert_eq!(controller.get_latency(a, b), 0);
        controller.set_link_latency(a, b, 100);
        assert_eq!(controller.get_latency(a, b), 100);

        // Reverse direction is separate
        assert_eq!(controller.get_latency(b, a), 0);
    }

    #[test]
    fn test_loss_is_clamped_and_seeded() {
        let (a, b) = (NodeId(1), NodeId(2));
        let c1 = SimNetworkController::new(7);
        let c2 = SimNetworkController::new(7);
        c1.set_link_loss(a, b, 0.5);
        c2.set_link_loss(a, b, 0.5);

        let d1: Vec<bool> = (0..32).map(|_| c1.should_drop(a, b)).collect();
        let d2: Vec<bool> = (0..32).map(|_| c2.should_drop(a, b)).collect();
        assert_eq!(d1, d2);
        assert!(!c1.should_drop(b, a));

        c1.set_link_loss(a, b, 3.0);
        assert_eq!(c1.get_loss(a, b), 1.0);
        assert!(c1.should_drop(a, b));
    }

    #[test]
    fn test_send_routes_to_peer_connection() {
        let (tx, mut router) = mpsc::unbounded_channel();
        let (_inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let net = SimNetwork::new(NodeId(1), tx, inbox_rx);
        let conn = ConnectionId::from_seed(1);
        let peer_conn = ConnectionId::from_seed(2);
        net.open_link(conn, NodeId(0), peer_conn, "10.0.0.1:7980".parse().unwrap());

        net.send(conn, PacketEnvelope::new(vec![1, 2], 5)).unwrap();
        let routed = router.try_recv().unwrap();
        assert_eq!(routed.to, NodeId(0));
        assert_eq!(routed.to_conn, peer_conn);

        assert!(net.send(ConnectionId::from_seed(9), PacketEnvelope::new(vec![], 0)).is_err());

        assert_eq!(net.close_links_to(NodeId(0)), 1);
        assert!(net.connections().is_empty());
        assert!(net.remote_endpoint(conn).is_none());
    }
}
