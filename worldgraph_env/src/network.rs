//! Network transport abstraction for deployment nodes.

use crate::error::EnvError;
use crate::types::{ConnectionId, NodeId, PacketEnvelope};
use std::net::SocketAddr;

/// Connection-oriented, non-blocking transport between deployment nodes.
///
/// Every call returns immediately; the orchestrator polls
/// [`NetworkTransport::try_recv`] until it yields `None` once per tick.
///
/// # Packet Flow
///
/// ```text
/// Member                     Transport                  Authority
///   |                           |                          |
///   |-- send(conn, Request) --->|                          |
///   |                           |-- [latency/loss] ------->|
///   |                           |                          |-- try_recv() -> (conn', Request)
///   |                           |<-- send(conn', Config) --|
///   |<-- try_recv() ------------|                          |
/// ```
pub trait NetworkTransport: Send + Sync + 'static {
    /// Queues a packet on an established connection.
    ///
    /// # Returns
    /// * `Ok(())` - Packet queued for delivery
    /// * `Err(EnvError::UnknownConnection)` - The handle is not (or no longer) connected
    ///
    /// # Note
    /// Success does not guarantee delivery.
    fn send(&self, conn: ConnectionId, packet: PacketEnvelope) -> Result<(), EnvError>;

    /// Returns the next received packet and the connection it arrived on,
    /// or `None` when nothing is pending.
    fn try_recv(&self) -> Option<(ConnectionId, PacketEnvelope)>;

    /// Lists connections that have completed their handshake.
    fn connections(&self) -> Vec<ConnectionId>;

    /// Returns the observed address of the peer on `conn`.
    fn remote_endpoint(&self, conn: ConnectionId) -> Option<SocketAddr>;

    /// Returns this node's ID.
    fn local_id(&self) -> NodeId;
}

/// Fault-injection controls for simulated networks.
///
/// Allows injecting faults like partitions and latency.
pub trait NetworkController: Send + Sync {
    /// Creates a network partition between two node sets.
    fn partition(&self, group_a: &[NodeId], group_b: &[NodeId]);

    /// Heals all partitions.
    fn heal_all(&self);

    /// Sets latency for a specific link.
    fn set_link_latency(&self, from: NodeId, to: NodeId, latency_ms: u64);

    /// Sets packet loss probability for a link (0.0 - 1.0).
    fn set_link_loss(&self, from: NodeId, to: NodeId, loss_rate: f64);
}
