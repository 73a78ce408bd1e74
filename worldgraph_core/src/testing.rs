//! Test doubles for the substrate and transport seams.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use worldgraph_env::{
    ConnectionId, DeploymentContext, EmulationType, EnvError, NetworkTransport, NodeId, PacketEnvelope,
    WorldHandle, WorldRole, WorldSubstrate,
};

use crate::protocol::ProtocolMessage;

#[derive(Debug, Clone, PartialEq)]
pub enum SubstrateCall {
    Create(WorldHandle, String, WorldRole),
    Schedulable(WorldHandle),
    Connect(WorldHandle, SocketAddr),
    Listen(WorldHandle, SocketAddr),
    Signaling(WorldHandle, String),
    Shutdown(WorldHandle),
    JoinDelay(WorldHandle, Duration),
    Emulation(WorldHandle, EmulationType),
    ContentLoad(WorldHandle),
    ProcessExit,
}

#[derive(Debug, Default)]
pub struct RecordingSubstrate {
    pub calls: Vec<SubstrateCall>,
    pub hosts: HashMap<String, Vec<IpAddr>>,
    next: u64,
}

impl RecordingSubstrate {
    pub fn schedulable(&self) -> Vec<WorldHandle> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                SubstrateCall::Schedulable(h) => Some(*h),
                _ => None,
            })
            .collect()
    }

    pub fn exit_requested(&self) -> bool {
        self.calls.contains(&SubstrateCall::ProcessExit)
    }
}

impl WorldSubstrate for RecordingSubstrate {
    fn create_world(&mut self, name: &str, role: WorldRole) -> WorldHandle {
        self.next += 1;
        let handle = WorldHandle(self.next);
        self.calls.push(SubstrateCall::Create(handle, name.to_string(), role));
        handle
    }

    fn mark_schedulable(&mut self, world: WorldHandle) {
        self.calls.push(SubstrateCall::Schedulable(world));
    }

    fn request_connect(&mut self, world: WorldHandle, endpoint: SocketAddr) {
        self.calls.push(SubstrateCall::Connect(world, endpoint));
    }

    fn request_listen(&mut self, world: WorldHandle, endpoint: SocketAddr) {
        self.calls.push(SubstrateCall::Listen(world, endpoint));
    }

    fn request_signaling_connect(&mut self, world: WorldHandle, url: &str) {
        self.calls.push(SubstrateCall::Signaling(world, url.to_string()));
    }

    fn mark_for_shutdown(&mut self, world: WorldHandle) {
        self.calls.push(SubstrateCall::Shutdown(world));
    }

    fn set_join_delay(&mut self, world: WorldHandle, delay: Duration) {
        self.calls.push(SubstrateCall::JoinDelay(world, delay));
    }

    fn set_emulation(&mut self, world: WorldHandle, emulation: EmulationType) {
        self.calls.push(SubstrateCall::Emulation(world, emulation));
    }

    fn request_content_load(&mut self, world: WorldHandle) {
        self.calls.push(SubstrateCall::ContentLoad(world));
    }

    fn request_shutdown(&mut self) {
        self.calls.push(SubstrateCall::ProcessExit);
    }

    fn resolve_hostname(&self, host: &str) -> Result<Vec<IpAddr>, EnvError> {
        Ok(self.hosts.get(host).cloned().unwrap_or_default())
    }
}

/// Transport whose inbox is filled by the test and whose outbox is inspected.
pub struct MemoryTransport {
    local_id: NodeId,
    peers: Mutex<HashMap<ConnectionId, SocketAddr>>,
    inbox: Mutex<VecDeque<(ConnectionId, PacketEnvelope)>>,
    pub sent: Mutex<Vec<(ConnectionId, PacketEnvelope)>>,
}

impl MemoryTransport {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            peers: Mutex::new(HashMap::new()),
            inbox: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn add_peer(&self, conn: ConnectionId, addr: &str) {
        self.peers.lock().unwrap().insert(conn, addr.parse().unwrap());
    }

    pub fn deliver(&self, conn: ConnectionId, msg: &ProtocolMessage) {
        let envelope = msg.encode(0).unwrap();
        self.inbox.lock().unwrap().push_back((conn, envelope));
    }

    /// Drains and decodes everything sent so far.
    pub fn take_sent(&self) -> Vec<(ConnectionId, ProtocolMessage)> {
        self.sent
            .lock()
            .unwrap()
            .drain(..)
            .map(|(conn, env)| (conn, ProtocolMessage::decode(&env).unwrap()))
            .collect()
    }
}

impl NetworkTransport for MemoryTransport {
    fn send(&self, conn: ConnectionId, packet: PacketEnvelope) -> Result<(), EnvError> {
        if !self.peers.lock().unwrap().contains_key(&conn) {
            return Err(EnvError::unknown_connection(conn));
        }
        self.sent.lock().unwrap().push((conn, packet));
        Ok(())
    }

    fn try_recv(&self) -> Option<(ConnectionId, PacketEnvelope)> {
        self.inbox.lock().unwrap().pop_front()
    }

    fn connections(&self) -> Vec<ConnectionId> {
        self.peers.lock().unwrap().keys().copied().collect()
    }

    fn remote_endpoint(&self, conn: ConnectionId) -> Option<SocketAddr> {
        self.peers.lock().unwrap().get(&conn).copied()
    }

    fn local_id(&self) -> NodeId {
        self.local_id
    }
}

/// Clock that only moves when told to; `sleep` advances it.
#[derive(Debug, Default)]
pub struct ManualContext {
    now: Mutex<Duration>,
}

impl ManualContext {
    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

#[async_trait]
impl DeploymentContext for ManualContext {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn seed(&self) -> u64 {
        0
    }
}
