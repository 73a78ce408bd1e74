//! Recording world substrate.
//!
//! Stands in for the engine that actually hosts worlds. Every request is
//! applied to a small per-world state record and appended to a timeline
//! stamped with virtual time, which scenarios assert against and the
//! exporter writes out.

use crate::context::SimContext;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use worldgraph_env::{EmulationType, EnvError, NodeId, WorldHandle, WorldRole, WorldSubstrate};

/// Something a node asked its substrate to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SubstrateEvent {
    Created { world: WorldHandle, name: String, role: WorldRole },
    Schedulable { world: WorldHandle },
    Connect { world: WorldHandle, endpoint: SocketAddr },
    Listen { world: WorldHandle, endpoint: SocketAddr },
    Signaling { world: WorldHandle, url: String },
    Shutdown { world: WorldHandle },
    StreamingStopped { world: WorldHandle },
    JoinDelay { world: WorldHandle, delay_ms: u64 },
    Emulation { world: WorldHandle, emulation: EmulationType },
    ContentLoad { world: WorldHandle },
    ProcessExit,
}

/// A substrate event stamped with the node and virtual time it happened at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub time_ms: u64,
    pub node: NodeId,
    pub event: SubstrateEvent,
}

/// What the substrate knows about one world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimWorldState {
    pub name: String,
    pub role: WorldRole,
    pub schedulable: bool,
    pub connected_to: Option<SocketAddr>,
    pub listening_on: Option<SocketAddr>,
    pub signaling_url: Option<String>,
    pub join_delay: Duration,
    pub emulation: EmulationType,
    pub content_loaded: bool,
    pub shutdown: bool,
}

pub struct SimSubstrate {
    node: NodeId,
    clock: Arc<SimContext>,
    next_handle: u64,
    worlds: BTreeMap<WorldHandle, SimWorldState>,
    events: Vec<TimedEvent>,
    hosts: HashMap<String, Vec<IpAddr>>,
    exit_requested: bool,
}

impl SimSubstrate {
    pub fn new(node: NodeId, clock: Arc<SimContext>) -> Self {
        Self {
            node,
            clock,
            next_handle: 0,
            worlds: BTreeMap::new(),
            events: Vec::new(),
            hosts: HashMap::new(),
            exit_requested: false,
        }
    }

    /// Adds a hostname the substrate can resolve.
    pub fn with_host(mut self, host: impl Into<String>, addrs: Vec<IpAddr>) -> Self {
        self.hosts.insert(host.into(), addrs);
        self
    }

    pub fn worlds(&self) -> impl Iterator<Item = (&WorldHandle, &SimWorldState)> {
        self.worlds.iter()
    }

    /// Live (not shut down) world with that name.
    pub fn live_world(&self, name: &str) -> Option<&SimWorldState> {
        self.worlds.values().find(|w| w.name == name && !w.shutdown)
    }

    /// Every world with that name, stopped ones included.
    pub fn worlds_named(&self, name: &str) -> Vec<&SimWorldState> {
        self.worlds.values().filter(|w| w.name == name).collect()
    }

    pub fn live_count(&self) -> usize {
        self.worlds.values().filter(|w| !w.shutdown).count()
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Time of the first shutdown of a world with that name.
    pub fn shutdown_time_ms(&self, name: &str) -> Option<u64> {
        self.events.iter().find_map(|e| match &e.event {
            SubstrateEvent::Shutdown { world } => self
                .worlds
                .get(world)
                .filter(|w| w.name == name)
                .map(|_| e.time_ms),
            _ => None,
        })
    }

    fn record(&mut self, event: SubstrateEvent) {
        debug!("node {} substrate: {:?}", self.node, event);
        self.events.push(TimedEvent {
            time_ms: self.clock.time_ms(),
            node: self.node,
            event,
        });
    }

    fn with_world(&mut self, world: WorldHandle, apply: impl FnOnce(&mut SimWorldState)) {
        if let Some(state) = self.worlds.get_mut(&world) {
            apply(state);
        }
    }
}

impl WorldSubstrate for SimSubstrate {
    fn create_world(&mut self, name: &str, role: WorldRole) -> WorldHandle {
        self.next_handle += 1;
        let world = WorldHandle(self.next_handle);
        self.worlds.insert(
            world,
            SimWorldState {
                name: name.to_string(),
                role,
                schedulable: false,
                connected_to: None,
                listening_on: None,
                signaling_url: None,
                join_delay: Duration::ZERO,
                emulation: EmulationType::Idle,
                content_loaded: false,
                shutdown: false,
            },
        );
        self.record(SubstrateEvent::Created {
            world,
            name: name.to_string(),
            role,
        });
        world
    }

    fn mark_schedulable(&mut self, world: WorldHandle) {
        self.with_world(world, |w| w.schedulable = true);
        self.record(SubstrateEvent::Schedulable { world });
    }

    fn request_connect(&mut self, world: WorldHandle, endpoint: SocketAddr) {
        self.with_world(world, |w| w.connected_to = Some(endpoint));
        self.record(SubstrateEvent::Connect { world, endpoint });
    }

    fn request_listen(&mut self, world: WorldHandle, endpoint: SocketAddr) {
        self.with_world(world, |w| w.listening_on = Some(endpoint));
        self.record(SubstrateEvent::Listen { world, endpoint });
    }

    fn request_signaling_connect(&mut self, world: WorldHandle, url: &str) {
        self.with_world(world, |w| w.signaling_url = Some(url.to_string()));
        self.record(SubstrateEvent::Signaling {
            world,
            url: url.to_string(),
        });
    }

    fn mark_for_shutdown(&mut self, world: WorldHandle) {
        let streams = self
            .worlds
            .get(&world)
            .map(|w| w.role.is_streamed_client() || w.role.is_streaming_host())
            .unwrap_or(false);
        self.with_world(world, |w| {
            w.shutdown = true;
            w.schedulable = false;
        });
        self.record(SubstrateEvent::Shutdown { world });
        if streams {
            self.record(SubstrateEvent::StreamingStopped { world });
        }
    }

    fn set_join_delay(&mut self, world: WorldHandle, delay: Duration) {
        self.with_world(world, |w| w.join_delay = delay);
        self.record(SubstrateEvent::JoinDelay {
            world,
            delay_ms: delay.as_millis() as u64,
        });
    }

    fn set_emulation(&mut self, world: WorldHandle, emulation: EmulationType) {
        self.with_world(world, |w| w.emulation = emulation);
        self.record(SubstrateEvent::Emulation { world, emulation });
    }

    fn request_content_load(&mut self, world: WorldHandle) {
        self.with_world(world, |w| w.content_loaded = true);
        self.record(SubstrateEvent::ContentLoad { world });
    }

    fn request_shutdown(&mut self) {
        self.exit_requested = true;
        self.record(SubstrateEvent::ProcessExit);
    }

    fn resolve_hostname(&self, host: &str) -> Result<Vec<IpAddr>, EnvError> {
        self.hosts
            .get(host)
            .cloned()
            .ok_or_else(|| EnvError::resolution(host))
    }
}
