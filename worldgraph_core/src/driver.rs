//! World Lifecycle Driver - creates, starts, connects and stops worlds.
//!
//! The only component that talks to the [`WorldSubstrate`]. The protocol
//! engine, the experiment scheduler and the remote control endpoint all
//! go through it, and the runtime hands it to them explicitly.
//!
//! # Lifecycle
//!
//! ```text
//!   create_worlds ──► [created] ──start──► [schedulable] ──connect──► [connect/listen intent]
//!                         │                      │                            │
//!                         └──────────────── Stop (mark for shutdown) ◄────────┘
//! ```
//!
//! Start and connect select worlds by play type and streaming role, not by
//! name, so they also reach worlds created by earlier messages.

use crate::config::{OrchestratorConfig, DEFAULT_SIGNALING_PORT};
use crate::error::DeploymentError;
use crate::graph::{StreamingRole, WorldAction, WorldType};
use crate::protocol::{
    is_loopback_addr, resolve_loopback, substitute_source, ConfigMessage, WorldActionMessage,
    SOURCE_ADDRESS,
};

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::{debug, info, warn};
use worldgraph_env::{EmulationType, WorldHandle, WorldRole, WorldSubstrate};

pub const CLIENT_WORLD: &str = "ClientWorld";
pub const HOST_CLIENT_WORLD: &str = "HostClientWorld";
pub const CLOUD_HOST_CLIENT_WORLD: &str = "CloudHostClientWorld";
pub const STREAMING_GUEST_WORLD: &str = "StreamingGuestWorld";
pub const SERVER_WORLD: &str = "ServerWorld";
pub const SIMULATED_CLIENT_PREFIX: &str = "SimulatedClientWorld_";

/// Which kinds of worlds an operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayType {
    ClientAndServer,
    Client,
    Server,
    /// Thin client; behaves as `Client` with the `Guest` streaming role.
    StreamedClient,
    SimulatedClient,
}

impl PlayType {
    /// Play type that applies a configuration message of `world_type`.
    pub fn for_world_type(world_type: WorldType) -> Self {
        match world_type {
            WorldType::Client => PlayType::Client,
            WorldType::Server => PlayType::Server,
            WorldType::SimulatedClient => PlayType::SimulatedClient,
            WorldType::Unspecified => PlayType::ClientAndServer,
        }
    }

    fn has_clients(&self) -> bool {
        matches!(self, PlayType::Client | PlayType::ClientAndServer)
    }

    fn has_server(&self) -> bool {
        matches!(self, PlayType::Server | PlayType::ClientAndServer)
    }
}

impl std::str::FromStr for PlayType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clientandserver" | "serverandclient" | "clientserver" | "serverclient" => {
                Ok(PlayType::ClientAndServer)
            }
            "client" => Ok(PlayType::Client),
            "server" => Ok(PlayType::Server),
            "streamedclient" | "streamclient" | "guestclient" => Ok(PlayType::StreamedClient),
            "simulatedclient" | "simulateclient" | "simulationclient" | "simulatedclients" => {
                Ok(PlayType::SimulatedClient)
            }
            _ => Err(format!("Unknown play type: {}", s)),
        }
    }
}

/// Local defaults the driver falls back to.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Substitute for loopback game server addresses
    pub default_server_url: String,

    /// Substitute for loopback signaling addresses
    pub default_signaling_url: String,

    pub simulated_join_interval: Duration,

    /// Offset added to simulated client indices in world names
    pub user_id: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        OrchestratorConfig::default().driver_config()
    }
}

/// Where clients connect to.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectTarget {
    pub server_addr: String,
    pub server_port: u16,
    pub signaling_addr: String,
}

/// Arguments of one [`WorldLifecycleDriver::create_worlds`] call.
#[derive(Debug, Clone)]
pub struct WorldSetup {
    pub streaming_role: StreamingRole,
    pub play_type: PlayType,
    pub num_simulated_clients: u32,
    pub auto_start: bool,
    pub auto_connect: bool,
    pub target: ConnectTarget,

    /// World name; a prefix for simulated clients. Defaults per role when `None`.
    pub name: Option<String>,

    pub emulation: EmulationType,
}

/// Outcome of a create call.
///
/// The worlds stay registered even when the automatic connect fails, so
/// callers still request content for `handles`.
#[derive(Debug, Default)]
pub struct CreatedWorlds {
    pub handles: Vec<WorldHandle>,
    pub connect_error: Option<DeploymentError>,
}

/// A world the driver has created.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldEntry {
    pub handle: WorldHandle,
    pub name: String,
    pub role: WorldRole,

    /// Marked for shutdown; the substrate reaps it later
    pub stopped: bool,
}

pub struct WorldLifecycleDriver<S: WorldSubstrate> {
    substrate: S,
    config: DriverConfig,
    worlds: Vec<WorldEntry>,
}

impl<S: WorldSubstrate> WorldLifecycleDriver<S> {
    pub fn new(substrate: S, config: DriverConfig) -> Self {
        Self {
            substrate,
            config,
            worlds: Vec::new(),
        }
    }

    pub fn substrate(&self) -> &S {
        &self.substrate
    }

    pub fn substrate_mut(&mut self) -> &mut S {
        &mut self.substrate
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Every world created so far, stopped ones included.
    pub fn worlds(&self) -> &[WorldEntry] {
        &self.worlds
    }

    /// Looks up a world by name.
    ///
    /// Prefers the live world; falls back to the most recently stopped one
    /// so that a repeated Stop still finds its target.
    pub fn find_world(&self, name: &str) -> Option<&WorldEntry> {
        self.find_index(name).map(|i| &self.worlds[i])
    }

    fn find_index(&self, name: &str) -> Option<usize> {
        self.worlds
            .iter()
            .position(|w| w.name == name && !w.stopped)
            .or_else(|| self.worlds.iter().rposition(|w| w.name == name))
    }

    fn is_live_name(&self, name: &str) -> bool {
        self.worlds.iter().any(|w| w.name == name && !w.stopped)
    }

    /// Creates the worlds a play type calls for and registers them.
    ///
    /// - clients: one regular client, or one streamed guest for the `Guest` role
    /// - simulated clients: `num_simulated_clients` worlds, the i-th joining
    ///   `i × simulated_join_interval` after it starts
    /// - server: one server world
    ///
    /// Names must not collide with live worlds; nothing is created if one does.
    /// A failed automatic connect is reported in [`CreatedWorlds::connect_error`].
    pub fn create_worlds(&mut self, setup: &WorldSetup) -> Result<CreatedWorlds, DeploymentError> {
        let (play_type, streaming_role) = normalize(setup.play_type, setup.streaming_role);
        info!(
            "Setting up worlds with play type {:?} and streaming role {:?}",
            play_type, streaming_role
        );

        let plan = self.plan_worlds(play_type, streaming_role, setup);

        let mut names = HashSet::new();
        for (name, _, _) in &plan {
            if self.is_live_name(name) || !names.insert(name.as_str()) {
                return Err(DeploymentError::DuplicateWorld(name.clone()));
            }
        }

        let mut created = Vec::with_capacity(plan.len());
        for (name, role, join_delay) in plan {
            let handle = self.substrate.create_world(&name, role);
            if let Some(delay) = join_delay {
                self.substrate.set_join_delay(handle, delay);
            }
            if role.is_client() && setup.emulation != EmulationType::Idle {
                self.substrate.set_emulation(handle, setup.emulation);
            }
            if setup.auto_start {
                self.substrate.mark_schedulable(handle);
            }
            info!("Created {} world {}", role, name);
            self.worlds.push(WorldEntry {
                handle,
                name,
                role,
                stopped: false,
            });
            created.push(handle);
        }

        let connect_error = if setup.auto_connect {
            self.connect_worlds(streaming_role, play_type, &setup.target).err()
        } else {
            None
        };

        Ok(CreatedWorlds {
            handles: created,
            connect_error,
        })
    }

    fn plan_worlds(
        &self,
        play_type: PlayType,
        streaming_role: StreamingRole,
        setup: &WorldSetup,
    ) -> Vec<(String, WorldRole, Option<Duration>)> {
        let named = |default: &str| setup.name.clone().unwrap_or_else(|| default.to_string());
        let mut plan = Vec::new();

        if play_type.has_clients() {
            let (role, default) = match streaming_role {
                StreamingRole::Guest => (WorldRole::StreamedClient, STREAMING_GUEST_WORLD),
                StreamingRole::Host => (WorldRole::HostClient, HOST_CLIENT_WORLD),
                StreamingRole::CloudHost => (WorldRole::CloudHostClient, CLOUD_HOST_CLIENT_WORLD),
                StreamingRole::Disabled => (WorldRole::Client, CLIENT_WORLD),
            };
            plan.push((named(default), role, None));
        }

        if play_type == PlayType::SimulatedClient {
            let prefix = named(SIMULATED_CLIENT_PREFIX);
            for i in 0..setup.num_simulated_clients {
                let name = format!("{}{}", prefix, self.config.user_id + i);
                let delay = self.config.simulated_join_interval * i;
                plan.push((name, WorldRole::SimulatedClient, Some(delay)));
            }
        }

        if play_type.has_server() {
            plan.push((named(SERVER_WORLD), WorldRole::Server, None));
        }

        plan
    }

    /// Marks every live world selected by the play type and role schedulable.
    pub fn start_worlds(
        &mut self,
        streaming_role: StreamingRole,
        play_type: PlayType,
        auto_connect: bool,
        target: &ConnectTarget,
    ) -> Result<(), DeploymentError> {
        let (play_type, streaming_role) = normalize(play_type, streaming_role);
        info!(
            "Starting worlds with play type {:?} and streaming role {:?}",
            play_type, streaming_role
        );

        for world in self.worlds.iter().filter(|w| !w.stopped) {
            if selects_for_start(play_type, streaming_role, world.role) {
                debug!("Adding world {} to update list", world.name);
                self.substrate.mark_schedulable(world.handle);
            }
        }

        if auto_connect {
            self.connect_worlds(streaming_role, play_type, target)?;
        }
        Ok(())
    }

    /// Issues connect, signaling or listen intents for matching live worlds.
    ///
    /// The server host is resolved at most once per call; zero addresses
    /// fails the call.
    pub fn connect_worlds(
        &mut self,
        streaming_role: StreamingRole,
        play_type: PlayType,
        target: &ConnectTarget,
    ) -> Result<(), DeploymentError> {
        let (play_type, streaming_role) = normalize(play_type, streaming_role);
        info!(
            "Connecting worlds with play type {:?} and streaming role {:?}",
            play_type, streaming_role
        );

        let mut game_endpoint: Option<SocketAddr> = None;
        let live: Vec<(WorldHandle, WorldRole, String)> = self
            .worlds
            .iter()
            .filter(|w| !w.stopped)
            .map(|w| (w.handle, w.role, w.name.clone()))
            .collect();

        for (handle, role, name) in live {
            let joins_server = (play_type.has_clients()
                && role.is_regular_client()
                && streaming_role != StreamingRole::Guest)
                || (play_type == PlayType::SimulatedClient && role.is_simulated_client());

            if joins_server {
                let endpoint = match game_endpoint {
                    Some(endpoint) => endpoint,
                    None => {
                        let endpoint = self.resolve_endpoint(&target.server_addr, target.server_port)?;
                        game_endpoint = Some(endpoint);
                        endpoint
                    }
                };
                info!("Created connection request for {} to {}", name, endpoint);
                self.substrate.request_connect(handle, endpoint);
            } else if play_type.has_clients()
                && streaming_role == StreamingRole::Guest
                && role.is_streamed_client()
            {
                let url = self.signaling_url(&target.signaling_addr, DEFAULT_SIGNALING_PORT);
                info!("Creating streaming guest connect for {} with endpoint {}", name, url);
                self.substrate.request_signaling_connect(handle, &url);
            } else if play_type.has_server() && role.is_server() {
                let endpoint = listen_endpoint(target.server_port);
                info!("Created listen request for {} on {}", name, endpoint);
                self.substrate.request_listen(handle, endpoint);
            }
        }
        Ok(())
    }

    /// Applies a runtime action to the named world.
    ///
    /// Returns `false` if no world carries that name. A literal loopback
    /// `addr` is replaced by the configured default server or signaling
    /// address.
    pub fn handle_world_action(&mut self, name: &str, addr: &str, port: u16, action: WorldAction) -> bool {
        let Some(index) = self.find_index(name) else {
            return false;
        };
        let WorldEntry { handle, role, .. } = self.worlds[index].clone();

        match action {
            WorldAction::Stop => {
                if !self.worlds[index].stopped {
                    self.substrate.mark_for_shutdown(handle);
                    self.worlds[index].stopped = true;
                    info!("Stopping world {}", name);
                }
            }
            WorldAction::Start => {
                self.substrate.mark_schedulable(handle);
                info!("Starting world {}", name);
            }
            WorldAction::Connect => {
                self.substrate.mark_schedulable(handle);
                if role.is_streamed_client() {
                    let url = if is_loopback_addr(addr) {
                        self.config.default_signaling_url.clone()
                    } else {
                        format!("ws://{}:{}", addr, port)
                    };
                    info!("Connecting streamed world {} to {}", name, url);
                    self.substrate.request_signaling_connect(handle, &url);
                } else if role.is_client() {
                    let host = resolve_loopback(addr, &self.config.default_server_url);
                    match self.resolve_endpoint(&host, port) {
                        Ok(endpoint) => {
                            info!("Connecting client world {} to {}:{} = {}", name, host, port, endpoint);
                            self.substrate.request_connect(handle, endpoint);
                        }
                        Err(e) => warn!("Cannot connect world {}: {}", name, e),
                    }
                } else {
                    let endpoint = listen_endpoint(port);
                    info!("Server world {} listening on {}", name, endpoint);
                    self.substrate.request_listen(handle, endpoint);
                }
            }
        }
        true
    }

    /// Applies one configuration message received from `observed`.
    ///
    /// Returns the newly created worlds (empty unless the message creates).
    pub fn apply_config_message(
        &mut self,
        msg: &ConfigMessage,
        observed: SocketAddr,
    ) -> Result<CreatedWorlds, DeploymentError> {
        if msg.world_type == WorldType::Unspecified {
            info!("Received configuration message for {} with no world type", msg.world_name);
            return Ok(CreatedWorlds::default());
        }

        let play_type = PlayType::for_world_type(msg.world_type);
        let target = ConnectTarget {
            server_addr: substitute_source(&msg.server_addr, observed, &self.config.default_server_url),
            server_port: msg.server_port,
            signaling_addr: substitute_source(
                &msg.signaling_addr,
                observed,
                &self.config.default_signaling_url,
            ),
        };

        let actions = msg.actions;
        if actions.create {
            let setup = WorldSetup {
                streaming_role: msg.streaming_role,
                play_type,
                num_simulated_clients: msg.num_simulated_clients,
                auto_start: actions.start,
                auto_connect: actions.connect,
                target,
                name: Some(msg.world_name.clone()).filter(|n| !n.is_empty()),
                emulation: msg.emulation_type,
            };
            self.create_worlds(&setup)
        } else if actions.start {
            self.start_worlds(msg.streaming_role, play_type, actions.connect, &target)?;
            Ok(CreatedWorlds::default())
        } else if actions.connect {
            self.connect_worlds(msg.streaming_role, play_type, &target)?;
            Ok(CreatedWorlds::default())
        } else {
            Ok(CreatedWorlds::default())
        }
    }

    /// Applies a world-action message received from `observed`.
    pub fn apply_world_action_message(&mut self, msg: &WorldActionMessage, observed: SocketAddr) -> bool {
        info!("Received world action {:?} for world {}", msg.action, msg.world_name);
        let addr = if msg.connection_addr == SOURCE_ADDRESS {
            let addr = observed.ip().to_string();
            debug!("'source' address converted to {}", addr);
            addr
        } else {
            msg.connection_addr.clone()
        };
        self.handle_world_action(&msg.world_name, &addr, msg.connection_port, msg.action)
    }

    /// Creates, starts and connects worlds from the process flags alone.
    pub fn setup_worlds_from_local_config(
        &mut self,
        config: &OrchestratorConfig,
    ) -> Result<CreatedWorlds, DeploymentError> {
        let setup = WorldSetup {
            streaming_role: config.streaming_role,
            play_type: config.play_type,
            num_simulated_clients: config.num_simulated_clients,
            auto_start: true,
            auto_connect: true,
            target: ConnectTarget {
                server_addr: config.server_url.clone(),
                server_port: config.server_port,
                signaling_addr: config.signaling_url.clone(),
            },
            name: None,
            emulation: config.emulation_type,
        };
        self.create_worlds(&setup)
    }

    /// Requests content for new worlds that run game logic.
    ///
    /// Streamed guests only render a stream and get nothing. Returns the
    /// number of requests issued.
    pub fn request_content_load(&mut self, handles: &[WorldHandle]) -> usize {
        let mut issued = 0;
        for handle in handles {
            let eligible = self
                .worlds
                .iter()
                .find(|w| w.handle == *handle)
                .map(|w| (w.role.is_client() || w.role.is_server()) && !w.role.is_streamed_client())
                .unwrap_or(false);
            if eligible {
                self.substrate.request_content_load(*handle);
                issued += 1;
            }
        }
        issued
    }

    /// Asks the substrate to end the process.
    pub fn request_shutdown(&mut self) {
        self.substrate.request_shutdown();
    }

    fn resolve_endpoint(&self, host: &str, port: u16) -> Result<SocketAddr, DeploymentError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }
        let addrs = self
            .substrate
            .resolve_hostname(host)
            .map_err(|_| DeploymentError::resolution(host))?;
        addrs
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addrs.first())
            .map(|ip| SocketAddr::new(*ip, port))
            .ok_or_else(|| DeploymentError::resolution(host))
    }

    fn signaling_url(&self, addr: &str, port: u16) -> String {
        if addr.is_empty() {
            self.config.default_signaling_url.clone()
        } else if addr.contains("://") {
            addr.to_string()
        } else {
            format!("ws://{}:{}", addr, port)
        }
    }
}

/// A streamed-client play type is a client play type with the guest role.
fn normalize(play_type: PlayType, streaming_role: StreamingRole) -> (PlayType, StreamingRole) {
    match play_type {
        PlayType::StreamedClient => (PlayType::Client, StreamingRole::Guest),
        other => (other, streaming_role),
    }
}

fn selects_for_start(play_type: PlayType, streaming_role: StreamingRole, role: WorldRole) -> bool {
    (play_type.has_clients() && role.is_regular_client())
        || (play_type.has_clients() && streaming_role == StreamingRole::Guest && role.is_streamed_client())
        || (play_type == PlayType::SimulatedClient && role.is_simulated_client())
        || (play_type.has_server() && role.is_server())
}

fn listen_endpoint(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InitializationMode;
    use crate::protocol::ConfigActions;
    use crate::testing::{RecordingSubstrate, SubstrateCall};
    use worldgraph_env::NodeId;

    fn driver() -> WorldLifecycleDriver<RecordingSubstrate> {
        let config = DriverConfig {
            default_server_url: "192.168.1.10".to_string(),
            default_signaling_url: "ws://192.168.1.10:7981".to_string(),
            simulated_join_interval: Duration::from_millis(250),
            user_id: 100,
        };
        WorldLifecycleDriver::new(RecordingSubstrate::default(), config)
    }

    fn target(addr: &str) -> ConnectTarget {
        ConnectTarget {
            server_addr: addr.to_string(),
            server_port: 7979,
            signaling_addr: "10.0.0.5".to_string(),
        }
    }

    fn setup(play_type: PlayType, role: StreamingRole) -> WorldSetup {
        WorldSetup {
            streaming_role: role,
            play_type,
            num_simulated_clients: 0,
            auto_start: true,
            auto_connect: true,
            target: target("10.0.0.1"),
            name: None,
            emulation: EmulationType::Idle,
        }
    }

    fn observed(addr: &str) -> SocketAddr {
        addr.parse().unwrap()
    }

    #[test]
    fn test_client_and_server_creates_both() {
        let mut driver = driver();
        let created = driver
            .create_worlds(&setup(PlayType::ClientAndServer, StreamingRole::Disabled))
            .unwrap()
            .handles;

        assert_eq!(created.len(), 2);
        let names: Vec<_> = driver.worlds().iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec![CLIENT_WORLD, SERVER_WORLD]);

        let calls = &driver.substrate().calls;
        assert!(calls.contains(&SubstrateCall::Connect(created[0], observed("10.0.0.1:7979"))));
        assert!(calls.contains(&SubstrateCall::Listen(created[1], observed("0.0.0.0:7979"))));
        assert_eq!(driver.substrate().schedulable(), created);
    }

    #[test]
    fn test_streamed_play_type_creates_guest() {
        let mut driver = driver();
        let created = driver
            .create_worlds(&setup(PlayType::StreamedClient, StreamingRole::Disabled))
            .unwrap()
            .handles;

        assert_eq!(driver.worlds()[0].name, STREAMING_GUEST_WORLD);
        assert_eq!(driver.worlds()[0].role, WorldRole::StreamedClient);
        assert!(driver
            .substrate()
            .calls
            .contains(&SubstrateCall::Signaling(created[0], "ws://10.0.0.5:7981".to_string())));
    }

    #[test]
    fn test_host_role_creates_host_client() {
        let mut driver = driver();
        driver
            .create_worlds(&setup(PlayType::Client, StreamingRole::CloudHost))
            .unwrap();
        assert_eq!(driver.worlds()[0].name, CLOUD_HOST_CLIENT_WORLD);
        assert_eq!(driver.worlds()[0].role, WorldRole::CloudHostClient);
    }

    #[test]
    fn test_simulated_clients_get_staggered_join_delays() {
        let mut driver = driver();
        let mut s = setup(PlayType::SimulatedClient, StreamingRole::Disabled);
        s.num_simulated_clients = 3;
        let created = driver.create_worlds(&s).unwrap().handles;

        let names: Vec<_> = driver.worlds().iter().map(|w| w.name.clone()).collect();
        assert_eq!(
            names,
            vec![
                "SimulatedClientWorld_100",
                "SimulatedClientWorld_101",
                "SimulatedClientWorld_102"
            ]
        );
        let calls = &driver.substrate().calls;
        assert!(calls.contains(&SubstrateCall::JoinDelay(created[0], Duration::ZERO)));
        assert!(calls.contains(&SubstrateCall::JoinDelay(created[2], Duration::from_millis(500))));
        assert_eq!(
            calls.iter().filter(|c| matches!(c, SubstrateCall::Connect(..))).count(),
            3
        );
    }

    #[test]
    fn test_duplicate_live_name_rejected() {
        let mut driver = driver();
        driver
            .create_worlds(&setup(PlayType::Server, StreamingRole::Disabled))
            .unwrap();
        let err = driver
            .create_worlds(&setup(PlayType::Server, StreamingRole::Disabled))
            .unwrap_err();
        assert!(matches!(err, DeploymentError::DuplicateWorld(name) if name == SERVER_WORLD));

        // Once stopped, the name is free again
        assert!(driver.handle_world_action(SERVER_WORLD, "", 0, WorldAction::Stop));
        driver
            .create_worlds(&setup(PlayType::Server, StreamingRole::Disabled))
            .unwrap();
        assert_eq!(driver.worlds().len(), 2);
        assert!(!driver.find_world(SERVER_WORLD).unwrap().stopped);
    }

    #[test]
    fn test_resolution_failure_fails_connect() {
        let mut driver = driver();
        let mut s = setup(PlayType::Client, StreamingRole::Disabled);
        s.auto_connect = false;
        driver.create_worlds(&s).unwrap();

        let err = driver
            .connect_worlds(StreamingRole::Disabled, PlayType::Client, &target("nowhere.invalid"))
            .unwrap_err();
        assert!(matches!(err, DeploymentError::Resolution(host) if host == "nowhere.invalid"));
    }

    #[test]
    fn test_failed_auto_connect_keeps_created_worlds() {
        let mut driver = driver();
        let created = driver
            .create_worlds(&WorldSetup {
                target: target("nowhere.invalid"),
                ..setup(PlayType::ClientAndServer, StreamingRole::Disabled)
            })
            .unwrap();

        assert_eq!(created.handles.len(), 2);
        assert!(matches!(
            created.connect_error,
            Some(DeploymentError::Resolution(ref host)) if host == "nowhere.invalid"
        ));
        assert_eq!(driver.worlds().len(), 2);
        assert_eq!(driver.substrate().schedulable(), created.handles);
        assert_eq!(driver.request_content_load(&created.handles), 2);
    }

    #[test]
    fn test_hostname_resolved_through_substrate() {
        let mut driver = driver();
        driver
            .substrate_mut()
            .hosts
            .insert("game.local".to_string(), vec!["10.9.9.9".parse().unwrap()]);
        let created = driver
            .create_worlds(&WorldSetup {
                target: target("game.local"),
                ..setup(PlayType::Client, StreamingRole::Disabled)
            })
            .unwrap()
            .handles;
        assert!(driver
            .substrate()
            .calls
            .contains(&SubstrateCall::Connect(created[0], observed("10.9.9.9:7979"))));
    }

    #[test]
    fn test_start_worlds_selects_by_play_type() {
        let mut driver = driver();
        let mut s = setup(PlayType::ClientAndServer, StreamingRole::Disabled);
        s.auto_start = false;
        s.auto_connect = false;
        let created = driver.create_worlds(&s).unwrap().handles;

        driver
            .start_worlds(StreamingRole::Disabled, PlayType::Server, false, &target("10.0.0.1"))
            .unwrap();
        assert_eq!(driver.substrate().schedulable(), vec![created[1]]);
    }

    #[test]
    fn test_stop_existing_and_unknown() {
        let mut driver = driver();
        let created = driver
            .create_worlds(&setup(PlayType::Server, StreamingRole::Disabled))
            .unwrap()
            .handles;

        assert!(driver.handle_world_action(SERVER_WORLD, "127.0.0.1", 7979, WorldAction::Stop));
        assert!(driver.substrate().calls.contains(&SubstrateCall::Shutdown(created[0])));
        assert!(driver.find_world(SERVER_WORLD).unwrap().stopped);

        let before = driver.substrate().calls.len();
        assert!(!driver.handle_world_action("NoSuchWorld", "127.0.0.1", 7979, WorldAction::Stop));
        assert_eq!(driver.substrate().calls.len(), before);

        // Repeated stop finds the stopped world and does nothing more
        assert!(driver.handle_world_action(SERVER_WORLD, "127.0.0.1", 7979, WorldAction::Stop));
        assert_eq!(driver.substrate().calls.len(), before);
    }

    #[test]
    fn test_connect_action_substitutes_loopback() {
        let mut driver = driver();
        let mut s = setup(PlayType::Client, StreamingRole::Disabled);
        s.auto_connect = false;
        let created = driver.create_worlds(&s).unwrap().handles;

        assert!(driver.handle_world_action(CLIENT_WORLD, "127.0.0.1", 7979, WorldAction::Connect));
        assert!(driver
            .substrate()
            .calls
            .contains(&SubstrateCall::Connect(created[0], observed("192.168.1.10:7979"))));
    }

    #[test]
    fn test_connect_action_on_guest_builds_signaling_url() {
        let mut driver = driver();
        let mut s = setup(PlayType::Client, StreamingRole::Guest);
        s.auto_connect = false;
        let created = driver.create_worlds(&s).unwrap().handles;

        driver.handle_world_action(STREAMING_GUEST_WORLD, "10.0.0.7", 7981, WorldAction::Connect);
        driver.handle_world_action(STREAMING_GUEST_WORLD, "127.0.0.1", 7981, WorldAction::Connect);

        let calls = &driver.substrate().calls;
        assert!(calls.contains(&SubstrateCall::Signaling(created[0], "ws://10.0.0.7:7981".to_string())));
        assert!(calls.contains(&SubstrateCall::Signaling(
            created[0],
            "ws://192.168.1.10:7981".to_string()
        )));
    }

    #[test]
    fn test_config_message_with_source_from_loopback() {
        let mut driver = driver();
        let msg = ConfigMessage {
            node_id: NodeId(0),
            actions: ConfigActions::from_mode(InitializationMode::Connect),
            world_name: "Client".to_string(),
            world_type: WorldType::Client,
            streaming_role: StreamingRole::Disabled,
            server_addr: SOURCE_ADDRESS.to_string(),
            server_port: 7979,
            signaling_addr: SOURCE_ADDRESS.to_string(),
            num_simulated_clients: 0,
            emulation_type: EmulationType::Playback,
        };

        let created = driver.apply_config_message(&msg, observed("127.0.0.1:7980")).unwrap().handles;
        assert_eq!(created.len(), 1);
        let calls = &driver.substrate().calls;
        assert!(calls.contains(&SubstrateCall::Connect(created[0], observed("192.168.1.10:7979"))));
        assert!(calls.contains(&SubstrateCall::Emulation(created[0], EmulationType::Playback)));
    }

    #[test]
    fn test_config_message_without_world_type_is_ignored() {
        let mut driver = driver();
        let msg = ConfigMessage {
            node_id: NodeId(0),
            actions: ConfigActions::from_mode(InitializationMode::Connect),
            world_name: "Ghost".to_string(),
            world_type: WorldType::Unspecified,
            streaming_role: StreamingRole::Disabled,
            server_addr: "10.0.0.1".to_string(),
            server_port: 7979,
            signaling_addr: String::new(),
            num_simulated_clients: 0,
            emulation_type: EmulationType::Idle,
        };
        assert!(driver.apply_config_message(&msg, observed("10.0.0.1:7980")).unwrap().handles.is_empty());
        assert!(driver.worlds().is_empty());
    }

    #[test]
    fn test_start_only_message_does_not_create() {
        let mut driver = driver();
        let mut s = setup(PlayType::Server, StreamingRole::Disabled);
        s.auto_start = false;
        s.auto_connect = false;
        let created = driver.create_worlds(&s).unwrap().handles;

        let msg = ConfigMessage {
            node_id: NodeId(0),
            actions: ConfigActions {
                create: false,
                start: true,
                connect: false,
            },
            world_name: SERVER_WORLD.to_string(),
            world_type: WorldType::Server,
            streaming_role: StreamingRole::Disabled,
            server_addr: "10.0.0.1".to_string(),
            server_port: 7979,
            signaling_addr: String::new(),
            num_simulated_clients: 0,
            emulation_type: EmulationType::Idle,
        };
        assert!(driver.apply_config_message(&msg, observed("10.0.0.1:7980")).unwrap().handles.is_empty());
        assert_eq!(driver.worlds().len(), 1);
        assert_eq!(driver.substrate().schedulable(), created);
    }

    #[test]
    fn test_content_load_skips_streamed_guests() {
        let mut driver = driver();
        let guest = driver
            .create_worlds(&setup(PlayType::StreamedClient, StreamingRole::Disabled))
            .unwrap()
            .handles;
        let server = driver
            .create_worlds(&setup(PlayType::Server, StreamingRole::Disabled))
            .unwrap()
            .handles;

        assert_eq!(driver.request_content_load(&guest), 0);
        assert_eq!(driver.request_content_load(&server), 1);
        assert!(driver.substrate().calls.contains(&SubstrateCall::ContentLoad(server[0])));
    }

    #[test]
    fn test_play_type_parsing() {
        assert_eq!("ServerAndClient".parse::<PlayType>(), Ok(PlayType::ClientAndServer));
        assert_eq!("GuestClient".parse::<PlayType>(), Ok(PlayType::StreamedClient));
        assert_eq!("SimulatedClients".parse::<PlayType>(), Ok(PlayType::SimulatedClient));
        assert!("spectator".parse::<PlayType>().is_err());
    }
}
