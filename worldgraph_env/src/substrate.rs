//! Boundary to the simulation substrate that actually runs worlds.
//!
//! The orchestrator never simulates anything itself. It asks the
//! substrate to allocate a world, to put it on the update list, to attach
//! connect/listen intents, and to tear it down again.

use crate::error::EnvError;
use crate::types::WorldHandle;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// What a world is, as far as connection handling is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorldRole {
    /// Regular game client
    Client,
    /// Client that also hosts streamed guests
    HostClient,
    /// Headless client that hosts streamed guests
    CloudHostClient,
    /// Thin client receiving a video stream over signaling
    StreamedClient,
    /// Synthetic load-generating client
    SimulatedClient,
    /// Game server
    Server,
}

impl WorldRole {
    /// True for every role that joins a game server as a client.
    pub fn is_client(&self) -> bool {
        !matches!(self, WorldRole::Server)
    }

    pub fn is_server(&self) -> bool {
        matches!(self, WorldRole::Server)
    }

    pub fn is_simulated_client(&self) -> bool {
        matches!(self, WorldRole::SimulatedClient)
    }

    pub fn is_streamed_client(&self) -> bool {
        matches!(self, WorldRole::StreamedClient)
    }

    /// True for clients that serve a stream to guests.
    pub fn is_streaming_host(&self) -> bool {
        matches!(self, WorldRole::HostClient | WorldRole::CloudHostClient)
    }

    /// Client, host, or cloud host: a client that is neither simulated nor streamed.
    pub fn is_regular_client(&self) -> bool {
        self.is_client() && !self.is_simulated_client() && !self.is_streamed_client()
    }
}

impl std::fmt::Display for WorldRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorldRole::Client => "client",
            WorldRole::HostClient => "host-client",
            WorldRole::CloudHostClient => "cloud-host-client",
            WorldRole::StreamedClient => "streamed-client",
            WorldRole::SimulatedClient => "simulated-client",
            WorldRole::Server => "server",
        };
        f.write_str(name)
    }
}

/// Player emulation behaviour attached to a client world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmulationType {
    #[default]
    #[serde(alias = "None")]
    Idle,
    Playback,
    Simulation,
    Record,
}

/// The simulation substrate seen by the world lifecycle driver.
///
/// Every call is an intent; none of them may block. Shutdown in
/// particular is advisory: the substrate reaps the world on a later tick.
pub trait WorldSubstrate: Send + 'static {
    /// Allocates a world. It does not run until marked schedulable.
    fn create_world(&mut self, name: &str, role: WorldRole) -> WorldHandle;

    /// Adds the world to the update list. Idempotent.
    fn mark_schedulable(&mut self, world: WorldHandle);

    /// Attaches a game connection request to the world.
    fn request_connect(&mut self, world: WorldHandle, endpoint: SocketAddr);

    /// Attaches a listen request to the world.
    fn request_listen(&mut self, world: WorldHandle, endpoint: SocketAddr);

    /// Attaches a streaming signaling connection request to the world.
    fn request_signaling_connect(&mut self, world: WorldHandle, url: &str);

    /// Marks the world for asynchronous shutdown.
    fn mark_for_shutdown(&mut self, world: WorldHandle);

    /// Delays the world's join by `delay` once it starts running.
    fn set_join_delay(&mut self, world: WorldHandle, delay: Duration);

    /// Selects the player emulation behaviour of a client world.
    fn set_emulation(&mut self, world: WorldHandle, emulation: EmulationType);

    /// Asks the substrate to load game content into the world.
    fn request_content_load(&mut self, world: WorldHandle);

    /// Asks the whole process to exit.
    fn request_shutdown(&mut self);

    /// Resolves a hostname to its addresses.
    ///
    /// The default goes through the platform resolver.
    fn resolve_hostname(&self, host: &str) -> Result<Vec<IpAddr>, EnvError> {
        let addrs = (host, 0u16)
            .to_socket_addrs()
            .map_err(|_| EnvError::resolution(host))?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}
