//! Configuration Receiver - the member's side of the protocol.
//!
//! Asks the authority for configuration once per connection, applies what
//! comes back through the driver, and executes world actions pushed by the
//! experiment timeline.

use crate::driver::WorldLifecycleDriver;
use crate::error::DeploymentError;
use crate::protocol::{ConfigError, ConfigErrorKind, ProtocolMessage, RequestConfig};

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use worldgraph_env::{ConnectionId, NetworkTransport, NodeId, WorldSubstrate};

pub struct ConfigReceiver {
    local_id: NodeId,

    /// Connections a request has already been sent on
    requested: HashSet<ConnectionId>,

    /// When the first configuration message arrived
    config_received_at: Option<Duration>,
}

impl ConfigReceiver {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            requested: HashSet::new(),
            config_received_at: None,
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn has_requested(&self, conn: ConnectionId) -> bool {
        self.requested.contains(&conn)
    }

    pub fn config_received_at(&self) -> Option<Duration> {
        self.config_received_at
    }

    /// Sends one `RequestConfig` on every connection that has not had one.
    ///
    /// A failed send leaves the connection unmarked so the next tick tries
    /// again. Returns the number of requests sent.
    pub fn poll_connections<N: NetworkTransport>(&mut self, net: &N, now: Duration) -> usize {
        let mut sent = 0;
        for conn in net.connections() {
            if self.requested.contains(&conn) {
                continue;
            }
            let request = ProtocolMessage::RequestConfig(RequestConfig { node_id: self.local_id });
            match send(net, conn, &request, now) {
                Ok(()) => {
                    info!("Sent configuration request for node {} on {}", self.local_id, conn);
                    self.requested.insert(conn);
                    sent += 1;
                }
                Err(e) => warn!("Failed to send configuration request on {}: {}", conn, e),
            }
        }
        sent
    }

    /// Handles one message from the authority.
    pub fn handle_message<S: WorldSubstrate, N: NetworkTransport>(
        &mut self,
        conn: ConnectionId,
        msg: ProtocolMessage,
        observed: SocketAddr,
        driver: &mut WorldLifecycleDriver<S>,
        net: &N,
        now: Duration,
    ) {
        match msg {
            ProtocolMessage::Config(config) => {
                if self.config_received_at.is_none() {
                    self.config_received_at = Some(now);
                }
                info!(
                    "Received configuration for world {} ({:?})",
                    config.world_name, config.world_type
                );
                match driver.apply_config_message(&config, observed) {
                    Ok(created) => {
                        if let Some(e) = &created.connect_error {
                            error!("Failed to connect worlds for {}: {}", config.world_name, e);
                        }
                        let loads = driver.request_content_load(&created.handles);
                        debug!("Requested content load for {} worlds", loads);
                    }
                    Err(e) => error!("Failed to apply configuration for {}: {}", config.world_name, e),
                }
            }
            ProtocolMessage::WorldAction(action) => {
                if !driver.apply_world_action_message(&action, observed) {
                    warn!("World action for unknown world {}", action.world_name);
                    let reply = ProtocolMessage::ConfigError(ConfigError {
                        node_id: self.local_id,
                        error_type: ConfigErrorKind::UnknownWorld,
                    });
                    if let Err(e) = send(net, conn, &reply, now) {
                        warn!("Failed to send UnknownWorld reply on {}: {}", conn, e);
                    }
                }
            }
            ProtocolMessage::ConfigError(err) => {
                error!("Configuration error for node {}: {}", err.node_id, err.error_type);
            }
            ProtocolMessage::RequestConfig(req) => {
                debug!("Ignoring configuration request from node {} on a member", req.node_id);
            }
        }
    }

    /// True once strictly more than `duration` has passed since the first
    /// configuration arrived. A zero duration never expires.
    pub fn duration_expired(&self, now: Duration, duration: Duration) -> bool {
        if duration.is_zero() {
            return false;
        }
        self.config_received_at
            .map(|at| now.saturating_sub(at) > duration)
            .unwrap_or(false)
    }
}

pub(crate) fn send<N: NetworkTransport>(
    net: &N,
    conn: ConnectionId,
    msg: &ProtocolMessage,
    now: Duration,
) -> Result<(), DeploymentError> {
    let envelope = msg.encode(now.as_millis() as u64)?;
    net.send(conn, envelope)?;
    Ok(())
}
