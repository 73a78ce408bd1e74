//! Deployment Runtime - the per-process tick loop.
//!
//! Wires the environment (clock, transport, substrate) to the protocol
//! side this process plays and runs everything from one thread, one pass
//! per tick.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     DeploymentRuntime                        │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  Context: DeploymentContext   Network: NetworkTransport │  │
//! │  │  • now() → protocol timestamps, experiment clock       │  │
//! │  │  • sleep() → tick rate control                         │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │           │                                │                 │
//! │  ┌────────────────────┐          ┌────────────────────┐      │
//! │  │ Authority          │    or    │ Member             │      │
//! │  │  ConfigService     │          │  ConfigReceiver    │      │
//! │  │  ExperimentSched.  │          │                    │      │
//! │  └────────────────────┘          └────────────────────┘      │
//! │           │                                │                 │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │      WorldLifecycleDriver ──► WorldSubstrate           │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │           ▲                                                  │
//! │   RemoteControlQueue (drained once per tick)                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use crate::config::OrchestratorConfig;
use crate::driver::WorldLifecycleDriver;
use crate::graph::DeploymentGraph;
use crate::protocol::ProtocolMessage;
use crate::receiver::{send, ConfigReceiver};
use crate::remote::{apply_remote_request, remote_control_channel, start_server, RemoteControlQueue};
use crate::scheduler::{DispatchTarget, ExperimentScheduler};
use crate::service::{loopback_source, ConfigService};

use std::sync::Arc;
use tracing::{debug, error, info, warn};
use worldgraph_env::{DeploymentContext, NetworkTransport, WorldSubstrate};

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Running,
    ShutdownRequested,
}

enum NodeRole {
    Authority {
        service: ConfigService,
        scheduler: ExperimentScheduler,
    },
    Member(ConfigReceiver),
}

pub struct DeploymentRuntime<Ctx, Net, S>
where
    Ctx: DeploymentContext,
    Net: NetworkTransport,
    S: WorldSubstrate,
{
    context: Arc<Ctx>,
    network: Arc<Net>,
    driver: WorldLifecycleDriver<S>,
    role: NodeRole,
    remote: Option<RemoteControlQueue>,
    config: OrchestratorConfig,
    tick_count: u64,
    shutdown: bool,
}

impl<Ctx, Net, S> DeploymentRuntime<Ctx, Net, S>
where
    Ctx: DeploymentContext,
    Net: NetworkTransport,
    S: WorldSubstrate,
{
    /// A process that serves the deployment graph.
    pub fn authority(
        context: Arc<Ctx>,
        network: Arc<Net>,
        substrate: S,
        graph: DeploymentGraph,
        config: OrchestratorConfig,
    ) -> Self {
        let local_id = config.local_id();
        let scheduler = ExperimentScheduler::new(local_id, config.server_url.clone(), config.server_port);
        let role = NodeRole::Authority {
            service: ConfigService::new(local_id, graph),
            scheduler,
        };
        Self::with_role(context, network, substrate, role, config)
    }

    /// A process that fetches its configuration from an authority.
    pub fn member(context: Arc<Ctx>, network: Arc<Net>, substrate: S, config: OrchestratorConfig) -> Self {
        info!(
            "Node {} fetching configuration from authority at {}",
            config.local_id(),
            config.authority_addr()
        );
        let role = NodeRole::Member(ConfigReceiver::new(config.local_id()));
        Self::with_role(context, network, substrate, role, config)
    }

    fn with_role(
        context: Arc<Ctx>,
        network: Arc<Net>,
        substrate: S,
        role: NodeRole,
        config: OrchestratorConfig,
    ) -> Self {
        let mut runtime = Self {
            context,
            network,
            driver: WorldLifecycleDriver::new(substrate, config.driver_config()),
            role,
            remote: None,
            config,
            tick_count: 0,
            shutdown: false,
        };
        if runtime.config.remote_control {
            runtime.start_remote_control();
        }
        runtime
    }

    /// Spawns the HTTP listener on `remote_control_port` and drains its
    /// requests on every tick. Must be called inside a tokio runtime.
    fn start_remote_control(&mut self) {
        let (tx, queue) = remote_control_channel();
        let port = self.config.remote_control_port;
        self.context.spawn("remote-control", async move {
            if let Err(e) = start_server(port, tx).await {
                error!("Remote control endpoint on port {} stopped: {}", port, e);
            }
        });
        self.remote = Some(queue);
    }

    pub fn with_remote_control(mut self, queue: RemoteControlQueue) -> Self {
        self.remote = Some(queue);
        self
    }

    pub fn driver(&self) -> &WorldLifecycleDriver<S> {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut WorldLifecycleDriver<S> {
        &mut self.driver
    }

    /// The configuration service, on an authority.
    pub fn service(&self) -> Option<&ConfigService> {
        match &self.role {
            NodeRole::Authority { service, .. } => Some(service),
            NodeRole::Member(_) => None,
        }
    }

    /// The configuration receiver, on a member.
    pub fn receiver(&self) -> Option<&ConfigReceiver> {
        match &self.role {
            NodeRole::Member(receiver) => Some(receiver),
            NodeRole::Authority { .. } => None,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Runs one pass: remote control, protocol traffic, experiment timeline,
    /// duration check.
    pub fn tick(&mut self) -> TickStatus {
        if self.shutdown {
            return TickStatus::ShutdownRequested;
        }
        self.tick_count += 1;
        let now = self.context.now();

        if let Some(queue) = self.remote.as_mut() {
            for request in queue.drain() {
                apply_remote_request(&mut self.driver, &request);
            }
        }

        let expired = match &mut self.role {
            NodeRole::Authority { service, scheduler } => {
                service.activate(&mut self.driver, &self.config);

                while let Some((conn, envelope)) = self.network.try_recv() {
                    let msg = match ProtocolMessage::decode(&envelope) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!("Dropping undecodable packet on {}: {}", conn, e);
                            continue;
                        }
                    };
                    match msg {
                        ProtocolMessage::RequestConfig(request) => {
                            let Some(observed) = self.network.remote_endpoint(conn) else {
                                warn!("Configuration request on closed connection {}", conn);
                                continue;
                            };
                            for reply in service.handle_request(conn, &request, observed) {
                                if let Err(e) = send(&*self.network, conn, &reply, now) {
                                    warn!("Failed to send {} on {}: {}", reply.kind(), conn, e);
                                }
                            }
                        }
                        ProtocolMessage::ConfigError(err) => {
                            warn!("Node {} reported {}", err.node_id, err.error_type);
                        }
                        other => debug!("Ignoring {} on the authority", other.kind()),
                    }
                }

                service.refresh(now);
                match service.elapsed(now) {
                    Some(elapsed) => {
                        for dispatch in scheduler.evaluate(service.graph_mut(), elapsed) {
                            match dispatch.target {
                                DispatchTarget::Local => {
                                    if !self
                                        .driver
                                        .apply_world_action_message(&dispatch.message, loopback_source())
                                    {
                                        warn!("Local world {} not found", dispatch.message.world_name);
                                    }
                                }
                                DispatchTarget::Remote(conn) => {
                                    let msg = ProtocolMessage::WorldAction(dispatch.message);
                                    if let Err(e) = send(&*self.network, conn, &msg, now) {
                                        warn!("Failed to send world action on {}: {}", conn, e);
                                    }
                                }
                            }
                        }
                        !self.config.duration.is_zero() && elapsed > self.config.duration
                    }
                    None => false,
                }
            }
            NodeRole::Member(receiver) => {
                receiver.poll_connections(&*self.network, now);

                while let Some((conn, envelope)) = self.network.try_recv() {
                    let msg = match ProtocolMessage::decode(&envelope) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!("Dropping undecodable packet on {}: {}", conn, e);
                            continue;
                        }
                    };
                    let Some(observed) = self.network.remote_endpoint(conn) else {
                        warn!("{} on closed connection {}", msg.kind(), conn);
                        continue;
                    };
                    receiver.handle_message(conn, msg, observed, &mut self.driver, &*self.network, now);
                }

                receiver.duration_expired(now, self.config.duration)
            }
        };

        if expired {
            info!("Experiment duration of {:?} elapsed, requesting shutdown", self.config.duration);
            self.driver.request_shutdown();
            self.shutdown = true;
            return TickStatus::ShutdownRequested;
        }
        TickStatus::Running
    }

    /// Ticks at the configured rate until shutdown is requested.
    pub async fn run(&mut self) {
        let interval = self.config.tick_interval();
        info!(
            "Deployment runtime for node {} running at {} Hz",
            self.config.local_id(),
            self.config.tick_rate_hz
        );
        while self.tick() == TickStatus::Running {
            self.context.sleep(interval).await;
        }
    }
}
