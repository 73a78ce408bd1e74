//! Process-wide orchestrator options.
//!
//! A plain struct with defaults; the CLI maps its arguments onto it and
//! nothing else discovers options at runtime.

use crate::driver::{DriverConfig, PlayType};
use crate::error::DeploymentError;
use crate::graph::{DeploymentGraph, StreamingRole};

use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use worldgraph_env::{EmulationType, NodeId};

/// Game server port.
pub const DEFAULT_SERVER_PORT: u16 = 7979;

/// Port the authority listens on for configuration requests.
pub const DEFAULT_DEPLOYMENT_PORT: u16 = 7980;

/// Streaming signaling port.
pub const DEFAULT_SIGNALING_PORT: u16 = 7981;

/// Ad-hoc remote control HTTP port.
pub const DEFAULT_REMOTE_CONTROL_PORT: u16 = 7982;

pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:7981";

/// Configuration for one orchestrator process.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// This node's id in the deployment graph
    pub deployment_id: Option<NodeId>,

    /// Fetch configuration from an authority instead of serving it
    pub remote_config: bool,

    /// Authority address used when `remote_config` is set. The embedding
    /// opens the transport connection to it.
    pub deployment_url: String,
    pub deployment_port: u16,

    /// Local play type, used when no graph entry applies
    pub play_type: PlayType,
    pub streaming_role: StreamingRole,
    pub num_simulated_clients: u32,
    pub emulation_type: EmulationType,

    /// Default game server address; also the loopback substitute
    pub server_url: String,
    pub server_port: u16,

    /// Default signaling URL; also the loopback substitute for streams
    pub signaling_url: String,

    /// Experiment duration; zero means unlimited
    pub duration: Duration,

    /// Offset for simulated client world names
    pub user_id: u32,

    /// Join delay step between consecutive simulated clients
    pub simulated_join_interval: Duration,

    /// Serve the ad-hoc HTTP endpoint on `remote_control_port`
    pub remote_control: bool,
    pub remote_control_port: u16,

    pub tick_rate_hz: u32,

    /// Deployment document loaded by the authority
    pub deployment_config: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            deployment_id: None,
            remote_config: false,
            deployment_url: "127.0.0.1".to_string(),
            deployment_port: DEFAULT_DEPLOYMENT_PORT,
            play_type: PlayType::ClientAndServer,
            streaming_role: StreamingRole::Disabled,
            num_simulated_clients: 0,
            emulation_type: EmulationType::Idle,
            server_url: "127.0.0.1".to_string(),
            server_port: DEFAULT_SERVER_PORT,
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            duration: Duration::ZERO,
            user_id: 0,
            simulated_join_interval: Duration::from_millis(500),
            remote_control: false,
            remote_control_port: DEFAULT_REMOTE_CONTROL_PORT,
            tick_rate_hz: 30,
            deployment_config: None,
        }
    }
}

impl OrchestratorConfig {
    /// Applies the start-up sanity rules.
    ///
    /// - remote configuration without an id uses id 0
    /// - a server-only process never streams
    pub fn sanitize(mut self) -> Self {
        if self.remote_config && self.deployment_id.is_none() {
            warn!("Remote configuration requested without a deployment id, using 0");
            self.deployment_id = Some(NodeId(0));
        }
        if self.play_type == PlayType::Server && self.streaming_role != StreamingRole::Disabled {
            warn!(
                "Streaming role {:?} has no effect on a server, disabling streaming",
                self.streaming_role
            );
            self.streaming_role = StreamingRole::Disabled;
        }
        if self.tick_rate_hz == 0 {
            warn!("Tick rate of 0 Hz requested, using 30 Hz");
            self.tick_rate_hz = 30;
        }
        self
    }

    /// The id this node answers to; 0 when unset.
    pub fn local_id(&self) -> NodeId {
        self.deployment_id.unwrap_or_default()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64)
    }

    /// `host:port` of the authority a member fetches its configuration from.
    pub fn authority_addr(&self) -> String {
        format!("{}:{}", self.deployment_url, self.deployment_port)
    }

    /// Loads the deployment document, if one is configured.
    pub fn load_deployment(&self) -> Result<Option<DeploymentGraph>, DeploymentError> {
        match &self.deployment_config {
            Some(path) => {
                info!("Loading deployment document {}", path.display());
                DeploymentGraph::load(path).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            default_server_url: self.server_url.clone(),
            default_signaling_url: self.signaling_url.clone(),
            simulated_join_interval: self.simulated_join_interval,
            user_id: self.user_id,
        }
    }
}
