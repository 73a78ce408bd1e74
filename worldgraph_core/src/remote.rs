//! Ad-hoc remote control endpoint.
//!
//! An HTTP listener on its own task accepts `POST /` with a JSON body,
//! answers 204 and pushes the request into an unbounded channel. The tick
//! loop drains the channel once per tick and applies each request through
//! the driver, so the listener never touches world state.

use crate::config::DEFAULT_SIGNALING_URL;
use crate::driver::{ConnectTarget, PlayType, WorldLifecycleDriver, WorldSetup, STREAMING_GUEST_WORLD};
use crate::graph::{StreamingRole, WorldAction};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, info, warn};
use worldgraph_env::{EmulationType, WorldSubstrate};

fn default_number_of_clients() -> u32 {
    1
}

fn default_signaling_url() -> String {
    DEFAULT_SIGNALING_URL.to_string()
}

/// Body of a remote deployment request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDeploymentRequest {
    pub role: String,
    pub ipv4: String,
    pub port: u16,
    #[serde(default = "default_number_of_clients")]
    pub number_of_clients: u32,
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteControlError {
    #[error("bind error: {0}")]
    Bind(String),

    #[error("serve error: {0}")]
    Serve(String),
}

/// Consumer end of the hand-off; owned by the tick loop.
pub struct RemoteControlQueue {
    rx: UnboundedReceiver<RemoteDeploymentRequest>,
}

impl RemoteControlQueue {
    /// Everything queued since the last drain, in arrival order.
    pub fn drain(&mut self) -> Vec<RemoteDeploymentRequest> {
        let mut requests = Vec::new();
        while let Ok(request) = self.rx.try_recv() {
            requests.push(request);
        }
        requests
    }
}

pub fn remote_control_channel() -> (UnboundedSender<RemoteDeploymentRequest>, RemoteControlQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, RemoteControlQueue { rx })
}

async fn deploy(
    State(tx): State<UnboundedSender<RemoteDeploymentRequest>>,
    Json(request): Json<RemoteDeploymentRequest>,
) -> StatusCode {
    info!("Remote deployment request: role {} -> {}:{}", request.role, request.ipv4, request.port);
    match tx.send(request) {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Router for the remote control endpoint.
pub fn build_router(tx: UnboundedSender<RemoteDeploymentRequest>) -> Router {
    Router::new().route("/", post(deploy)).with_state(tx)
}

/// Serves the endpoint on `0.0.0.0:port` until the process ends.
pub async fn start_server(
    port: u16,
    tx: UnboundedSender<RemoteDeploymentRequest>,
) -> Result<(), RemoteControlError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| RemoteControlError::Bind(format!("bind failed on {addr}: {e}")))?;

    info!(%addr, "Remote control listening");

    axum::serve(listener, build_router(tx))
        .await
        .map_err(|e| RemoteControlError::Serve(e.to_string()))
}

/// Applies one drained request.
///
/// `"client"` swaps the streamed guest for a regular client connected to
/// the given server. `"thinClient"` needs nothing on this side.
pub fn apply_remote_request<S: WorldSubstrate>(
    driver: &mut WorldLifecycleDriver<S>,
    request: &RemoteDeploymentRequest,
) {
    match request.role.as_str() {
        "client" => {
            if !driver.handle_world_action(STREAMING_GUEST_WORLD, "", 0, WorldAction::Stop) {
                info!("No streaming guest world to stop");
            }
            let setup = WorldSetup {
                streaming_role: StreamingRole::Disabled,
                play_type: PlayType::Client,
                num_simulated_clients: request.number_of_clients,
                auto_start: true,
                auto_connect: true,
                target: ConnectTarget {
                    server_addr: request.ipv4.clone(),
                    server_port: request.port,
                    signaling_addr: request.signaling_url.clone(),
                },
                name: Some(request.role.clone()),
                emulation: EmulationType::Idle,
            };
            match driver.create_worlds(&setup) {
                Ok(created) => {
                    if let Some(e) = &created.connect_error {
                        error!("Remote deployment could not connect to {}: {}", request.ipv4, e);
                    }
                    driver.request_content_load(&created.handles);
                }
                Err(e) => error!("Remote deployment failed: {}", e),
            }
        }
        "thinClient" => {}
        other => warn!("Unsupported remote deployment role {}", other),
    }
}
