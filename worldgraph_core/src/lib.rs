//! worldgraph core - deployment orchestration for multi-node world experiments
//!
//! One authority process holds a deployment graph: which node runs which
//! worlds, where servers live, and a timeline of world actions. Member
//! processes ask it for their configuration over the configuration
//! protocol, create their worlds through the lifecycle driver, and follow
//! the timeline as it fires.
//!
//! ```text
//!   deployment.json ──► DeploymentGraph
//!                            │
//!                      ConfigService ◄── RequestConfig ─── ConfigReceiver (member)
//!                            │      ─── ConfigMessage ──►        │
//!                   ExperimentScheduler ── WorldAction ──►       │
//!                            │                                   │
//!                  WorldLifecycleDriver              WorldLifecycleDriver
//!                            │                                   │
//!                      WorldSubstrate                      WorldSubstrate
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod graph;
pub mod protocol;
pub mod receiver;
pub mod remote;
pub mod runtime;
pub mod scheduler;
pub mod service;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use config::OrchestratorConfig;
pub use driver::{ConnectTarget, CreatedWorlds, PlayType, WorldLifecycleDriver, WorldSetup};
pub use error::DeploymentError;
pub use graph::{DeploymentGraph, WorldAction, WorldConfig};
pub use protocol::ProtocolMessage;
pub use receiver::ConfigReceiver;
pub use remote::{remote_control_channel, RemoteControlQueue, RemoteDeploymentRequest};
pub use runtime::{DeploymentRuntime, TickStatus};
pub use scheduler::ExperimentScheduler;
pub use service::ConfigService;
