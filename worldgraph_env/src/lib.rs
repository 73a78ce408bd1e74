//! worldgraph Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seams that let the deployment
//! orchestrator run unchanged against **Production** (tokio, a real
//! netcode transport, a real simulation substrate) and **Simulation**
//! (virtual clock, routed in-memory transport, recording substrate).
//!
//! # Core Concept: The Reactor Pattern
//!
//! The orchestrator is a per-tick state machine. Everything it touches
//! outside its own memory goes through one of three traits:
//! - Time (`now()`, `sleep()`) via [`DeploymentContext`]
//! - Network (`send()`, `try_recv()`, `remote_endpoint()`) via [`NetworkTransport`]
//! - Worlds (`create_world()`, `request_connect()`, ...) via [`WorldSubstrate`]
//!
//! None of these calls may block the tick.
//!
//! # Example
//!
//! ```ignore
//! use worldgraph_env::{DeploymentContext, NetworkTransport};
//!
//! async fn tick_loop<Ctx: DeploymentContext, Net: NetworkTransport>(ctx: &Ctx, net: &Net) {
//!     loop {
//!         while let Some((conn, packet)) = net.try_recv() {
//!             handle_packet(conn, packet);
//!         }
//!         ctx.sleep(Duration::from_millis(33)).await;
//!     }
//! }
//! ```

mod context;
mod error;
mod network;
mod substrate;
mod tokio_impl;
mod types;

pub use context::DeploymentContext;
pub use error::EnvError;
pub use network::{NetworkController, NetworkTransport};
pub use substrate::{EmulationType, WorldRole, WorldSubstrate};
pub use tokio_impl::TokioContext;
pub use types::{ConnectionId, NodeId, PacketEnvelope, WorldHandle};
