//! worldgraph Deterministic Simulation Testing (DST) Harness
//!
//! Runs whole deployments (one authority serving a deployment graph and
//! any number of member nodes fetching their configuration) inside a
//! single process, with every source of non-determinism under control:
//! - **Time**: a virtual clock shared by all nodes, advanced one tick at a time
//! - **Network**: a central router with partitions, per-link latency and seeded loss
//! - **Worlds**: a recording substrate that stamps every request with virtual time
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimContext (Virtual Clock + Seeded RNG)              │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                        │                            │
//! │  ┌────▼──────┐            ┌────▼────┐                       │
//! │  │ Authority │◄──────────►│ Member  │     ...               │
//! │  │  node 0   │   Router   │ node 1  │                       │
//! │  └────┬──────┘            └────┬────┘                       │
//! │       ▼                        ▼                            │
//! │  SimSubstrate             SimSubstrate   (timeline)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use worldgraph_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::Baseline);
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod network;
mod runner;
pub mod scenarios;
mod substrate;
mod world;

pub use context::SimContext;
pub use exporter::SimExport;
pub use network::{RoutedPacket, SimNetwork, SimNetworkController};
pub use runner::{DeploymentReport, NodeReport, ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use substrate::{SimSubstrate, SimWorldState, SubstrateEvent, TimedEvent};
pub use world::{NetworkMetrics, SimConfig, SimNode, SimRuntime, SimWorld};

#[cfg(test)]
mod proptests;
