//! Scenario runner - executes deployment test scenarios.

use crate::scenarios::ScenarioId;
use crate::substrate::{SimSubstrate, SubstrateEvent, TimedEvent};
use crate::world::{NetworkMetrics, SimConfig, SimWorld};

use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::{debug, info, warn};
use worldgraph_core::{DeploymentGraph, OrchestratorConfig};
use worldgraph_env::{NetworkController, NodeId, WorldRole};

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    #[serde(serialize_with = "serialize_scenario")]
    pub scenario: ScenarioId,
    pub seed: u64,
    pub passed: bool,
    pub total_ticks: u64,
    pub final_time_secs: f64,
    pub failure_reason: Option<String>,
    pub metrics: ScenarioMetrics,

    /// Every substrate event of the run, in time order
    #[serde(skip)]
    pub timeline: Vec<TimedEvent>,
}

fn serialize_scenario<S: serde::Serializer>(scenario: &ScenarioId, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(scenario.name())
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub network: NetworkMetrics,
    pub worlds_created: usize,
    pub worlds_stopped: usize,
}

impl ScenarioMetrics {
    fn collect(world: &SimWorld, timeline: &[TimedEvent]) -> Self {
        let count = |pred: fn(&SubstrateEvent) -> bool| timeline.iter().filter(|e| pred(&e.event)).count();
        Self {
            network: world.metrics.clone(),
            worlds_created: count(|e| matches!(e, SubstrateEvent::Created { .. })),
            worlds_stopped: count(|e| matches!(e, SubstrateEvent::Shutdown { .. })),
        }
    }

    /// Routed messages of one protocol kind.
    pub fn messages(&self, kind: &str) -> u64 {
        self.network.messages_by_kind.get(kind).copied().unwrap_or(0)
    }
}

/// Outcome of a dry run of an arbitrary deployment document.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    pub seed: u64,
    pub authority: NodeId,
    pub total_ticks: u64,
    pub final_time_secs: f64,
    pub all_connected: bool,
    pub actions_fired: usize,
    pub actions_total: usize,
    pub nodes: Vec<NodeReport>,
    pub metrics: NetworkMetrics,
    pub timeline: Vec<TimedEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub id: NodeId,
    pub ip: IpAddr,
    pub live_worlds: Vec<String>,
    pub stopped_worlds: Vec<String>,
}

/// Failed checks of one run.
#[derive(Default)]
struct Checks(Vec<String>);

impl Checks {
    fn check(&mut self, ok: bool, what: impl FnOnce() -> String) {
        if !ok {
            let what = what();
            warn!("  check failed: {}", what);
            self.0.push(what);
        }
    }

    fn reason(self) -> Option<String> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.join("; "))
        }
    }
}

fn node_ip(n: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
}

const SERVER_NODE: &str = r#"{ "nodeID": 0, "nodeIP": "10.0.0.1",
    "worldConfigs": [ { "worldName": "ServerWorld", "worldType": "Server",
                        "initializationMode": "Connect" } ] }"#;

fn client_node(id: u32) -> String {
    format!(
        r#"{{ "nodeID": {}, "nodeIP": "10.0.0.{}",
    "worldConfigs": [ {{ "worldName": "ClientWorld", "worldType": "Client",
                        "initializationMode": "Connect", "serverNodeID": 0 }} ] }}"#,
        id,
        id + 1
    )
}

/// One server on node 0 and `nodes - 1` clients, with the given experiment actions.
fn graph(nodes: u32, actions: &str) -> DeploymentGraph {
    let mut entries = vec![SERVER_NODE.to_string()];
    entries.extend((1..nodes).map(client_node));
    let text = format!(
        r#"{{ "nodes": [ {} ], "experimentActions": [ {} ] }}"#,
        entries.join(", "),
        actions
    );
    match DeploymentGraph::from_json_str(&text) {
        Ok(graph) => graph,
        Err(e) => {
            warn!("Built-in scenario graph failed to load: {}", e);
            DeploymentGraph::empty()
        }
    }
}

/// Runs deployment scenarios.
pub struct ScenarioRunner {
    seed: u64,
    tick_rate_hz: u32,

    /// Requested duration; scenarios extend it to what they need
    max_duration_secs: f64,

    /// Base options for every node of a dry run
    node_config: OrchestratorConfig,
}

impl ScenarioRunner {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            tick_rate_hz: 30,
            max_duration_secs: 10.0,
            node_config: OrchestratorConfig::default(),
        }
    }

    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz.max(1);
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    pub fn with_node_config(mut self, config: OrchestratorConfig) -> Self {
        self.node_config = config;
        self
    }

    fn world(&self) -> SimWorld {
        SimWorld::new(SimConfig {
            seed: self.seed,
            tick_rate_hz: self.tick_rate_hz,
            max_duration_secs: self.max_duration_secs,
        })
    }

    fn duration_for(&self, scenario: ScenarioId) -> f64 {
        self.max_duration_secs.max(scenario.min_duration_secs())
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let mut world = self.world();
        let mut checks = Checks::default();
        let duration = self.duration_for(scenario);

        let outcome = match scenario {
            ScenarioId::Baseline => self.run_baseline(&mut world, duration, &mut checks),
            ScenarioId::LateJoiner => self.run_late_joiner(&mut world, duration, &mut checks),
            ScenarioId::Churn => self.run_churn(&mut world, duration, &mut checks),
            ScenarioId::Partition => self.run_partition(&mut world, duration, &mut checks),
            ScenarioId::DuplicateId => self.run_duplicate_id(&mut world, duration, &mut checks),
            ScenarioId::ScaleOut => self.run_scale_out(&mut world, duration, &mut checks),
        };
        if let Err(e) = outcome {
            checks.check(false, || e);
        }

        let timeline = world.timeline();
        let metrics = ScenarioMetrics::collect(&world, &timeline);
        let failure_reason = checks.reason();
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            total_ticks: world.tick_count(),
            final_time_secs: world.time(),
            failure_reason,
            metrics,
            timeline,
        }
    }

    /// DST-001: Baseline - one server, one client, one timed stop.
    fn run_baseline(&self, world: &mut SimWorld, duration: f64, checks: &mut Checks) -> Result<(), String> {
        let graph = graph(
            2,
            r#"{ "delay": 5, "actions": [ { "nodeID": 1, "worldConfigIndices": [0], "actions": ["Stop"] } ] }"#,
        );
        world.spawn_authority(NodeId(0), node_ip(1), graph, OrchestratorConfig::default());
        world.spawn_member(NodeId(1), node_ip(2), OrchestratorConfig::default());
        world.connect(NodeId(1), NodeId(0));
        world.run_for(duration);

        let Some(started) = started_at(world) else {
            checks.check(false, || "experiment never started".to_string());
            return Ok(());
        };
        let member = substrate(world, 1)?;
        let authority = substrate(world, 0)?;

        checks.check(member.worlds_named("ClientWorld").len() == 1, || {
            "client world not created exactly once".to_string()
        });
        checks.check(
            authority
                .live_world("ServerWorld")
                .and_then(|w| w.listening_on)
                .map(|e| e.port() == 7979)
                .unwrap_or(false),
            || "server world not listening on 7979".to_string(),
        );
        match member.shutdown_time_ms("ClientWorld") {
            Some(t) => {
                let due = started.as_millis() as u64 + 5000;
                checks.check(t >= due && t <= due + 250, || {
                    format!("client stopped at {}ms, expected ~{}ms", t, due)
                });
            }
            None => checks.check(false, || "client world never stopped".to_string()),
        }
        let fired = world.metrics.messages_by_kind.get("WorldActionMessage").copied();
        checks.check(fired == Some(1), || format!("expected one world action, saw {:?}", fired));

        info!("✓ Baseline: started at {:?}", started);
        Ok(())
    }

    /// DST-002: LateJoiner - the clock waits for the last node.
    fn run_late_joiner(&self, world: &mut SimWorld, duration: f64, checks: &mut Checks) -> Result<(), String> {
        let graph = graph(
            3,
            r#"{ "delay": 1, "actions": [
                { "nodeID": 1, "worldConfigIndices": [0], "actions": ["Stop"] },
                { "nodeID": 2, "worldConfigIndices": [0], "actions": ["Stop"] } ] }"#,
        );
        world.spawn_authority(NodeId(0), node_ip(1), graph, OrchestratorConfig::default());
        world.spawn_member(NodeId(1), node_ip(2), OrchestratorConfig::default());
        world.spawn_member(NodeId(2), node_ip(3), OrchestratorConfig::default());
        world.connect(NodeId(1), NodeId(0));

        world.run_for(3.0);
        checks.check(started_at(world).is_none(), || {
            "experiment started before the last node joined".to_string()
        });
        checks.check(substrate(world, 1)?.shutdown_time_ms("ClientWorld").is_none(), || {
            "action fired before the last node joined".to_string()
        });

        info!("  ➕ Node 2 joins at t={:.1}s", world.time());
        world.connect(NodeId(2), NodeId(0));
        world.run_for(duration - 3.0);

        let Some(started) = started_at(world) else {
            checks.check(false, || "experiment never started".to_string());
            return Ok(());
        };
        checks.check(started >= Duration::from_secs(3), || {
            format!("experiment started at {:?}", started)
        });
        for id in [1, 2] {
            let stopped = substrate(world, id)?.shutdown_time_ms("ClientWorld");
            let due = started.as_millis() as u64 + 1000;
            checks.check(stopped.map(|t| t >= due).unwrap_or(false), || {
                format!("node {} client stopped at {:?}, due {}ms", id, stopped, due)
            });
        }
        Ok(())
    }

    /// DST-003: Churn - a reconnecting member is not configured twice.
    fn run_churn(&self, world: &mut SimWorld, duration: f64, checks: &mut Checks) -> Result<(), String> {
        world.spawn_authority(NodeId(0), node_ip(1), graph(2, ""), OrchestratorConfig::default());
        world.spawn_member(NodeId(1), node_ip(2), OrchestratorConfig::default());
        world.connect(NodeId(1), NodeId(0));
        world.run_for(1.0);

        info!("  ⚡ Node 1 reconnects at t={:.1}s", world.time());
        world.disconnect(NodeId(1), NodeId(0));
        world.connect(NodeId(1), NodeId(0));
        world.run_for(duration - 1.0);

        let metrics = &world.metrics;
        checks.check(metrics.messages_by_kind.get("RequestConfig") == Some(&2), || {
            "expected one request per connection".to_string()
        });
        checks.check(metrics.messages_by_kind.get("ConfigError") == Some(&1), || {
            "second request not rejected".to_string()
        });
        checks.check(substrate(world, 1)?.worlds_named("ClientWorld").len() == 1, || {
            "client world created twice".to_string()
        });
        Ok(())
    }

    /// DST-004: Partition - a lost world action is not retried.
    fn run_partition(&self, world: &mut SimWorld, duration: f64, checks: &mut Checks) -> Result<(), String> {
        let graph = graph(
            3,
            r#"{ "delay": 2, "actions": [
                { "nodeID": 1, "worldConfigIndices": [0], "actions": ["Stop"] },
                { "nodeID": 2, "worldConfigIndices": [0], "actions": ["Stop"] } ] }"#,
        );
        world.spawn_authority(NodeId(0), node_ip(1), graph, OrchestratorConfig::default());
        world.spawn_member(NodeId(1), node_ip(2), OrchestratorConfig::default());
        world.spawn_member(NodeId(2), node_ip(3), OrchestratorConfig::default());
        world.connect(NodeId(1), NodeId(0));
        world.connect(NodeId(2), NodeId(0));
        world.run_for(1.0);

        info!("  ⚡ Partitioning node 1 at t={:.1}s", world.time());
        world.network_controller.partition(&[NodeId(0)], &[NodeId(1)]);
        world.run_for(3.0);
        info!("  ✓ Healing partition at t={:.1}s", world.time());
        world.network_controller.heal_all();
        world.run_for(duration - 4.0);

        checks.check(substrate(world, 2)?.shutdown_time_ms("ClientWorld").is_some(), || {
            "reachable node did not stop".to_string()
        });
        checks.check(substrate(world, 1)?.live_world("ClientWorld").is_some(), || {
            "partitioned node stopped anyway".to_string()
        });
        let all_done = world
            .node(NodeId(0))
            .and_then(|n| n.runtime.service())
            .map(|s| s.graph().experiment_actions().iter().all(|a| a.done))
            .unwrap_or(false);
        checks.check(all_done, || "experiment action not marked done".to_string());
        checks.check(world.metrics.packets_dropped >= 1, || "nothing was dropped".to_string());
        Ok(())
    }

    /// DST-005: DuplicateId - the second claimant gets nothing.
    fn run_duplicate_id(&self, world: &mut SimWorld, duration: f64, checks: &mut Checks) -> Result<(), String> {
        let impostor = NodeId(101);
        world.spawn_authority(NodeId(0), node_ip(1), graph(2, ""), OrchestratorConfig::default());
        world.spawn_member(NodeId(1), node_ip(2), OrchestratorConfig::default());
        world.spawn_member(
            impostor,
            node_ip(4),
            OrchestratorConfig {
                deployment_id: Some(NodeId(1)),
                ..Default::default()
            },
        );
        world.connect(NodeId(1), NodeId(0));
        world.connect(impostor, NodeId(0));
        world.run_for(duration);

        checks.check(substrate(world, 1)?.live_world("ClientWorld").is_some(), || {
            "first claimant not configured".to_string()
        });
        checks.check(world.node(impostor).map(|n| n.substrate().live_count()) == Some(0), || {
            "second claimant created worlds".to_string()
        });
        checks.check(world.metrics.messages_by_kind.get("ConfigError") == Some(&1), || {
            "expected exactly one DuplicateID reply".to_string()
        });
        Ok(())
    }

    /// DST-006: ScaleOut - simulated clients and a member-side duration.
    fn run_scale_out(&self, world: &mut SimWorld, duration: f64, checks: &mut Checks) -> Result<(), String> {
        const CLIENTS: usize = 8;
        let text = format!(
            r#"{{
            "nodes": [
                {{ "nodeID": 0, "nodeIP": "10.0.0.1",
                  "worldConfigs": [ {{ "worldName": "ServerWorld", "worldType": "Server",
                                      "initializationMode": "Connect" }} ] }},
                {{ "nodeID": 1, "nodeIP": "10.0.0.2",
                  "worldConfigs": [ {{ "worldName": "SimulatedClientWorld_", "worldType": "SimulatedClient",
                                      "initializationMode": "Connect", "serverNodeID": 0,
                                      "numSimulatedClients": {} }} ] }}
            ]
        }}"#,
            CLIENTS
        );
        let graph = match DeploymentGraph::from_json_str(&text) {
            Ok(graph) => graph,
            Err(e) => {
                checks.check(false, || format!("graph failed to load: {}", e));
                return Ok(());
            }
        };
        world.spawn_authority(NodeId(0), node_ip(1), graph, OrchestratorConfig::default());
        world.spawn_member(
            NodeId(1),
            node_ip(2),
            OrchestratorConfig {
                duration: Duration::from_secs(3),
                ..Default::default()
            },
        );
        world.connect(NodeId(1), NodeId(0));
        world.run_for(duration);

        let member = substrate(world, 1)?;
        let clients: Vec<_> = member
            .worlds()
            .map(|(_, w)| w)
            .filter(|w| w.role == WorldRole::SimulatedClient)
            .collect();
        checks.check(clients.len() == CLIENTS, || {
            format!("expected {} simulated clients, got {}", CLIENTS, clients.len())
        });
        for (i, client) in clients.iter().enumerate() {
            checks.check(client.join_delay == Duration::from_millis(500) * i as u32, || {
                format!("{} has join delay {:?}", client.name, client.join_delay)
            });
            checks.check(client.connected_to.map(|e| e.to_string()) == Some("10.0.0.1:7979".to_string()), || {
                format!("{} connected to {:?}", client.name, client.connected_to)
            });
        }

        let configured = world
            .node(NodeId(1))
            .and_then(|n| n.runtime.receiver())
            .and_then(|r| r.config_received_at());
        let exited = member.events().iter().find_map(|e| match e.event {
            SubstrateEvent::ProcessExit => Some(e.time_ms),
            _ => None,
        });
        match (configured, exited) {
            (Some(at), Some(t)) => checks.check(t >= at.as_millis() as u64 + 3000, || {
                format!("member exited at {}ms, configured at {:?}", t, at)
            }),
            _ => checks.check(false, || "member did not exit after its duration".to_string()),
        }
        Ok(())
    }

    /// Dry-runs a deployment document.
    ///
    /// The lowest node id serves the graph; every other node connects at
    /// t=0. Nodes without a literal IP get a synthetic 10.0.0.x address.
    pub fn run_deployment(&self, graph: DeploymentGraph) -> DeploymentReport {
        let mut world = self.world();
        let mut ids: Vec<(NodeId, IpAddr)> = graph
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let ip = node
                    .ip_address
                    .as_deref()
                    .and_then(|ip| ip.parse().ok())
                    .unwrap_or_else(|| node_ip((i + 1).min(254) as u8));
                (node.id, ip)
            })
            .collect();
        ids.sort_by_key(|(id, _)| *id);

        let authority = ids.first().map(|(id, _)| *id).unwrap_or_default();
        let authority_ip = ids.first().map(|(_, ip)| *ip).unwrap_or_else(|| node_ip(1));
        let actions_total = graph.experiment_actions().len();

        let base = OrchestratorConfig {
            deployment_id: None,
            ..self.node_config.clone()
        };
        world.spawn_authority(authority, authority_ip, graph, base.clone());
        for (id, ip) in ids.iter().skip(1) {
            world.spawn_member(*id, *ip, base.clone());
            world.connect(*id, authority);
        }
        world.run_for(self.max_duration_secs);

        let service = world.node(authority).and_then(|n| n.runtime.service());
        let all_connected = service.map(|s| s.all_connected()).unwrap_or(false);
        let actions_fired = service
            .map(|s| s.graph().experiment_actions().iter().filter(|a| a.done).count())
            .unwrap_or(0);

        let nodes = world
            .nodes()
            .map(|node| {
                let (stopped, live): (Vec<_>, Vec<_>) =
                    node.substrate().worlds().map(|(_, w)| w).partition(|w| w.shutdown);
                NodeReport {
                    id: node.id,
                    ip: node.ip,
                    live_worlds: live.into_iter().map(|w| w.name.clone()).collect(),
                    stopped_worlds: stopped.into_iter().map(|w| w.name.clone()).collect(),
                }
            })
            .collect();

        DeploymentReport {
            seed: self.seed,
            authority,
            total_ticks: world.tick_count(),
            final_time_secs: world.time(),
            all_connected,
            actions_fired,
            actions_total,
            nodes,
            metrics: world.metrics.clone(),
            timeline: world.timeline(),
        }
    }
}

fn started_at(world: &SimWorld) -> Option<Duration> {
    world
        .node(NodeId(0))
        .and_then(|n| n.runtime.service())
        .and_then(|s| s.started_at())
}

fn substrate(world: &SimWorld, id: u32) -> Result<&SimSubstrate, String> {
    world
        .node(NodeId(id))
        .map(|node| node.substrate())
        .ok_or_else(|| format!("node {} was never spawned", id))
}
