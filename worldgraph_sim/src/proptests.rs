//! Property tests for the configuration protocol and the harness.

use crate::runner::ScenarioRunner;
use crate::scenarios::ScenarioId;

use proptest::prelude::*;
use std::net::SocketAddr;
use std::time::Duration;
use worldgraph_core::protocol::{substitute_source, ConfigErrorKind, RequestConfig};
use worldgraph_core::{ConfigService, DeploymentGraph, ExperimentScheduler, ProtocolMessage};
use worldgraph_env::{ConnectionId, NodeId};

/// Server on node 0, `clients` client nodes, and one Stop per client at `delay`.
fn star_graph(clients: u32, delay: u32) -> DeploymentGraph {
    let mut nodes = vec![r#"{ "nodeID": 0, "nodeIP": "10.0.0.1", "worldConfigs": [
        { "worldName": "ServerWorld", "worldType": "Server", "initializationMode": "Connect" } ] }"#
        .to_string()];
    let mut actions = Vec::new();
    for id in 1..=clients {
        nodes.push(format!(
            r#"{{ "nodeID": {id}, "worldConfigs": [
                {{ "worldName": "ClientWorld", "worldType": "Client",
                   "initializationMode": "Start", "serverNodeID": 0 }} ] }}"#
        ));
        actions.push(format!(
            r#"{{ "nodeID": {id}, "worldNames": ["ClientWorld"], "actions": ["Stop"] }}"#
        ));
    }
    let text = format!(
        r#"{{ "nodes": [ {} ], "experimentActions": [ {{ "delay": {}, "actions": [ {} ] }} ] }}"#,
        nodes.join(", "),
        delay,
        actions.join(", ")
    );
    DeploymentGraph::from_json_str(&text).unwrap()
}

fn observed(id: u32) -> SocketAddr {
    format!("10.0.{}.{}:41000", id / 250, id % 250 + 1).parse().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_config_messages_are_pure(clients in 1u32..8, target in 0u32..10) {
        let mut graph = star_graph(clients, 1);
        let first = graph.node_to_config_messages(NodeId(target));
        let second = graph.node_to_config_messages(NodeId(target));
        prop_assert_eq!(&first, &second);

        // Connection bookkeeping does not leak into the messages
        graph.set_connected(NodeId(target));
        prop_assert_eq!(graph.node_to_config_messages(NodeId(target)), first);
    }

    #[test]
    fn test_repeated_requests_are_duplicates(clients in 1u32..6, repeats in 1usize..6) {
        let mut service = ConfigService::new(NodeId(0), star_graph(clients, 1));
        let node = NodeId(clients);
        let request = RequestConfig { node_id: node };

        let first = service.handle_request(ConnectionId::from_seed(1), &request, observed(clients));
        prop_assert!(first.iter().all(|m| matches!(m, ProtocolMessage::Config(_))));

        for i in 0..repeats {
            let replies = service.handle_request(ConnectionId::from_seed(2 + i as u64), &request, observed(clients));
            prop_assert_eq!(replies.len(), 1);
            let is_duplicate = matches!(
                &replies[0],
                ProtocolMessage::ConfigError(e) if e.error_type == ConfigErrorKind::DuplicateId
            );
            prop_assert!(is_duplicate);
        }
    }

    #[test]
    fn test_experiment_actions_fire_once(
        clients in 1u32..5,
        delay in 0u32..4,
        steps in proptest::collection::vec(1u64..700, 1..40),
    ) {
        let mut graph = star_graph(clients, delay);
        for id in 0..=clients {
            graph.set_connected(NodeId(id));
            graph.set_endpoint(NodeId(id), observed(id), ConnectionId::from_seed(id as u64 + 1));
        }
        let scheduler = ExperimentScheduler::new(NodeId(0), "127.0.0.1", 7979);

        let mut elapsed = Duration::ZERO;
        let mut fired = 0;
        for step in steps {
            elapsed += Duration::from_millis(step);
            let dispatches = scheduler.evaluate(&mut graph, elapsed);
            if !dispatches.is_empty() {
                prop_assert!(elapsed.as_secs_f64() > delay as f64);
            }
            fired += dispatches.len();
            if elapsed.as_secs_f64() > delay as f64 {
                prop_assert!(graph.experiment_actions()[0].done);
            }
        }
        prop_assert!(fired == 0 || fired == clients as usize);
    }

    #[test]
    fn test_source_resolves_to_sender(a in 1u8..224, b: u8, c: u8, d in 1u8..255, port: u16) {
        prop_assume!(a != 127);
        let sender: SocketAddr = format!("{a}.{b}.{c}.{d}:{port}").parse().unwrap();
        prop_assert_eq!(substitute_source("source", sender, "192.0.2.10"), format!("{a}.{b}.{c}.{d}"));

        let local: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        prop_assert_eq!(substitute_source("source", local, "192.0.2.10"), "192.0.2.10");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(4))]

    #[test]
    fn test_same_seed_same_timeline(seed: u64) {
        let a = ScenarioRunner::new(seed).with_duration(0.0).run(ScenarioId::Churn);
        let b = ScenarioRunner::new(seed).with_duration(0.0).run(ScenarioId::Churn);
        prop_assert_eq!(a.timeline, b.timeline);
        prop_assert!(a.passed, "{:?}", a.failure_reason);
    }
}
