//! worldgraph DST Simulator CLI
//!
//! Run deployment scenarios deterministically, or dry-run a deployment
//! document on simulated nodes.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use worldgraph_core::config::DEFAULT_SERVER_PORT;
use worldgraph_core::OrchestratorConfig;
use worldgraph_sim::scenarios::ScenarioId;
use worldgraph_sim::{ScenarioResult, ScenarioRunner, SimExport};

/// worldgraph Deterministic Simulation Testing CLI
#[derive(Parser, Debug)]
#[command(name = "worldgraph-sim")]
#[command(about = "Run deterministic simulation tests for worldgraph deployments", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (baseline, late_joiner, churn, partition, duplicate_id, scale_out, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Simulation duration in seconds; scenarios extend it to their minimum
    #[arg(short, long, default_value = "10")]
    duration: f64,

    /// Simulation tick rate in Hz
    #[arg(long, default_value = "30")]
    tick_rate: u32,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the scenario timeline to a JSON file
    #[arg(long)]
    export: Option<PathBuf>,

    /// Dry-run this deployment document instead of the built-in scenarios
    #[arg(long)]
    deployment: Option<PathBuf>,

    /// Default game server address for dry-run nodes
    #[arg(long, default_value = "127.0.0.1")]
    server_url: String,

    /// Default game server port for dry-run nodes
    #[arg(long, default_value_t = DEFAULT_SERVER_PORT)]
    server_port: u16,

    /// Member-side experiment duration in seconds for dry-run nodes (0 = unlimited)
    #[arg(long, default_value = "0")]
    node_duration: u64,

    /// Offset for simulated client world names
    #[arg(long, default_value = "0")]
    user_id: u32,

    /// Join delay between consecutive simulated clients, in milliseconds
    #[arg(long, default_value = "500")]
    join_interval_ms: u64,
}

impl Args {
    fn node_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            server_url: self.server_url.clone(),
            server_port: self.server_port,
            duration: Duration::from_secs(self.node_duration),
            user_id: self.user_id,
            simulated_join_interval: Duration::from_millis(self.join_interval_ms),
            tick_rate_hz: self.tick_rate,
            deployment_config: self.deployment.clone(),
            ..Default::default()
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    if !args.json {
        info!("worldgraph DST Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .context("System clock before UNIX epoch")?
            .as_nanos() as u64
    } else {
        args.seed
    };

    if let Some(path) = &args.deployment {
        return dry_run(&args, path, base_seed);
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse::<ScenarioId>().map_err(anyhow::Error::msg)?]
    };

    if args.export.is_some() && (scenarios.len() > 1 || args.seeds > 1) {
        bail!("--export only supports a single scenario and seed");
    }

    // Run simulations
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed)
            .with_duration(args.duration)
            .with_tick_rate(args.tick_rate);

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if let Some(path) = &args.export {
                SimExport::from_result(&result)
                    .write_to_file(path)
                    .with_context(|| format!("Failed to write export to {}", path.display()))?;
            }

            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed_count,
            "failed": failed_count,
            "results": all_results,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            // List failed seeds
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn dry_run(args: &Args, path: &Path, seed: u64) -> Result<()> {
    let config = args.node_config();
    let graph = config
        .load_deployment()
        .with_context(|| format!("Failed to load deployment {}", path.display()))?
        .context("No deployment document configured")?;
    info!("Dry-running {} ({} nodes)", path.display(), graph.nodes().len());

    let report = ScenarioRunner::new(seed)
        .with_duration(args.duration)
        .with_tick_rate(args.tick_rate)
        .with_node_config(config)
        .run_deployment(graph);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    info!(
        "t={:.1}s all_connected={} actions={}/{}",
        report.final_time_secs, report.all_connected, report.actions_fired, report.actions_total
    );
    for node in &report.nodes {
        info!(
            "  node {} @ {}: live={:?} stopped={:?}",
            node.id, node.ip, node.live_worlds, node.stopped_worlds
        );
    }

    if let Some(export_path) = &args.export {
        let mut export = SimExport::new(&path.display().to_string(), seed);
        export.passed = report.all_connected && report.actions_fired == report.actions_total;
        export.metrics.network = report.metrics;
        for event in report.timeline {
            export.add_event(event);
        }
        export.write_to_file(export_path)?;
    }
    Ok(())
}
