//! JSON exporter for scenario timelines.
//!
//! Writes one scenario run (result, traffic counters and every substrate
//! event) as a pretty-printed JSON document.

use crate::runner::{ScenarioMetrics, ScenarioResult};
use crate::substrate::TimedEvent;

use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// Complete simulation export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    pub metrics: ScenarioMetrics,

    /// Substrate events in time order
    pub events: Vec<TimedEvent>,

    #[serde(skip)]
    written: bool,
}

impl SimExport {
    /// Creates an empty export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            passed: false,
            failure_reason: None,
            metrics: ScenarioMetrics::default(),
            events: Vec::new(),
            written: false,
        }
    }

    pub fn from_result(result: &ScenarioResult) -> Self {
        Self {
            scenario: result.scenario.name().to_string(),
            seed: result.seed,
            duration_sec: result.final_time_secs,
            passed: result.passed,
            failure_reason: result.failure_reason.clone(),
            metrics: result.metrics.clone(),
            events: result.timeline.clone(),
            written: false,
        }
    }

    /// Appends an event and moves the export's duration forward to it.
    pub fn add_event(&mut self, event: TimedEvent) {
        self.duration_sec = self.duration_sec.max(event.time_ms as f64 / 1000.0);
        self.events.push(event);
    }

    pub fn is_written(&self) -> bool {
        self.written
    }

    /// Writes to a JSON file.
    ///
    /// An export is written at most once. Later calls leave the file alone
    /// and return `Ok(false)`.
    pub fn write_to_file(&mut self, path: impl AsRef<Path>) -> std::io::Result<bool> {
        let path = path.as_ref();
        if self.written {
            warn!("Export for {} already written, not writing {}", self.scenario, path.display());
            return Ok(false);
        }

        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        self.written = true;
        info!("Exported {} events to {}", self.events.len(), path.display());
        Ok(true)
    }
}
