//! Deployment scenarios for DST.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// DST-001: server and one client, one timed stop
    Baseline,

    /// DST-002: the timeline waits for a node that joins late
    LateJoiner,

    /// DST-003: a member reconnects and asks again
    Churn,

    /// DST-004: a world action is lost to a partition
    Partition,

    /// DST-005: two processes claim the same node id
    DuplicateId,

    /// DST-006: simulated clients with staggered joins and a duration limit
    ScaleOut,
}

impl ScenarioId {
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Baseline,
            ScenarioId::LateJoiner,
            ScenarioId::Churn,
            ScenarioId::Partition,
            ScenarioId::DuplicateId,
            ScenarioId::ScaleOut,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "baseline",
            ScenarioId::LateJoiner => "late_joiner",
            ScenarioId::Churn => "churn",
            ScenarioId::Partition => "partition",
            ScenarioId::DuplicateId => "duplicate_id",
            ScenarioId::ScaleOut => "scale_out",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "Two nodes, each configured once, client world stopped 5s after start",
            ScenarioId::LateJoiner => "Third node joins at 3s; the experiment clock starts only then",
            ScenarioId::Churn => "Member reconnects after configuration and is answered DuplicateID",
            ScenarioId::Partition => "Member partitioned when its Stop fires; the batch is still done",
            ScenarioId::DuplicateId => "Second process with the same id is rejected and creates nothing",
            ScenarioId::ScaleOut => "Eight simulated clients join 500ms apart; member exits after its duration",
        }
    }

    /// Virtual time a scenario needs to reach its assertions.
    pub fn min_duration_secs(&self) -> f64 {
        match self {
            ScenarioId::Baseline => 8.0,
            ScenarioId::LateJoiner => 6.0,
            ScenarioId::Churn => 3.0,
            ScenarioId::Partition => 6.0,
            ScenarioId::DuplicateId => 2.0,
            ScenarioId::ScaleOut => 5.0,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "baseline" | "dst-001" => Ok(ScenarioId::Baseline),
            "late_joiner" | "latejoiner" | "dst-002" => Ok(ScenarioId::LateJoiner),
            "churn" | "dst-003" => Ok(ScenarioId::Churn),
            "partition" | "dst-004" => Ok(ScenarioId::Partition),
            "duplicate_id" | "duplicateid" | "dst-005" => Ok(ScenarioId::DuplicateId),
            "scale_out" | "scaleout" | "dst-006" => Ok(ScenarioId::ScaleOut),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
