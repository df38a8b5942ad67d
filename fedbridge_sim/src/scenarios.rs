//! Bridge scenarios run against the in-memory RTI.

use serde::Serialize;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// FB-001: Load → Loaded handshake, repeated load, control commands
    LoadHandshake,

    /// FB-002: Engine failure reported as ScenarioError
    LoadFailure,

    /// FB-003: A load for another federate leaves this one untouched
    ForeignLoad,

    /// FB-004: Withheld, delayed and contested name reservations
    ReservationTimeout,

    /// FB-005: Two regulating federates stepping with time-stamped traffic
    TimeStepping,

    /// FB-006: Undecodable, misaddressed and racing-unpublish traffic
    MalformedTraffic,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::LoadHandshake,
            ScenarioId::LoadFailure,
            ScenarioId::ForeignLoad,
            ScenarioId::ReservationTimeout,
            ScenarioId::TimeStepping,
            ScenarioId::MalformedTraffic,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::LoadHandshake => "load_handshake",
            ScenarioId::LoadFailure => "load_failure",
            ScenarioId::ForeignLoad => "foreign_load",
            ScenarioId::ReservationTimeout => "reservation_timeout",
            ScenarioId::TimeStepping => "time_stepping",
            ScenarioId::MalformedTraffic => "malformed_traffic",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::LoadHandshake => "Director loads fed-a; one ScenarioLoaded, engine started once",
            ScenarioId::LoadFailure => "Engine fails to prepare; ScenarioError carries the detail",
            ScenarioId::ForeignLoad => "Director loads fed-b; fed-a stays idle and silent",
            ScenarioId::ReservationTimeout => "No callback within 100ms; late and contested reservations",
            ScenarioId::TimeStepping => "Five lookahead steps; time-stamped ticks held until granted",
            ScenarioId::MalformedTraffic => "Bad payloads dropped without blocking a valid load",
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
            "load_handshake" | "fb-001" => Ok(ScenarioId::LoadHandshake),
            "load_failure" | "fb-002" => Ok(ScenarioId::LoadFailure),
            "foreign_load" | "fb-003" => Ok(ScenarioId::ForeignLoad),
            "reservation_timeout" | "fb-004" => Ok(ScenarioId::ReservationTimeout),
            "time_stepping" | "fb-005" => Ok(ScenarioId::TimeStepping),
            "malformed_traffic" | "fb-006" => Ok(ScenarioId::MalformedTraffic),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
