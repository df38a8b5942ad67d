//! Bridge configuration.
//!
//! Everything is supplied at construction; nothing here is reconfigured at
//! runtime. Durations are stored in milliseconds so the JSON form stays
//! readable.

use fedbridge_env::{Lookahead, ResignAction};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Port the RTI listens on when none is configured.
pub const DEFAULT_RTI_PORT: u16 = 8989;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration JSON
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// A value is present but unusable
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Who this federate is and where its federation lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederateIdentity {
    /// Federation execution to join
    pub federation_name: String,

    /// This federate's name; also the scenario name it answers to
    pub federate_name: String,

    /// RTI host address
    pub rti_host: String,

    /// RTI port (default: 8989)
    #[serde(default = "default_rti_port")]
    pub rti_port: u16,

    /// FOM descriptor path handed to the RTI
    pub fom_path: String,
}

fn default_rti_port() -> u16 {
    DEFAULT_RTI_PORT
}

impl FederateIdentity {
    /// Creates an identity with the default RTI port.
    pub fn new(
        federation_name: impl Into<String>,
        federate_name: impl Into<String>,
        rti_host: impl Into<String>,
        fom_path: impl Into<String>,
    ) -> Self {
        Self {
            federation_name: federation_name.into(),
            federate_name: federate_name.into(),
            rti_host: rti_host.into(),
            rti_port: DEFAULT_RTI_PORT,
            fom_path: fom_path.into(),
        }
    }

    /// Returns the `host:port` address of the RTI.
    pub fn rti_address(&self) -> String {
        format!("{}:{}", self.rti_host, self.rti_port)
    }

    /// Returns true if `scenario` names this federate.
    ///
    /// Exact, case-sensitive comparison after trimming whitespace.
    pub fn answers_to(&self, scenario: &str) -> bool {
        scenario.trim() == self.federate_name
    }
}

/// Join retry policy for a federation that does not exist yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total join attempts before giving up (default: 5)
    pub max_attempts: u32,

    /// Delay before the second attempt (default: 200ms)
    pub initial_backoff_ms: u64,

    /// Upper bound for the doubling delay (default: 5s)
    pub max_backoff_ms: u64,

    /// Maximum random jitter added to each delay (default: 50ms)
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            jitter_ms: 50,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1`, without jitter.
    ///
    /// `attempt` counts from 1 for the first failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Complete configuration for one bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Federate identity
    pub identity: FederateIdentity,

    /// Lookahead interval (default: 1.0)
    pub lookahead: Lookahead,

    /// Join retry policy
    pub join_retry: RetryPolicy,

    /// Create the federation execution if joining finds none (default: false)
    pub create_if_missing: bool,

    /// Become time-regulating after join (default: true)
    pub time_regulating: bool,

    /// Become time-constrained after join (default: true)
    pub time_constrained: bool,

    /// Default wait for a name reservation callback (default: 2s)
    pub reservation_timeout_ms: u64,

    /// How long a timed-out reservation still absorbs its late answer
    /// before a newer request for the same name replaces it (default: 10s)
    pub reservation_grace_ms: u64,

    /// Wait for a time-advance grant (default: 10s)
    pub advance_timeout_ms: u64,

    /// Maximum time the engine may take to become ready (default: 30s)
    pub load_timeout_ms: u64,

    /// Engine status polling interval while loading (default: 100ms)
    pub engine_poll_interval_ms: u64,

    /// Capacity of the inbound interaction queue (default: 1024)
    pub inbound_queue_capacity: usize,

    /// Action taken on resign
    pub resign_action: ResignAction,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            identity: FederateIdentity::new("Federation", "federate", "localhost", "fom.xml"),
            lookahead: Lookahead::default(),
            join_retry: RetryPolicy::default(),
            create_if_missing: false,
            time_regulating: true,
            time_constrained: true,
            reservation_timeout_ms: 2_000,
            reservation_grace_ms: 10_000,
            advance_timeout_ms: 10_000,
            load_timeout_ms: 30_000,
            engine_poll_interval_ms: 100,
            inbound_queue_capacity: 1024,
            resign_action: ResignAction::default(),
        }
    }
}

impl BridgeConfig {
    /// Creates a default configuration for the given identity.
    pub fn for_identity(identity: FederateIdentity) -> Self {
        Self {
            identity,
            ..Self::default()
        }
    }

    /// Loads and validates a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let config: BridgeConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: display,
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the bridge cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.federate_name.trim().is_empty() {
            return Err(ConfigError::Invalid("federate_name is empty".into()));
        }
        if self.identity.federation_name.trim().is_empty() {
            return Err(ConfigError::Invalid("federation_name is empty".into()));
        }
        if !(self.lookahead.0.is_finite() && self.lookahead.0 > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "lookahead must be positive, got {}",
                self.lookahead.0
            )));
        }
        if self.join_retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("join_retry.max_attempts is 0".into()));
        }
        if self.inbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid("inbound_queue_capacity is 0".into()));
        }
        Ok(())
    }

    pub fn reservation_timeout(&self) -> Duration {
        Duration::from_millis(self.reservation_timeout_ms)
    }

    pub fn reservation_grace(&self) -> Duration {
        Duration::from_millis(self.reservation_grace_ms)
    }

    pub fn advance_timeout(&self) -> Duration {
        Duration::from_millis(self.advance_timeout_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn engine_poll_interval(&self) -> Duration {
        Duration::from_millis(self.engine_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rti_address_uses_default_port() {
        let identity = FederateIdentity::new("Exercise", "fed-a", "rti.local", "fom.xml");
        assert_eq!(identity.rti_address(), "rti.local:8989");
    }

    #[test]
    fn test_answers_to_is_exact() {
        let identity = FederateIdentity::new("Exercise", "fed-a", "rti.local", "fom.xml");
        assert!(identity.answers_to("fed-a"));
        assert!(identity.answers_to(" fed-a\n"));
        assert!(!identity.answers_to("fed-ab"));
        assert!(!identity.answers_to("FED-A"));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
            jitter_ms: 0,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_json_round_trip_with_defaults() {
        let json = r#"{
            "identity": {
                "federation_name": "Exercise",
                "federate_name": "fed-a",
                "rti_host": "10.0.0.5",
                "fom_path": "foms/control.xml"
            },
            "lookahead": 0.5
        }"#;
        let config: BridgeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.identity.rti_port, DEFAULT_RTI_PORT);
        assert_eq!(config.lookahead, Lookahead(0.5));
        assert_eq!(config.join_retry, RetryPolicy::default());
        assert_eq!(config.resign_action, ResignAction::DeleteObjectsThenDivest);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_lookahead() {
        let mut config = BridgeConfig::default();
        config.lookahead = Lookahead(0.0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_json_file_reports_missing_file() {
        let err = BridgeConfig::from_json_file("/nonexistent/bridge.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
