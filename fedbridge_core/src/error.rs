//! Error types for the federate bridge.

use fedbridge_env::{LogicalTime, RtiError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration rejected before any bus contact
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The RTI could not be reached
    #[error("Connect to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: RtiError,
    },

    /// Join failed after exhausting retries, or with a non-retryable error
    #[error("Join of {federation} failed after {attempts} attempt(s): {source}")]
    Join {
        federation: String,
        attempts: u32,
        #[source]
        source: RtiError,
    },

    /// A declared class, parameter or attribute name is missing from the FOM
    #[error("Failed to resolve {kind} '{name}': {source}")]
    Resolve {
        kind: &'static str,
        name: String,
        #[source]
        source: RtiError,
    },

    /// A registry lookup for a name that was never declared
    #[error("Name not declared in the class manifest: {0}")]
    UnknownName(String),

    /// A bus call failed at runtime
    #[error(transparent)]
    Rti(#[from] RtiError),

    /// An advance request in the wrong phase or to a non-increasing time
    #[error("Invalid time advance: {0}")]
    InvalidAdvance(String),

    /// A time-stamped send earlier than current time plus lookahead
    #[error("Timestamp {requested} is earlier than {earliest}")]
    InvalidTimestamp {
        requested: LogicalTime,
        earliest: LogicalTime,
    },

    /// No grant arrived within the bound
    #[error("Time advance to {0} not granted within {1}ms")]
    AdvanceTimeout(LogicalTime, u64),

    /// The bridge resigned while the operation was pending
    #[error("Bridge resigned")]
    Resigned,
}

impl BridgeError {
    /// Returns true for errors that stop the bridge from entering the
    /// running state.
    pub fn is_fatal_startup(&self) -> bool {
        matches!(
            self,
            BridgeError::Config(_)
                | BridgeError::Connect { .. }
                | BridgeError::Join { .. }
                | BridgeError::Resolve { .. }
        )
    }
}
