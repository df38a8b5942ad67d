//! Federate Bridge Core - a local discrete-event engine as a federation member
//!
//! The bridge reconciles three sources of concurrency and failure:
//! 1. **Out-of-band delivery**: interactions arrive on the RTI callback thread,
//!    so they are queued and handled on a single dispatch task
//! 2. **Name reservation**: a request/callback handshake with per-ticket
//!    identity, so late answers never resolve the wrong request
//! 3. **Time management**: advances are negotiated with the federation, and
//!    time-stamped traffic is held until the grant releases it
//!
//! [`FederateBridge`] is the entry point; the component modules are public
//! for embedding them individually.

pub mod bridge;
pub mod callbacks;
pub mod config;
pub mod connector;
pub mod control;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod reservation;
pub mod shutdown;
pub mod time_manager;

#[cfg(test)]
mod test_support;

// Re-export key types for convenience
pub use bridge::{BridgeExtensions, FederateBridge};
pub use config::{BridgeConfig, ConfigError, FederateIdentity, RetryPolicy, DEFAULT_RTI_PORT};
pub use control::{CommandKind, ControlState, CorrelationTag, ScenarioCommand, ScenarioOutcome};
pub use dispatcher::{DecodeError, DecodedInteraction, InteractionHandler, Outbox};
pub use engine::{EngineError, EngineStatus, LocalEngine};
pub use error::BridgeError;
pub use metrics::DispatchCounts;
pub use registry::{names, ClassManifest, ClassRegistry};
pub use reservation::ReservationOutcome;
pub use time_manager::{AdvancePhase, TimeState};
