//! Local engine collaborator.
//!
//! The discrete-event engine (and the presentation layer around it) lives
//! outside the bridge. The bridge only drives it through this narrow
//! start / pause / stop / status surface.

use async_trait::async_trait;
use thiserror::Error;

/// Readiness reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    /// Still preparing
    Busy,
    /// Loaded and able to run
    Ready,
    /// Preparation failed with the given detail
    Failed(String),
}

/// Errors the engine reports for a control call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine refused the command in its current state
    #[error("Engine rejected command: {0}")]
    Rejected(String),

    /// The engine is not reachable
    #[error("Engine unavailable: {0}")]
    Unavailable(String),
}

/// Control surface of the local engine.
#[async_trait]
pub trait LocalEngine: Send + Sync + 'static {
    /// Starts (or prepares to start) the loaded simulation.
    async fn start_simulation(&self) -> Result<(), EngineError>;

    /// Pauses the running simulation.
    async fn pause_simulation(&self) -> Result<(), EngineError>;

    /// Stops the simulation.
    async fn stop_simulation(&self) -> Result<(), EngineError>;

    /// Reports readiness.
    async fn status(&self) -> EngineStatus;
}
