//! Federate Bridge Simulation Harness
//!
//! This crate provides a controlled federation in which full bridges run
//! against an in-memory RTI instead of a real one.
//!
//! # Core Principle: Control Every Collaborator
//!
//! - **RTI**: [`SimRti`] hosts federations, class handles, reservations and
//!   conservative time management, with one callback thread per session
//! - **Faults**: [`SimRtiController`] makes the bus unreachable, fails joins,
//!   withholds or delays callbacks, races unpublishes, injects raw traffic
//! - **Engine**: [`SimEngine`] is a scripted local engine
//! - **Entropy**: [`SimContext`] derives all jitter from a single seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          SimRti                             │
//! │       federations · handles · reservations · grants         │
//! └──────▲──────────────────────▲──────────────────────▲────────┘
//!        │                      │                      │
//!  ┌─────┴──────┐         ┌─────┴──────┐         ┌─────┴──────┐
//!  │  Director  │ Load ─► │  Bridge A  │         │  Bridge B  │
//!  │  (probe)   │ ◄─ Loaded │ SimEngine│  Tick ─►│ SimEngine  │
//!  └────────────┘         └────────────┘         └────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use fedbridge_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::LoadHandshake).await;
//! assert!(result.passed);
//! ```

mod context;
mod engine;
mod probe;
mod rti;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use engine::{EngineCommand, SimEngine};
pub use probe::ProbeFederate;
pub use rti::{SimRti, SimRtiAmbassador, SimRtiController, RTI_SENDER};
pub use runner::{
    federation_fom, sim_config, ScenarioFailure, ScenarioMetrics, ScenarioResult, ScenarioRunner,
    SimBridge, FEDERATION, TICK, TICK_SEQ,
};
