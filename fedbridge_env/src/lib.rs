//! Federate Bridge Environment Abstraction Layer
//!
//! This crate provides the seams that let the federate bridge run against
//! a **Production** RTI (tokio) and the in-memory **Simulation** RTI.
//!
//! # Core Concept: Two Threads of Control
//!
//! The RTI is split along the direction of the call:
//! - [`RtiAmbassador`]: service calls made by the control thread
//!   (connect, join, publish, send, reserve, time-advance-request)
//! - [`FederateAmbassador`]: notifications the RTI makes on its own
//!   callback thread (interactions, reservation outcomes, grants)
//!
//! Time, task spawning and entropy go through [`FederateContext`], so the
//! harness can drive the bridge with a seeded virtual clock.
//!
//! # Example
//!
//! ```ignore
//! use fedbridge_env::{FederateContext, RtiAmbassador};
//!
//! async fn join_loop<Ctx: FederateContext, Rti: RtiAmbassador>(ctx: &Ctx, rti: &Rti) {
//!     loop {
//!         match rti.join_federation_execution("fed-a", "Exercise", "fom.xml").await {
//!             Ok(handle) => break handle,
//!             Err(_) => ctx.sleep(Duration::from_millis(100)).await,
//!         }
//!     }
//! }
//! ```

mod ambassador;
mod context;
mod error;
mod tokio_impl;
mod types;

pub use ambassador::{FederateAmbassador, RtiAmbassador};
pub use context::FederateContext;
pub use error::RtiError;
pub use tokio_impl::TokioContext;
pub use types::{
    AttributeHandle, FederateHandle, InboundInteraction, InteractionClassHandle, LogicalTime,
    Lookahead, ObjectClassHandle, ParameterHandle, ParameterMap, ResignAction, SenderInfo,
};
