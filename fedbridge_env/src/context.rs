//! Core environment context trait for the federate bridge.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// The central interface for environment interaction.
///
/// This trait abstracts wall-clock time, task spawning and entropy so the
/// bridge runs unchanged against a real RTI (tokio) and inside the
/// simulation harness.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, thread RNG
/// - **Simulation**: `SimContext` - virtual clock, `ChaCha8Rng(seed)`
#[async_trait]
pub trait FederateContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    ///
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// Timeouts inside the bridge race their wait against this, so a
    /// simulated clock shortens them accordingly.
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    ///
    /// The name is used for tracing only.
    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns a random value in `0..bound` (backoff jitter).
    ///
    /// Returns 0 when `bound` is 0.
    fn random_below(&self, bound: u64) -> u64;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
