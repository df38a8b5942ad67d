//! Simulation context implementing FederateContext for reproducible runs.

use async_trait::async_trait;
use fedbridge_env::FederateContext;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Default ceiling on the real time a simulated sleep takes.
pub const DEFAULT_REAL_TIME_CAP: Duration = Duration::from_millis(20);

/// Simulation context backed by a virtual clock and a seeded RNG.
///
/// This implements `FederateContext` using:
/// - A virtual clock advanced by every `sleep`
/// - A seeded ChaCha8 RNG for backoff jitter
/// - A short real sleep (at most `real_time_cap`) per `sleep`, so the
///   in-memory RTI's callback threads get to run before a timeout fires
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Deterministic RNG for jitter
    rng: Arc<Mutex<ChaCha8Rng>>,

    /// Upper bound on the real duration of one sleep
    real_time_cap: Duration,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            real_time_cap: DEFAULT_REAL_TIME_CAP,
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Sets the real-time ceiling of a single sleep.
    pub fn with_real_time_cap(mut self, cap: Duration) -> Self {
        self.real_time_cap = cap;
        self
    }

    fn clock(&self) -> std::sync::MutexGuard<'_, u64> {
        self.virtual_time_ns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = self.clock();
        *time = time.saturating_add(duration.as_nanos() as u64);
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *self.clock()
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            rng: Arc::clone(&self.rng),
            real_time_cap: self.real_time_cap,
        }
    }
}

#[async_trait]
impl FederateContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration.min(self.real_time_cap)).await;
        self.advance_time(duration);
    }

    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = tracing::debug_span!("sim_task", name = %name, seed = self.seed);
        tokio::spawn(future.instrument(span))
    }

    fn random_below(&self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(0..bound)
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
