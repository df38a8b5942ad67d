//! Scenario runner - drives full bridges through the in-memory RTI.

use async_trait::async_trait;
use fedbridge_core::{
    names, BridgeConfig, BridgeError, BridgeExtensions, ClassManifest, ControlState,
    DecodedInteraction, DispatchCounts, FederateBridge, FederateIdentity, InteractionHandler,
    Outbox, ReservationOutcome, RetryPolicy,
};
use fedbridge_env::LogicalTime;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::SimContext;
use crate::engine::{EngineCommand, SimEngine};
use crate::probe::ProbeFederate;
use crate::rti::{SimRti, SimRtiAmbassador};
use crate::scenarios::ScenarioId;

/// Federation every scenario runs in.
pub const FEDERATION: &str = "Exercise";

/// Time-stamped application interaction used by the stepping scenario.
pub const TICK: &str = "Tick";
/// Sequence number parameter of [`TICK`].
pub const TICK_SEQ: &str = "Seq";

/// A bridge running against the sim RTI.
pub type SimBridge = FederateBridge<SimContext, SimRtiAmbassador>;

/// Class catalogue of the simulated federation.
pub fn federation_fom() -> ClassManifest {
    ClassManifest::control().interaction(TICK, &[TICK_SEQ])
}

/// Bridge configuration tuned for in-memory runs.
pub fn sim_config(federate: &str) -> BridgeConfig {
    let mut config = BridgeConfig::for_identity(FederateIdentity::new(
        FEDERATION, federate, "sim", "fom.xml",
    ));
    config.join_retry = RetryPolicy {
        max_attempts: 4,
        initial_backoff_ms: 10,
        max_backoff_ms: 40,
        jitter_ms: 5,
    };
    config.reservation_timeout_ms = 500;
    config.reservation_grace_ms = 300;
    config.advance_timeout_ms = 2_000;
    config.load_timeout_ms = 2_000;
    config.engine_poll_interval_ms = 10;
    config
}

/// Why a scenario failed.
#[derive(Debug, Error)]
pub enum ScenarioFailure {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("{0}")]
    Check(String),
}

fn check(condition: bool, message: impl FnOnce() -> String) -> Result<(), ScenarioFailure> {
    if condition {
        Ok(())
    } else {
        Err(ScenarioFailure::Check(message()))
    }
}

/// Polls `condition` until it holds or `timeout` passes.
async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Wall-clock duration
    pub elapsed_ms: u64,

    /// Virtual time consumed by bridge waits
    pub virtual_ms: u64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Dispatch counters summed over every bridge in the run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub bridges: usize,
    pub sent: u64,
    pub delivered: u64,
    pub decode_failures: u64,
    pub misaddressed: u64,
    pub held_for_time: u64,
    pub discarded: u64,
}

impl ScenarioMetrics {
    fn absorb(&mut self, counts: DispatchCounts) {
        self.bridges += 1;
        self.sent += counts.sent;
        self.delivered += counts.delivered;
        self.decode_failures += counts.decode_failures;
        self.misaddressed += counts.misaddressed;
        self.held_for_time += counts.held_for_time;
        self.discarded += counts.discarded;
    }
}

/// Records ticks delivered to a bridge.
#[derive(Clone, Default)]
struct TickRecorder {
    ticks: Arc<Mutex<Vec<(u32, Option<LogicalTime>)>>>,
}

impl TickRecorder {
    fn ticks(&self) -> Vec<(u32, Option<LogicalTime>)> {
        self.ticks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl InteractionHandler<SimRtiAmbassador> for TickRecorder {
    async fn handle(&mut self, interaction: DecodedInteraction, _outbox: &Outbox<SimRtiAmbassador>) {
        let seq = interaction
            .text(TICK_SEQ)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(u32::MAX);
        debug!(seq, timestamp = ?interaction.timestamp, "Tick delivered");
        self.ticks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((seq, interaction.timestamp));
    }
}

/// One scenario's federation: RTI, shared context and a director.
struct Stage {
    rti: Arc<SimRti>,
    context: Arc<SimContext>,
    director: ProbeFederate,
    bridges: Vec<Arc<SimBridge>>,
}

impl Stage {
    async fn new(seed: u64) -> Result<Self, ScenarioFailure> {
        let rti = SimRti::new(&federation_fom());
        rti.controller().create_federation(FEDERATION);
        let context = Arc::new(SimContext::new(seed).with_real_time_cap(Duration::from_millis(250)));

        let director = ProbeFederate::join(&rti, "director", FEDERATION, &ClassManifest::control()).await?;
        for class in [
            names::SCENARIO_LOAD,
            names::SCENARIO_START,
            names::SCENARIO_PAUSE,
            names::SCENARIO_STOP,
        ] {
            director.publish(class).await?;
        }
        director.subscribe(names::SCENARIO_LOADED).await?;
        director.subscribe(names::SCENARIO_ERROR).await?;

        Ok(Self {
            rti,
            context,
            director,
            bridges: Vec::new(),
        })
    }

    async fn bridge(
        &mut self,
        name: &str,
        engine: Arc<SimEngine>,
        extensions: BridgeExtensions<SimRtiAmbassador>,
    ) -> Result<Arc<SimBridge>, ScenarioFailure> {
        let bridge = Arc::new(
            FederateBridge::start_with(
                sim_config(name),
                self.context.clone(),
                self.rti.ambassador(),
                engine,
                extensions,
            )
            .await?,
        );
        self.bridges.push(bridge.clone());
        Ok(bridge)
    }

    async fn load(&self, scenario: &str) -> Result<(), ScenarioFailure> {
        Ok(self
            .director
            .send(names::SCENARIO_LOAD, &[(names::SC_NAME, scenario)], None)
            .await?)
    }

    /// Resigns everyone and returns the summed counters.
    ///
    /// Every bridge is resigned even when an earlier one fails; the first
    /// failure is returned.
    async fn finish(self) -> Result<ScenarioMetrics, ScenarioFailure> {
        let mut metrics = ScenarioMetrics::default();
        let mut first_error = None;
        for bridge in &self.bridges {
            if let Err(e) = bridge.resign().await {
                warn!(federate = %bridge.identity().federate_name, error = %e, "Resign failed");
                first_error.get_or_insert(e);
            }
            metrics.absorb(bridge.dispatch_stats());
        }
        let left = self.director.leave().await;
        match (first_error, left) {
            (Some(e), _) | (None, Err(e)) => Err(e.into()),
            (None, Ok(())) => Ok(metrics),
        }
    }
}

/// Runs bridge scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Lookahead steps in the stepping scenario
    steps: u32,

    /// Bound on waiting for an expected interaction
    expect_timeout: Duration,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            steps: 5,
            expect_timeout: Duration::from_secs(3),
        }
    }

    /// Sets the number of lookahead steps.
    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps.max(1);
        self
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        let started = Instant::now();

        let outcome = match scenario {
            ScenarioId::LoadHandshake => self.run_load_handshake().await,
            ScenarioId::LoadFailure => self.run_load_failure().await,
            ScenarioId::ForeignLoad => self.run_foreign_load().await,
            ScenarioId::ReservationTimeout => self.run_reservation_timeout().await,
            ScenarioId::TimeStepping => self.run_time_stepping().await,
            ScenarioId::MalformedTraffic => self.run_malformed_traffic().await,
        };

        let (passed, failure_reason, metrics, virtual_ms) = match outcome {
            Ok((metrics, virtual_ms)) => (true, None, metrics, virtual_ms),
            Err(e) => (false, Some(e.to_string()), ScenarioMetrics::default(), 0),
        };

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            elapsed_ms: started.elapsed().as_millis() as u64,
            virtual_ms,
            failure_reason,
            metrics,
        }
    }

    async fn finish(stage: Stage) -> Result<(ScenarioMetrics, u64), ScenarioFailure> {
        let virtual_ms = stage.context.time_ns() / 1_000_000;
        Ok((stage.finish().await?, virtual_ms))
    }

    /// FB-001
    async fn run_load_handshake(&self) -> Result<(ScenarioMetrics, u64), ScenarioFailure> {
        let mut stage = Stage::new(self.seed).await?;
        let engine = SimEngine::ready_after(3);
        let bridge = stage.bridge("fed-a", engine.clone(), BridgeExtensions::new()).await?;

        stage.load("fed-a").await?;
        let loaded = stage
            .director
            .wait_for(names::SCENARIO_LOADED, 1, self.expect_timeout)
            .await;
        check(loaded.len() == 1, || format!("expected 1 ScenarioLoaded, got {}", loaded.len()))?;
        check(
            loaded[0].text(names::FEDERATE_NAME).ok() == Some("fed-a"),
            || "ScenarioLoaded names the wrong federate".into(),
        )?;
        check(*bridge.control_state().borrow() == ControlState::Loaded, || {
            "bridge not in Loaded".into()
        })?;

        // Same load again: reported, engine untouched.
        stage.load("fed-a").await?;
        let loaded = stage
            .director
            .wait_for(names::SCENARIO_LOADED, 2, self.expect_timeout)
            .await;
        check(loaded.len() == 2, || "repeated load not re-reported".into())?;
        check(engine.starts() == 1, || {
            format!("engine started {} times for two loads", engine.starts())
        })?;

        stage
            .director
            .send(names::SCENARIO_PAUSE, &[(names::SC_NAME, "fed-a")], None)
            .await?;
        let paused = eventually(self.expect_timeout, || {
            engine.commands().last() == Some(&EngineCommand::Pause)
        })
        .await;
        check(paused, || "pause never reached the engine".into())?;
        check(*bridge.control_state().borrow() == ControlState::Loaded, || {
            "pause changed the control state".into()
        })?;

        Self::finish(stage).await
    }

    /// FB-002
    async fn run_load_failure(&self) -> Result<(ScenarioMetrics, u64), ScenarioFailure> {
        let mut stage = Stage::new(self.seed).await?;
        let bridge = stage
            .bridge("fed-a", SimEngine::failing("terrain database missing"), BridgeExtensions::new())
            .await?;

        stage.load("fed-a").await?;
        let errors = stage
            .director
            .wait_for(names::SCENARIO_ERROR, 1, self.expect_timeout)
            .await;
        check(errors.len() == 1, || format!("expected 1 ScenarioError, got {}", errors.len()))?;
        check(
            errors[0].text(names::DETAIL).ok() == Some("terrain database missing"),
            || "ScenarioError lost the engine detail".into(),
        )?;
        check(stage.director.received(names::SCENARIO_LOADED).is_empty(), || {
            "failed load reported as loaded".into()
        })?;
        check(*bridge.control_state().borrow() == ControlState::Error, || {
            "bridge not in Error".into()
        })?;

        Self::finish(stage).await
    }

    /// FB-003
    async fn run_foreign_load(&self) -> Result<(ScenarioMetrics, u64), ScenarioFailure> {
        let mut stage = Stage::new(self.seed).await?;
        let engine_a = SimEngine::ready_after(0);
        let engine_b = SimEngine::ready_after(1);
        let bridge_a = stage.bridge("fed-a", engine_a.clone(), BridgeExtensions::new()).await?;
        let bridge_b = stage.bridge("fed-b", engine_b.clone(), BridgeExtensions::new()).await?;

        stage.load("fed-b").await?;
        let loaded = stage
            .director
            .wait_for(names::SCENARIO_LOADED, 1, self.expect_timeout)
            .await;
        check(loaded.len() == 1, || "fed-b never reported loaded".into())?;
        check(
            loaded[0].text(names::FEDERATE_NAME).ok() == Some("fed-b"),
            || "load answered by the wrong federate".into(),
        )?;

        // Give fed-a every chance to misbehave.
        tokio::time::sleep(Duration::from_millis(100)).await;
        check(stage.director.received(names::SCENARIO_LOADED).len() == 1, || {
            "extra ScenarioLoaded on the bus".into()
        })?;
        check(*bridge_a.control_state().borrow() == ControlState::Idle, || {
            "fed-a left Idle".into()
        })?;
        check(engine_a.commands().is_empty(), || "fed-a engine was driven".into())?;
        check(*bridge_b.control_state().borrow() == ControlState::Loaded, || {
            "fed-b not Loaded".into()
        })?;

        Self::finish(stage).await
    }

    /// FB-004
    async fn run_reservation_timeout(&self) -> Result<(ScenarioMetrics, u64), ScenarioFailure> {
        let mut stage = Stage::new(self.seed).await?;
        let controller = stage.rti.controller();
        let bridge_a = stage.bridge("fed-a", SimEngine::ready_after(0), BridgeExtensions::new()).await?;
        let bridge_b = stage.bridge("fed-b", SimEngine::ready_after(0), BridgeExtensions::new()).await?;

        controller.withhold_reservations(true);
        let started = Instant::now();
        let outcome = bridge_a
            .reserve_object_name_within("Tank-1", Duration::from_millis(100))
            .await?;
        let waited = started.elapsed();
        check(outcome == ReservationOutcome::TimedOut, || {
            format!("withheld reservation returned {outcome:?}")
        })?;
        check(waited >= Duration::from_millis(90), || {
            format!("timed out after only {}ms", waited.as_millis())
        })?;
        controller.withhold_reservations(false);

        // That answer is lost for good; once the grace period has passed the
        // name can be reserved again.
        stage
            .context
            .advance_time(Duration::from_millis(sim_config("fed-a").reservation_grace_ms));
        let outcome = bridge_a.reserve_object_name("Tank-1").await?;
        check(outcome == ReservationOutcome::Reserved, || {
            format!("re-reservation after lost answer returned {outcome:?}")
        })?;

        let outcome = bridge_a.reserve_object_name("Tank-2").await?;
        check(outcome == ReservationOutcome::Reserved, || {
            format!("free name returned {outcome:?}")
        })?;
        let outcome = bridge_b.reserve_object_name("Tank-2").await?;
        check(outcome == ReservationOutcome::NameTaken, || {
            format!("contested name returned {outcome:?}")
        })?;

        // A late answer is absorbed by the timed-out ticket.
        controller.delay_reservations(Duration::from_millis(200));
        let outcome = bridge_b
            .reserve_object_name_within("Tank-3", Duration::from_millis(50))
            .await?;
        check(outcome == ReservationOutcome::TimedOut, || {
            format!("delayed reservation returned {outcome:?}")
        })?;
        controller.delay_reservations(Duration::ZERO);
        let outcome = bridge_b.reserve_object_name("Tank-3").await?;
        check(outcome == ReservationOutcome::Reserved, || {
            format!("re-reservation after late answer returned {outcome:?}")
        })?;

        controller.fail_next_reservation_requests(1);
        let outcome = bridge_a.reserve_object_name("Tank-4").await?;
        check(outcome == ReservationOutcome::Reserved, || {
            format!("re-requested reservation returned {outcome:?}")
        })?;

        Self::finish(stage).await
    }

    /// FB-005
    async fn run_time_stepping(&self) -> Result<(ScenarioMetrics, u64), ScenarioFailure> {
        let mut stage = Stage::new(self.seed).await?;
        let controller = stage.rti.controller();
        let recorder = TickRecorder::default();

        let sender = stage
            .bridge(
                "fed-a",
                SimEngine::ready_after(0),
                BridgeExtensions::new().interaction(TICK, &[TICK_SEQ]).publish(TICK),
            )
            .await?;
        let receiver = stage
            .bridge(
                "fed-b",
                SimEngine::ready_after(0),
                BridgeExtensions::new()
                    .interaction(TICK, &[TICK_SEQ])
                    .subscribe(&[TICK], Box::new(recorder.clone())),
            )
            .await?;

        for step in 0..self.steps {
            let stamp = sender.time_state().granted.plus(sender.time_state().lookahead);
            let seq = step.to_string();
            sender
                .send_at(TICK, &[(TICK_SEQ, seq.as_str())], None, Some(stamp))
                .await?;

            if step == 0 {
                let held = eventually(Duration::from_millis(500), || {
                    receiver.dispatch_stats().held_for_time == 1
                })
                .await;
                check(held, || "first tick was not held for time".into())?;
                check(recorder.ticks().is_empty(), || {
                    "tick delivered before its time was granted".into()
                })?;
            }

            sender.advance_step().await?;
            receiver.advance_step().await?;
            let (a, b) = tokio::join!(sender.await_grant(), receiver.await_grant());
            let (a, b) = (a?, b?);
            check(a == stamp && b == stamp, || {
                format!("step {step}: granted {a} / {b}, expected {stamp}")
            })?;
            sender.consume_grant()?;
            receiver.consume_grant()?;
        }

        let steps = self.steps as usize;
        let delivered = eventually(self.expect_timeout, || recorder.ticks().len() == steps).await;
        check(delivered, || {
            format!("{} of {steps} ticks delivered", recorder.ticks().len())
        })?;
        let order: Vec<u32> = recorder.ticks().iter().map(|(seq, _)| *seq).collect();
        check(order == (0..self.steps).collect::<Vec<_>>(), || {
            format!("ticks out of order: {order:?}")
        })?;

        let final_time = LogicalTime(self.steps as f64);
        check(controller.granted_time("fed-b") == Some(final_time), || {
            "RTI disagrees on fed-b's time".into()
        })?;

        Self::finish(stage).await
    }

    /// FB-006
    async fn run_malformed_traffic(&self) -> Result<(ScenarioMetrics, u64), ScenarioFailure> {
        let mut stage = Stage::new(self.seed).await?;
        let controller = stage.rti.controller();
        let bridge = stage.bridge("fed-a", SimEngine::ready_after(1), BridgeExtensions::new()).await?;

        let bad = [
            (vec![(names::SC_NAME, vec![0xff, 0xfe])], b"".to_vec()),
            (Vec::new(), b"".to_vec()),
            (vec![(names::SC_NAME, b"fed-a".to_vec())], vec![0xff]),
        ];
        for (params, tag) in bad {
            controller
                .inject(FEDERATION, names::SCENARIO_LOAD, params, &tag, None)
                .map_err(BridgeError::from)?;
        }
        controller
            .inject(
                FEDERATION,
                names::SCENARIO_LOAD,
                vec![(names::SC_NAME, b"fed-a".to_vec())],
                b"fed-b",
                None,
            )
            .map_err(BridgeError::from)?;

        // The outcome send races an unpublish and must re-publish.
        controller.force_unpublish("fed-a", names::SCENARIO_LOADED);
        stage.load("fed-a").await?;

        let loaded = stage
            .director
            .wait_for(names::SCENARIO_LOADED, 1, self.expect_timeout)
            .await;
        check(loaded.len() == 1, || "valid load lost behind malformed traffic".into())?;

        let counts = bridge.dispatch_stats();
        check(counts.decode_failures == 3, || {
            format!("expected 3 decode failures, got {}", counts.decode_failures)
        })?;
        check(counts.misaddressed == 1, || {
            format!("expected 1 misaddressed, got {}", counts.misaddressed)
        })?;
        check(counts.send_failures == 0, || "outcome send abandoned".into())?;

        Self::finish(stage).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finish_resigns_every_bridge_despite_failure() {
        let mut stage = Stage::new(42).await.unwrap();
        let rti = stage.rti.clone();
        stage
            .bridge("fed-a", SimEngine::ready_after(0), BridgeExtensions::new())
            .await
            .unwrap();
        stage
            .bridge("fed-b", SimEngine::ready_after(0), BridgeExtensions::new())
            .await
            .unwrap();
        assert_eq!(rti.controller().federates(FEDERATION).len(), 3);

        rti.controller().fail_next_resigns(1);
        let result = stage.finish().await;

        assert!(matches!(
            result,
            Err(ScenarioFailure::Bridge(BridgeError::Rti(_)))
        ));
        // fed-a left through the disconnect, fed-b and the director resigned.
        assert!(rti.controller().federates(FEDERATION).is_empty());
    }

    #[tokio::test]
    async fn test_finish_sums_metrics() {
        let mut stage = Stage::new(7).await.unwrap();
        stage
            .bridge("fed-a", SimEngine::ready_after(0), BridgeExtensions::new())
            .await
            .unwrap();
        stage
            .bridge("fed-b", SimEngine::ready_after(0), BridgeExtensions::new())
            .await
            .unwrap();

        let metrics = stage.finish().await.unwrap();
        assert_eq!(metrics.bridges, 2);
    }
}
