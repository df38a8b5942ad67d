//! The Local Control Bridge - scenario commands to engine calls.
//!
//! ```text
//!            Load (name matches)            engine Ready
//!   ┌──────┐ ──────────────────► ┌─────────┐ ──────────► ┌────────┐
//!   │ Idle │                     │ Loading │             │ Loaded │ ◄─ Start/Pause/Stop
//!   └──────┘                     └─────────┘             └────────┘    (no transition)
//!                                     │ failure / timeout
//!                                     ▼
//!                                 ┌───────┐   Load (name matches)
//!                                 │ Error │ ─────────────────────► Loading
//!                                 └───────┘
//! ```
//!
//! Commands naming another federate are ignored: no transition, no
//! outbound interaction.

use async_trait::async_trait;
use fedbridge_env::{FederateContext, FederateHandle, RtiAmbassador};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::FederateIdentity;
use crate::dispatcher::{DecodeError, DecodedInteraction, InteractionHandler, Outbox};
use crate::engine::{EngineStatus, LocalEngine};
use crate::error::BridgeError;
use crate::registry::names;

/// Control command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Load,
    Start,
    Pause,
    Stop,
}

impl CommandKind {
    /// Maps a control interaction class name to its command.
    pub fn from_class_name(name: &str) -> Option<Self> {
        match name {
            names::SCENARIO_LOAD => Some(CommandKind::Load),
            names::SCENARIO_START => Some(CommandKind::Start),
            names::SCENARIO_PAUSE => Some(CommandKind::Pause),
            names::SCENARIO_STOP => Some(CommandKind::Stop),
            _ => None,
        }
    }

    /// Interaction class carrying this command.
    pub fn class_name(&self) -> &'static str {
        match self {
            CommandKind::Load => names::SCENARIO_LOAD,
            CommandKind::Start => names::SCENARIO_START,
            CommandKind::Pause => names::SCENARIO_PAUSE,
            CommandKind::Stop => names::SCENARIO_STOP,
        }
    }

    /// Every command kind.
    pub fn all() -> [CommandKind; 4] {
        [
            CommandKind::Load,
            CommandKind::Start,
            CommandKind::Pause,
            CommandKind::Stop,
        ]
    }
}

/// Identifier that follows one command through logs and its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationTag(pub Uuid);

impl CorrelationTag {
    /// Creates a fresh tag.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationTag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 chars are plenty for log correlation
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// A decoded scenario control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioCommand {
    pub kind: CommandKind,
    /// Scenario (federate) name the command is addressed to
    pub scenario: String,
    pub correlation: CorrelationTag,
    /// Federate that sent the command
    pub sender: FederateHandle,
}

impl ScenarioCommand {
    /// Builds a command from a control interaction.
    pub fn from_interaction(interaction: &DecodedInteraction) -> Result<Self, DecodeError> {
        let kind = CommandKind::from_class_name(&interaction.class_name)
            .ok_or_else(|| DecodeError::UnknownClass(interaction.class_name.clone()))?;
        let scenario = interaction.text(names::SC_NAME)?.to_string();
        Ok(Self {
            kind,
            scenario,
            correlation: CorrelationTag::new(),
            sender: interaction.sender.federate,
        })
    }
}

/// Load state of the local scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlState {
    #[default]
    Idle,
    Loading,
    Loaded,
    Error,
}

/// Result of a load, reported back onto the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioOutcome {
    pub success: bool,
    pub federate_name: String,
    pub detail: Option<String>,
    pub correlation: CorrelationTag,
}

impl ScenarioOutcome {
    /// Interaction class that carries this outcome.
    pub fn class_name(&self) -> &'static str {
        if self.success {
            names::SCENARIO_LOADED
        } else {
            names::SCENARIO_ERROR
        }
    }

    /// Wire parameters of the outcome interaction.
    pub fn parameters(&self) -> Vec<(&'static str, &str)> {
        let mut params = vec![(names::FEDERATE_NAME, self.federate_name.as_str())];
        if !self.success {
            params.push((names::DETAIL, self.detail.as_deref().unwrap_or("")));
        }
        params
    }
}

/// Drives the local engine from scenario commands.
pub struct ControlBridge<Ctx: FederateContext, Eng: LocalEngine> {
    context: Arc<Ctx>,
    engine: Arc<Eng>,
    identity: FederateIdentity,
    load_timeout: Duration,
    poll_interval: Duration,
    state: watch::Sender<ControlState>,
}

impl<Ctx: FederateContext, Eng: LocalEngine> ControlBridge<Ctx, Eng> {
    /// Creates a bridge in state Idle.
    pub fn new(
        context: Arc<Ctx>,
        engine: Arc<Eng>,
        identity: FederateIdentity,
        load_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ControlState::Idle);
        Self {
            context,
            engine,
            identity,
            load_timeout,
            poll_interval,
            state,
        }
    }

    /// Current state.
    pub fn state(&self) -> ControlState {
        *self.state.borrow()
    }

    /// Subscribes to state changes (report-status surface).
    pub fn watch(&self) -> watch::Receiver<ControlState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ControlState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!(federate = %self.identity.federate_name, from = ?prev, to = ?next, "Control state changed");
        }
    }

    /// Executes one command, returning the outcome to report, if any.
    pub async fn execute(&mut self, command: ScenarioCommand) -> Option<ScenarioOutcome> {
        if !self.identity.answers_to(&command.scenario) {
            debug!(
                correlation = %command.correlation,
                scenario = %command.scenario,
                "Command addressed to another federate, ignoring"
            );
            return None;
        }

        match command.kind {
            CommandKind::Load => Some(self.load(command.correlation).await),
            kind => {
                self.control(kind, command.correlation).await;
                None
            }
        }
    }

    async fn load(&mut self, correlation: CorrelationTag) -> ScenarioOutcome {
        if self.state() == ControlState::Loaded {
            debug!(%correlation, "Scenario already loaded, reporting again");
            return self.outcome(correlation, None);
        }

        self.transition(ControlState::Loading);
        info!(%correlation, federate = %self.identity.federate_name, "Loading scenario");

        let result = match self.engine.start_simulation().await {
            Ok(()) => self.wait_ready().await,
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(()) => {
                self.transition(ControlState::Loaded);
                self.outcome(correlation, None)
            }
            Err(detail) => {
                warn!(%correlation, %detail, "Scenario load failed");
                self.transition(ControlState::Error);
                self.outcome(correlation, Some(detail))
            }
        }
    }

    async fn wait_ready(&self) -> Result<(), String> {
        let deadline = self.context.now() + self.load_timeout;
        loop {
            match self.engine.status().await {
                EngineStatus::Ready => return Ok(()),
                EngineStatus::Failed(detail) => return Err(detail),
                EngineStatus::Busy => {}
            }
            if self.context.now() >= deadline {
                return Err(format!(
                    "engine not ready within {}ms",
                    self.load_timeout.as_millis()
                ));
            }
            self.context.sleep(self.poll_interval).await;
        }
    }

    async fn control(&self, kind: CommandKind, correlation: CorrelationTag) {
        if self.state() != ControlState::Loaded {
            warn!(%correlation, ?kind, state = ?self.state(), "Control command before scenario loaded, ignoring");
            return;
        }
        let result = match kind {
            CommandKind::Start => self.engine.start_simulation().await,
            CommandKind::Pause => self.engine.pause_simulation().await,
            CommandKind::Stop => self.engine.stop_simulation().await,
            CommandKind::Load => return,
        };
        match result {
            Ok(()) => info!(%correlation, ?kind, "Engine command applied"),
            Err(e) => warn!(%correlation, ?kind, error = %e, "Engine command failed"),
        }
    }

    fn outcome(&self, correlation: CorrelationTag, detail: Option<String>) -> ScenarioOutcome {
        ScenarioOutcome {
            success: detail.is_none(),
            federate_name: self.identity.federate_name.clone(),
            detail,
            correlation,
        }
    }
}

/// Sends an outcome through the outbox.
pub async fn send_outcome<Rti: RtiAmbassador + ?Sized>(
    outbox: &Outbox<Rti>,
    outcome: &ScenarioOutcome,
) -> Result<(), BridgeError> {
    let class = outbox.registry().interaction(outcome.class_name())?;
    outbox.send(class, &outcome.parameters(), None).await
}

/// Dispatcher handler feeding control interactions into a [`ControlBridge`].
pub struct ControlHandler<Ctx: FederateContext, Eng: LocalEngine> {
    bridge: ControlBridge<Ctx, Eng>,
}

impl<Ctx: FederateContext, Eng: LocalEngine> ControlHandler<Ctx, Eng> {
    pub fn new(bridge: ControlBridge<Ctx, Eng>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl<Ctx, Eng, Rti> InteractionHandler<Rti> for ControlHandler<Ctx, Eng>
where
    Ctx: FederateContext,
    Eng: LocalEngine,
    Rti: RtiAmbassador + ?Sized,
{
    async fn handle(&mut self, interaction: DecodedInteraction, outbox: &Outbox<Rti>) {
        let command = match ScenarioCommand::from_interaction(&interaction) {
            Ok(command) => command,
            Err(e) => {
                warn!(class = %interaction.class_name, error = %e, "Not a scenario command, dropping");
                return;
            }
        };
        debug!(
            correlation = %command.correlation,
            kind = ?command.kind,
            scenario = %command.scenario,
            sender = %command.sender,
            "Scenario command received"
        );

        if let Some(outcome) = self.bridge.execute(command).await {
            if let Err(e) = send_outcome(outbox, &outcome).await {
                warn!(correlation = %outcome.correlation, error = %e, "Failed to report scenario outcome");
            }
        }
    }
}
