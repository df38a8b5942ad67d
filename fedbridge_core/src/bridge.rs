//! The federate bridge context object.
//!
//! [`FederateBridge`] wires the components together and is what a process
//! holds for the lifetime of its federation membership:
//!
//! ```text
//!   start ─► connect ─► join (retry) ─► resolve classes ─► enable time
//!         ─► publish outcomes ─► subscribe control ─► dispatch loop
//!
//!   resign ─► shutdown signal ─► stop dispatch loop ─► resign ─► disconnect
//! ```

use fedbridge_env::{FederateContext, FederateHandle, LogicalTime, RtiAmbassador};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::callbacks::BridgeCallbacks;
use crate::config::{BridgeConfig, FederateIdentity};
use crate::connector::RtiConnector;
use crate::control::{CommandKind, ControlBridge, ControlHandler, ControlState};
use crate::dispatcher::{inbound_queue, InteractionDispatcher, InteractionHandler, Outbox};
use crate::engine::LocalEngine;
use crate::error::BridgeError;
use crate::metrics::{DispatchCounts, DispatchStats};
use crate::registry::{names, ClassManifest, ClassRegistry};
use crate::reservation::{ReservationOutcome, ReservationSynchronizer};
use crate::shutdown::Shutdown;
use crate::time_manager::{TimeManager, TimeState};

/// How long resign waits for a busy dispatch task before aborting it.
const DISPATCH_STOP_GRACE: Duration = Duration::from_secs(1);

/// Application traffic carried next to the control interactions.
pub struct BridgeExtensions<Rti: RtiAmbassador + ?Sized> {
    manifest: ClassManifest,
    publish: Vec<String>,
    handlers: Vec<(Vec<String>, Box<dyn InteractionHandler<Rti>>)>,
}

impl<Rti: RtiAmbassador + ?Sized> Default for BridgeExtensions<Rti> {
    fn default() -> Self {
        Self {
            manifest: ClassManifest::new(),
            publish: Vec::new(),
            handlers: Vec::new(),
        }
    }
}

impl<Rti: RtiAmbassador + ?Sized> BridgeExtensions<Rti> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an interaction class to resolve at join.
    pub fn interaction(mut self, class: &str, parameters: &[&str]) -> Self {
        self.manifest = self.manifest.interaction(class, parameters);
        self
    }

    /// Declares an object class to resolve at join.
    pub fn object(mut self, class: &str, attributes: &[&str]) -> Self {
        self.manifest = self.manifest.object(class, attributes);
        self
    }

    /// Publishes a declared interaction class at startup.
    pub fn publish(mut self, class: &str) -> Self {
        self.publish.push(class.to_string());
        self
    }

    /// Subscribes `handler` to declared interaction classes at startup.
    pub fn subscribe(mut self, classes: &[&str], handler: Box<dyn InteractionHandler<Rti>>) -> Self {
        self.handlers
            .push((classes.iter().map(|c| c.to_string()).collect(), handler));
        self
    }
}

/// One federate's membership in a federation execution.
pub struct FederateBridge<Ctx, Rti>
where
    Ctx: FederateContext,
    Rti: RtiAmbassador + ?Sized + 'static,
{
    config: BridgeConfig,
    context: Arc<Ctx>,
    connector: RtiConnector<Ctx, Rti>,
    federate: FederateHandle,
    time: TimeManager<Ctx, Rti>,
    reservations: ReservationSynchronizer<Ctx, Rti>,
    outbox: Outbox<Rti>,
    stats: Arc<DispatchStats>,
    control_state: watch::Receiver<ControlState>,
    shutdown: Shutdown,
    dispatch_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<Ctx, Rti> FederateBridge<Ctx, Rti>
where
    Ctx: FederateContext,
    Rti: RtiAmbassador + ?Sized + 'static,
{
    /// Joins the federation and starts serving scenario commands.
    pub async fn start<Eng: LocalEngine>(
        config: BridgeConfig,
        context: Arc<Ctx>,
        rti: Arc<Rti>,
        engine: Arc<Eng>,
    ) -> Result<Self, BridgeError> {
        Self::start_with(config, context, rti, engine, BridgeExtensions::new()).await
    }

    /// Like [`start`](Self::start), with additional application traffic.
    pub async fn start_with<Eng: LocalEngine>(
        config: BridgeConfig,
        context: Arc<Ctx>,
        rti: Arc<Rti>,
        engine: Arc<Eng>,
        extensions: BridgeExtensions<Rti>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        let identity = config.identity.clone();
        info!(
            federation = %identity.federation_name,
            federate = %identity.federate_name,
            seed = context.seed(),
            "Starting federate bridge"
        );

        let shutdown = Shutdown::new();
        let stats = Arc::new(DispatchStats::default());
        let (queue, inbound) = inbound_queue(config.inbound_queue_capacity, stats.clone());
        let (time, grants) =
            TimeManager::new(context.clone(), rti.clone(), config.lookahead, shutdown.clone());
        let (reservations, sink) = ReservationSynchronizer::new(
            context.clone(),
            rti.clone(),
            config.reservation_grace(),
            shutdown.clone(),
        );
        let callbacks = Arc::new(BridgeCallbacks::new(queue, sink, grants, shutdown.clone()));

        let connector = RtiConnector::new(context.clone(), rti.clone(), identity.clone());
        connector.connect(callbacks).await?;

        let federate = match connector
            .join(&config.join_retry, config.create_if_missing)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(disconnect) = rti.disconnect().await {
                    warn!(error = %disconnect, "Disconnect after failed join also failed");
                }
                return Err(e);
            }
        };

        let BridgeExtensions {
            manifest,
            publish,
            handlers,
        } = extensions;
        let manifest = ClassManifest::control().extend(manifest);

        // From here on a failure leaves the federation again.
        let setup = async {
            let registry = Arc::new(ClassRegistry::resolve(rti.as_ref(), &manifest).await?);
            time.enable(config.time_regulating, config.time_constrained)
                .await?;

            let outbox = Outbox::new(rti.clone(), registry.clone(), stats.clone());
            let mut dispatcher =
                InteractionDispatcher::new(outbox.clone(), inbound, identity.federate_name.clone());

            for class in [names::SCENARIO_LOADED, names::SCENARIO_ERROR] {
                dispatcher.publish(registry.interaction(class)?).await?;
            }
            for class in &publish {
                dispatcher.publish(registry.interaction(class)?).await?;
            }

            let control = ControlBridge::new(
                context.clone(),
                engine,
                identity.clone(),
                config.load_timeout(),
                config.engine_poll_interval(),
            );
            let control_state = control.watch();
            let control_classes = CommandKind::all()
                .iter()
                .map(|kind| registry.interaction(kind.class_name()))
                .collect::<Result<Vec<_>, _>>()?;
            dispatcher
                .subscribe_all(&control_classes, Box::new(ControlHandler::new(control)))
                .await?;

            for (classes, handler) in handlers {
                let handles = classes
                    .iter()
                    .map(|c| registry.interaction(c))
                    .collect::<Result<Vec<_>, _>>()?;
                dispatcher.subscribe_all(&handles, handler).await?;
            }

            Ok::<_, BridgeError>((outbox, dispatcher, control_state))
        };

        let (outbox, dispatcher, control_state) = match setup.await {
            Ok(parts) => parts,
            Err(e) => {
                shutdown.trigger();
                if let Err(resign) = connector.resign(config.resign_action).await {
                    warn!(error = %resign, "Resign after failed startup also failed");
                }
                return Err(e);
            }
        };

        let dispatch_task = dispatcher.start(context.as_ref(), time.released(), shutdown.clone());
        info!(federate = %identity.federate_name, %federate, "Federate bridge running");

        Ok(Self {
            config,
            context,
            connector,
            federate,
            time,
            reservations,
            outbox,
            stats,
            control_state,
            shutdown,
            dispatch_task: tokio::sync::Mutex::new(Some(dispatch_task)),
        })
    }

    pub fn identity(&self) -> &FederateIdentity {
        self.connector.identity()
    }

    /// Handle the federation assigned at join.
    pub fn federate_handle(&self) -> FederateHandle {
        self.federate
    }

    pub fn registry(&self) -> &ClassRegistry {
        self.outbox.registry()
    }

    fn ensure_running(&self) -> Result<(), BridgeError> {
        if self.shutdown.is_triggered() {
            Err(BridgeError::Resigned)
        } else {
            Ok(())
        }
    }

    /// Reserves an object-instance name with the configured timeout.
    pub async fn reserve_object_name(&self, name: &str) -> Result<ReservationOutcome, BridgeError> {
        self.reserve_object_name_within(name, self.config.reservation_timeout())
            .await
    }

    /// Reserves an object-instance name, waiting at most `timeout`.
    pub async fn reserve_object_name_within(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<ReservationOutcome, BridgeError> {
        self.reservations.reserve(name, timeout).await
    }

    pub fn time_state(&self) -> TimeState {
        self.time.snapshot()
    }

    pub async fn request_advance(&self, target: LogicalTime) -> Result<(), BridgeError> {
        self.ensure_running()?;
        self.time.request_advance(target).await
    }

    /// Requests an advance of one lookahead and returns the target.
    pub async fn advance_step(&self) -> Result<LogicalTime, BridgeError> {
        self.ensure_running()?;
        self.time.advance_step().await
    }

    /// Waits (bounded by the configured advance timeout) for the grant.
    pub async fn await_grant(&self) -> Result<LogicalTime, BridgeError> {
        self.time.await_grant(self.config.advance_timeout()).await
    }

    /// Consumes the grant and releases held interactions up to it.
    pub fn consume_grant(&self) -> Result<LogicalTime, BridgeError> {
        self.time.consume_grant()
    }

    /// Request, wait and consume in one call.
    pub async fn advance_to(&self, target: LogicalTime) -> Result<LogicalTime, BridgeError> {
        self.ensure_running()?;
        self.time
            .advance_to(target, self.config.advance_timeout())
            .await
    }

    /// Sends a receive-order interaction by class name.
    pub async fn send(
        &self,
        class: &str,
        parameters: &[(&str, &str)],
        target: Option<&str>,
    ) -> Result<(), BridgeError> {
        self.send_at(class, parameters, target, None).await
    }

    /// Sends an interaction, time-stamped when `timestamp` is set.
    pub async fn send_at(
        &self,
        class: &str,
        parameters: &[(&str, &str)],
        target: Option<&str>,
        timestamp: Option<LogicalTime>,
    ) -> Result<(), BridgeError> {
        self.ensure_running()?;
        if let Some(time) = timestamp {
            self.time.check_send_timestamp(time)?;
        }
        let handle = self.registry().interaction(class)?;
        self.outbox.send_at(handle, parameters, target, timestamp).await
    }

    /// Observes the local control state.
    pub fn control_state(&self) -> watch::Receiver<ControlState> {
        self.control_state.clone()
    }

    pub fn dispatch_stats(&self) -> DispatchCounts {
        self.stats.snapshot()
    }

    pub fn is_resigned(&self) -> bool {
        self.connector.is_resigned()
    }

    /// Leaves the federation. Safe to call more than once.
    pub async fn resign(&self) -> Result<(), BridgeError> {
        if !self.shutdown.trigger() {
            return self.connector.resign(self.config.resign_action).await;
        }
        info!(federate = %self.identity().federate_name, "Resigning");

        if let Some(mut task) = self.dispatch_task.lock().await.take() {
            tokio::select! {
                joined = &mut task => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Dispatch task ended abnormally");
                    }
                }
                _ = self.context.sleep(DISPATCH_STOP_GRACE) => {
                    warn!("Dispatch task still busy, aborting it");
                    task.abort();
                }
            }
        }

        self.connector.resign(self.config.resign_action).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedEngine, ScriptedRti};
    use fedbridge_env::TokioContext;
    use std::sync::atomic::Ordering;

    type TestBridge = FederateBridge<TokioContext, ScriptedRti>;

    fn config(name: &str) -> BridgeConfig {
        let mut config = BridgeConfig::for_identity(FederateIdentity::new(
            "Exercise", name, "rti.local", "fom.xml",
        ));
        config.load_timeout_ms = 200;
        config.engine_poll_interval_ms = 5;
        config.advance_timeout_ms = 200;
        config
    }

    async fn started(name: &str) -> (TestBridge, Arc<ScriptedRti>, Arc<ScriptedEngine>) {
        let rti = ScriptedRti::with_manifest(&ClassManifest::control());
        let engine = ScriptedEngine::ready_after(1);
        let bridge = FederateBridge::start(
            config(name),
            TokioContext::shared(),
            rti.clone(),
            engine.clone(),
        )
        .await
        .unwrap();
        (bridge, rti, engine)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_start_publishes_and_subscribes() {
        let (bridge, rti, _) = started("fed-a").await;
        assert_eq!(bridge.federate_handle(), FederateHandle(1));
        assert_eq!(rti.published.lock().unwrap().len(), 2);
        assert_eq!(rti.subscribed.lock().unwrap().len(), 4);
        bridge.resign().await.unwrap();
    }

    #[tokio::test]
    async fn test_matching_load_reports_loaded() {
        let (bridge, rti, engine) = started("fed-a").await;
        let mut state = bridge.control_state();

        rti.deliver(names::SCENARIO_LOAD, &[(names::SC_NAME, "fed-a")], 5, b"", None);
        settle().await;

        let loaded = rti.sent_of(names::SCENARIO_LOADED);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0][names::FEDERATE_NAME], "fed-a");
        assert_eq!(*state.borrow_and_update(), ControlState::Loaded);
        assert_eq!(engine.starts.load(Ordering::SeqCst), 1);
        bridge.resign().await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_load_sends_nothing() {
        let (bridge, rti, engine) = started("fed-a").await;

        rti.deliver(names::SCENARIO_LOAD, &[(names::SC_NAME, "fed-b")], 5, b"", None);
        settle().await;

        assert!(rti.sent_of(names::SCENARIO_LOADED).is_empty());
        assert!(rti.sent_of(names::SCENARIO_ERROR).is_empty());
        assert_eq!(engine.starts.load(Ordering::SeqCst), 0);
        assert_eq!(*bridge.control_state().borrow(), ControlState::Idle);
        bridge.resign().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_class_is_fatal_and_leaves() {
        let rti = ScriptedRti::with_manifest(&ClassManifest::control());
        rti.forget_interaction(names::SCENARIO_ERROR);

        let result: Result<TestBridge, _> = FederateBridge::start(
            config("fed-a"),
            TokioContext::shared(),
            rti.clone(),
            ScriptedEngine::ready_after(0),
        )
        .await;

        let err = result.err().unwrap();
        assert!(err.is_fatal_startup());
        assert_eq!(rti.resigned.lock().unwrap().len(), 1);
        assert_eq!(rti.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timestamp_below_lookahead_rejected() {
        let (bridge, _rti, _) = started("fed-a").await;

        let err = bridge
            .send_at(
                names::SCENARIO_LOADED,
                &[(names::FEDERATE_NAME, "fed-a")],
                None,
                Some(LogicalTime(0.5)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidTimestamp { .. }));

        bridge
            .send_at(
                names::SCENARIO_LOADED,
                &[(names::FEDERATE_NAME, "fed-a")],
                None,
                Some(LogicalTime(1.0)),
            )
            .await
            .unwrap();
        bridge.resign().await.unwrap();
    }

    #[tokio::test]
    async fn test_resign_cancels_pending_grant_and_is_idempotent() {
        let (bridge, rti, _) = started("fed-a").await;
        let bridge = Arc::new(bridge);

        bridge.advance_step().await.unwrap();
        let waiter = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.await_grant().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        bridge.resign().await.unwrap();
        bridge.resign().await.unwrap();

        assert!(matches!(waiter.await.unwrap(), Err(BridgeError::Resigned)));
        assert_eq!(rti.resigned.lock().unwrap().len(), 1);
        assert!(bridge.is_resigned());
        assert!(matches!(
            bridge.advance_step().await,
            Err(BridgeError::Resigned)
        ));
    }

    #[tokio::test]
    async fn test_interactions_after_resign_are_discarded() {
        let (bridge, rti, _) = started("fed-a").await;
        bridge.resign().await.unwrap();

        rti.deliver(names::SCENARIO_LOAD, &[(names::SC_NAME, "fed-a")], 5, b"", None);
        assert_eq!(bridge.dispatch_stats().discarded, 1);
        assert!(rti.sent_of(names::SCENARIO_LOADED).is_empty());
    }
}
