//! The Interaction Dispatcher - inbound routing and outbound sends.
//!
//! # Threading
//!
//! ```text
//!  RTI callback thread          dispatch task                 control thread
//!  ───────────────────          ─────────────                 ──────────────
//!  receive_interaction ─► CallbackQueue ─► decode ─► handlers     Outbox::send
//!        (try_send)        (bounded mpsc)   │  ▲                    │
//!                                           ▼  │ release on grant   ▼
//!                                        held (TSO)              RTI send
//! ```
//!
//! The callback thread never runs handler code: it only enqueues. The
//! dispatch task is the single consumer, so per-sender order is the queue
//! order. Nothing is promised across senders.

use async_trait::async_trait;
use fedbridge_env::{
    FederateContext, InboundInteraction, InteractionClassHandle, LogicalTime, ParameterMap,
    RtiAmbassador, RtiError, SenderInfo,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::metrics::DispatchStats;
use crate::registry::ClassRegistry;
use crate::shutdown::Shutdown;

// =============================================================================
// DECODING
// =============================================================================

/// Why an inbound interaction could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The class handle is not in the registry
    #[error("Unknown interaction class {0}")]
    UnknownClass(String),

    /// A parameter handle is not declared for the class
    #[error("Unknown parameter {parameter} on {class}")]
    UnknownParameter { class: String, parameter: String },

    /// A parameter value is not UTF-8 text
    #[error("Parameter {0} is not valid UTF-8")]
    InvalidText(String),

    /// A declared parameter is absent
    #[error("Missing parameter {0}")]
    MissingParameter(String),

    /// The addressing tag is not valid UTF-8
    #[error("Malformed federate tag")]
    InvalidTag,
}

/// An inbound interaction with names and text values.
#[derive(Debug, Clone)]
pub struct DecodedInteraction {
    /// Class handle
    pub class: InteractionClassHandle,
    /// Declared class name
    pub class_name: String,
    /// Parameter values by declared name
    pub parameters: HashMap<String, String>,
    /// Producing federate
    pub sender: SenderInfo,
    /// Time stamp, `None` for receive order
    pub timestamp: Option<LogicalTime>,
}

impl DecodedInteraction {
    /// Returns a parameter value.
    pub fn text(&self, name: &str) -> Result<&str, DecodeError> {
        self.parameters
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| DecodeError::MissingParameter(name.to_string()))
    }
}

/// Addressing decision for an inbound interaction's tag.
fn addressed_to_us(tag: &[u8], local: &str) -> Result<bool, DecodeError> {
    if tag.is_empty() {
        return Ok(true);
    }
    let target = std::str::from_utf8(tag).map_err(|_| DecodeError::InvalidTag)?;
    Ok(target == local)
}

/// Decodes parameters by name; every declared parameter must be present.
pub fn decode(
    registry: &ClassRegistry,
    interaction: InboundInteraction,
) -> Result<DecodedInteraction, DecodeError> {
    let class = interaction.class;
    let class_name = registry
        .interaction_name(class)
        .ok_or_else(|| DecodeError::UnknownClass(class.to_string()))?
        .to_string();

    let mut parameters = HashMap::with_capacity(interaction.parameters.len());
    for (handle, bytes) in interaction.parameters {
        let name = registry
            .parameter_name(class, handle)
            .ok_or_else(|| DecodeError::UnknownParameter {
                class: class_name.clone(),
                parameter: handle.to_string(),
            })?;
        let value =
            String::from_utf8(bytes).map_err(|_| DecodeError::InvalidText(name.to_string()))?;
        parameters.insert(name.to_string(), value);
    }

    if let Some(missing) = registry
        .declared_parameters(class)
        .find(|name| !parameters.contains_key(*name))
    {
        return Err(DecodeError::MissingParameter(missing.to_string()));
    }

    Ok(DecodedInteraction {
        class,
        class_name,
        parameters,
        sender: interaction.sender,
        timestamp: interaction.timestamp,
    })
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Outbound half of the dispatcher: publication and sends.
pub struct Outbox<Rti: RtiAmbassador + ?Sized> {
    rti: Arc<Rti>,
    registry: Arc<ClassRegistry>,
    published: Arc<Mutex<HashSet<InteractionClassHandle>>>,
    stats: Arc<DispatchStats>,
}

impl<Rti: RtiAmbassador + ?Sized> Clone for Outbox<Rti> {
    fn clone(&self) -> Self {
        Self {
            rti: self.rti.clone(),
            registry: self.registry.clone(),
            published: self.published.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<Rti: RtiAmbassador + ?Sized> Outbox<Rti> {
    /// Creates the outbound side over a resolved registry.
    pub fn new(rti: Arc<Rti>, registry: Arc<ClassRegistry>, stats: Arc<DispatchStats>) -> Self {
        Self {
            rti,
            registry,
            published: Arc::new(Mutex::new(HashSet::new())),
            stats,
        }
    }

    /// The registry this outbox encodes with.
    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    /// Publishes an interaction class.
    pub async fn publish(&self, class: InteractionClassHandle) -> Result<(), BridgeError> {
        self.rti.publish_interaction_class(class).await?;
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(class);
        debug!(%class, "Published interaction class");
        Ok(())
    }

    /// Returns true if `class` was published through this outbox.
    pub fn is_published(&self, class: InteractionClassHandle) -> bool {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&class)
    }

    fn encode(
        &self,
        class: InteractionClassHandle,
        parameters: &[(&str, &str)],
    ) -> Result<ParameterMap, BridgeError> {
        parameters
            .iter()
            .map(|(name, value)| {
                Ok((self.registry.parameter(class, name)?, value.as_bytes().to_vec()))
            })
            .collect()
    }

    /// Sends an interaction in receive order.
    ///
    /// `target` restricts delivery to the named federate.
    pub async fn send(
        &self,
        class: InteractionClassHandle,
        parameters: &[(&str, &str)],
        target: Option<&str>,
    ) -> Result<(), BridgeError> {
        self.send_at(class, parameters, target, None).await
    }

    /// Sends an interaction, optionally time-stamped.
    ///
    /// A class the RTI reports as unpublished is re-published and the send
    /// retried once; a second failure is logged and returned.
    pub async fn send_at(
        &self,
        class: InteractionClassHandle,
        parameters: &[(&str, &str)],
        target: Option<&str>,
        timestamp: Option<LogicalTime>,
    ) -> Result<(), BridgeError> {
        let encoded = self.encode(class, parameters)?;
        let tag = target.map(|t| t.as_bytes().to_vec()).unwrap_or_default();

        let first = self
            .rti
            .send_interaction(class, encoded.clone(), tag.clone(), timestamp)
            .await;

        let result = match first {
            Err(RtiError::InteractionClassNotPublished(_)) => {
                warn!(%class, "Send refused as unpublished, re-publishing and retrying once");
                match self.publish(class).await {
                    Ok(()) => self
                        .rti
                        .send_interaction(class, encoded, tag, timestamp)
                        .await
                        .map_err(BridgeError::from),
                    Err(e) => Err(e),
                }
            }
            other => other.map_err(BridgeError::from),
        };

        match &result {
            Ok(()) => self.stats.record_sent(),
            Err(e) => {
                self.stats.record_send_failure();
                warn!(%class, error = %e, "Send abandoned");
            }
        }
        result
    }
}

// =============================================================================
// INBOUND
// =============================================================================

/// Handler invoked on the dispatch task for subscribed classes.
#[async_trait]
pub trait InteractionHandler<Rti: RtiAmbassador + ?Sized>: Send {
    /// Handles one decoded interaction.
    async fn handle(&mut self, interaction: DecodedInteraction, outbox: &Outbox<Rti>);
}

/// Callback-thread side of the inbound queue.
#[derive(Debug, Clone)]
pub struct CallbackQueue {
    tx: mpsc::Sender<InboundInteraction>,
    stats: Arc<DispatchStats>,
}

impl CallbackQueue {
    /// Enqueues without blocking the calling (RTI) thread.
    pub fn push(&self, interaction: InboundInteraction) {
        match self.tx.try_send(interaction) {
            Ok(()) => self.stats.record_received(),
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                self.stats.record_overflow();
                warn!(class = %dropped.class, sender = %dropped.sender.federate, "Inbound queue full, interaction dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.record_discarded();
            }
        }
    }

    /// Counts an interaction dropped before reaching the queue.
    pub fn discard(&self, interaction: InboundInteraction) {
        self.stats.record_discarded();
        debug!(class = %interaction.class, "Interaction arrived after shutdown, discarded");
    }
}

/// Consumer side of the inbound queue, handed to the dispatcher.
#[derive(Debug)]
pub struct InboundReceiver {
    rx: mpsc::Receiver<InboundInteraction>,
}

/// Creates the bounded inbound queue.
pub fn inbound_queue(
    capacity: usize,
    stats: Arc<DispatchStats>,
) -> (CallbackQueue, InboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (CallbackQueue { tx, stats }, InboundReceiver { rx })
}

struct Held {
    time: LogicalTime,
    arrival: u64,
    interaction: DecodedInteraction,
}

/// Routes inbound interactions to handlers and owns the outbound side.
pub struct InteractionDispatcher<Rti: RtiAmbassador + ?Sized> {
    outbox: Outbox<Rti>,
    local_name: String,
    inbound: InboundReceiver,
    handlers: Vec<Box<dyn InteractionHandler<Rti>>>,
    routes: HashMap<InteractionClassHandle, Vec<usize>>,
    held: Vec<Held>,
    arrivals: u64,
    stats: Arc<DispatchStats>,
}

impl<Rti: RtiAmbassador + ?Sized> InteractionDispatcher<Rti> {
    /// Creates a dispatcher for the federate named `local_name`.
    pub fn new(outbox: Outbox<Rti>, inbound: InboundReceiver, local_name: impl Into<String>) -> Self {
        let stats = outbox.stats.clone();
        Self {
            outbox,
            local_name: local_name.into(),
            inbound,
            handlers: Vec::new(),
            routes: HashMap::new(),
            held: Vec::new(),
            arrivals: 0,
            stats,
        }
    }

    /// Returns a clone of the outbound side.
    pub fn outbox(&self) -> Outbox<Rti> {
        self.outbox.clone()
    }

    /// Publishes an interaction class.
    pub async fn publish(&self, class: InteractionClassHandle) -> Result<(), BridgeError> {
        self.outbox.publish(class).await
    }

    /// Subscribes `handler` to one class.
    pub async fn subscribe(
        &mut self,
        class: InteractionClassHandle,
        handler: Box<dyn InteractionHandler<Rti>>,
    ) -> Result<(), BridgeError> {
        self.subscribe_all(&[class], handler).await
    }

    /// Subscribes one handler to several classes.
    pub async fn subscribe_all(
        &mut self,
        classes: &[InteractionClassHandle],
        handler: Box<dyn InteractionHandler<Rti>>,
    ) -> Result<(), BridgeError> {
        for class in classes {
            if !self.routes.contains_key(class) {
                self.outbox.rti.subscribe_interaction_class(*class).await?;
            }
        }
        let index = self.handlers.len();
        self.handlers.push(handler);
        for class in classes {
            self.routes.entry(*class).or_default().push(index);
        }
        Ok(())
    }

    /// Spawns the dispatch loop.
    ///
    /// `released` is the time manager's released time; time-stamped
    /// interactions beyond it wait for the next grant.
    pub fn start<Ctx: FederateContext>(
        self,
        context: &Ctx,
        released: watch::Receiver<LogicalTime>,
        shutdown: Shutdown,
    ) -> JoinHandle<()>
    where
        Rti: 'static,
    {
        context.spawn("dispatch", self.run(released, shutdown))
    }

    async fn run(mut self, mut released: watch::Receiver<LogicalTime>, shutdown: Shutdown) {
        info!(federate = %self.local_name, classes = self.routes.len(), "Dispatch loop started");
        let mut time_open = true;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                changed = released.changed(), if time_open => {
                    if changed.is_err() {
                        time_open = false;
                        continue;
                    }
                    let now = *released.borrow_and_update();
                    self.release_due(now).await;
                }
                next = self.inbound.rx.recv() => match next {
                    Some(interaction) => {
                        let now = *released.borrow();
                        self.intake(interaction, now).await;
                    }
                    None => break,
                },
            }
        }

        self.inbound.rx.close();
        let mut discarded = self.held.len() as u64;
        while self.inbound.rx.try_recv().is_ok() {
            discarded += 1;
        }
        self.stats.record_discarded_n(discarded);
        info!(federate = %self.local_name, discarded, "Dispatch loop stopped");
    }

    async fn intake(&mut self, interaction: InboundInteraction, now: LogicalTime) {
        match addressed_to_us(&interaction.tag, &self.local_name) {
            Ok(true) => {}
            Ok(false) => {
                self.stats.record_misaddressed();
                debug!(class = %interaction.class, "Interaction addressed to another federate");
                return;
            }
            Err(e) => {
                self.stats.record_decode_failure();
                warn!(class = %interaction.class, sender = %interaction.sender.federate, error = %e, "Dropping undecodable interaction");
                return;
            }
        }

        let decoded = match decode(&self.outbox.registry, interaction) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.record_decode_failure();
                warn!(error = %e, "Dropping undecodable interaction");
                return;
            }
        };

        match decoded.timestamp {
            Some(time) if time > now => {
                self.stats.record_held();
                self.arrivals += 1;
                debug!(class = %decoded.class_name, %time, released = %now, "Holding interaction until granted");
                self.held.push(Held {
                    time,
                    arrival: self.arrivals,
                    interaction: decoded,
                });
            }
            _ => self.deliver(decoded).await,
        }
    }

    async fn release_due(&mut self, now: LogicalTime) {
        if self.held.is_empty() {
            return;
        }
        let (mut due, keep): (Vec<Held>, Vec<Held>) =
            std::mem::take(&mut self.held).into_iter().partition(|h| h.time <= now);
        self.held = keep;
        due.sort_by(|a, b| {
            a.time
                .partial_cmp(&b.time)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.arrival.cmp(&b.arrival))
        });
        for held in due {
            self.deliver(held.interaction).await;
        }
    }

    async fn deliver(&mut self, interaction: DecodedInteraction) {
        let Some(indices) = self.routes.get(&interaction.class) else {
            self.stats.record_unhandled();
            debug!(class = %interaction.class_name, "No handler for interaction");
            return;
        };
        for &index in indices {
            self.handlers[index]
                .handle(interaction.clone(), &self.outbox)
                .await;
            self.stats.record_delivered();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{names, ClassManifest};
    use crate::test_support::ScriptedRti;
    use fedbridge_env::{FederateAmbassador, TokioContext};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    /// Records every handled interaction.
    struct Recorder {
        seen: Arc<Mutex<Vec<DecodedInteraction>>>,
    }

    #[async_trait]
    impl<Rti: RtiAmbassador + ?Sized> InteractionHandler<Rti> for Recorder {
        async fn handle(&mut self, interaction: DecodedInteraction, _outbox: &Outbox<Rti>) {
            self.seen.lock().unwrap().push(interaction);
        }
    }

    /// Forwards callbacks into the queue like the bridge does.
    struct QueueAmbassador(CallbackQueue);

    impl FederateAmbassador for QueueAmbassador {
        fn receive_interaction(&self, interaction: InboundInteraction) {
            self.0.push(interaction);
        }
        fn name_reservation_succeeded(&self, _: &str) {}
        fn name_reservation_failed(&self, _: &str) {}
        fn time_advance_grant(&self, _: LogicalTime) {}
    }

    struct Fixture {
        rti: Arc<ScriptedRti>,
        seen: Arc<Mutex<Vec<DecodedInteraction>>>,
        stats: Arc<DispatchStats>,
        released: watch::Sender<LogicalTime>,
        shutdown: Shutdown,
        task: JoinHandle<()>,
        outbox: Outbox<ScriptedRti>,
    }

    async fn fixture(local: &str) -> Fixture {
        let manifest = ClassManifest::control();
        let rti = ScriptedRti::with_manifest(&manifest);
        let stats = Arc::new(DispatchStats::default());
        let (queue, inbound) = inbound_queue(16, stats.clone());
        rti.connect("rti:8989", Arc::new(QueueAmbassador(queue)))
            .await
            .unwrap();

        let registry = Arc::new(ClassRegistry::resolve(rti.as_ref(), &manifest).await.unwrap());
        let outbox = Outbox::new(rti.clone(), registry.clone(), stats.clone());
        let mut dispatcher = InteractionDispatcher::new(outbox.clone(), inbound, local);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let load = registry.interaction(names::SCENARIO_LOAD).unwrap();
        let stop = registry.interaction(names::SCENARIO_STOP).unwrap();
        dispatcher
            .subscribe_all(&[load, stop], Box::new(Recorder { seen: seen.clone() }))
            .await
            .unwrap();
        let loaded = registry.interaction(names::SCENARIO_LOADED).unwrap();
        dispatcher.publish(loaded).await.unwrap();

        let (released, released_rx) = watch::channel(LogicalTime::ZERO);
        let shutdown = Shutdown::new();
        let task = dispatcher.start(&TokioContext::new(), released_rx, shutdown.clone());

        Fixture {
            rti,
            seen,
            stats,
            released,
            shutdown,
            task,
            outbox,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    fn seen_names(f: &Fixture) -> Vec<String> {
        f.seen
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.parameters.get(names::SC_NAME).cloned().unwrap_or_default())
            .collect()
    }

    #[tokio::test]
    async fn test_subscribe_registers_with_rti() {
        let f = fixture("fed-a").await;
        assert_eq!(f.rti.subscribed.lock().unwrap().len(), 2);
        assert!(f
            .outbox
            .is_published(f.rti.interaction_handle(names::SCENARIO_LOADED)));
    }

    #[tokio::test]
    async fn test_delivers_in_sender_order() {
        let f = fixture("fed-a").await;
        for name in ["one", "two", "three"] {
            f.rti.deliver(names::SCENARIO_LOAD, &[(names::SC_NAME, name)], 7, b"", None);
        }
        settle().await;

        assert_eq!(seen_names(&f), vec!["one", "two", "three"]);
        assert_eq!(f.stats.snapshot().delivered, 3);
    }

    #[tokio::test]
    async fn test_decode_failure_does_not_block_queue() {
        let f = fixture("fed-a").await;
        f.rti.deliver_raw(names::SCENARIO_LOAD, vec![(names::SC_NAME, vec![0xff, 0xfe])], 7, b"", None);
        f.rti.deliver(names::SCENARIO_LOAD, &[], 7, b"", None);
        f.rti.deliver(names::SCENARIO_LOAD, &[(names::SC_NAME, "good")], 7, b"", None);
        settle().await;

        assert_eq!(seen_names(&f), vec!["good"]);
        let counts = f.stats.snapshot();
        assert_eq!(counts.decode_failures, 2);
        assert_eq!(counts.delivered, 1);
    }

    #[tokio::test]
    async fn test_misaddressed_interactions_are_dropped() {
        let f = fixture("fed-a").await;
        f.rti.deliver(names::SCENARIO_LOAD, &[(names::SC_NAME, "x")], 7, b"fed-b", None);
        f.rti.deliver(names::SCENARIO_LOAD, &[(names::SC_NAME, "y")], 7, b"fed-a", None);
        settle().await;

        assert_eq!(seen_names(&f), vec!["y"]);
        assert_eq!(f.stats.snapshot().misaddressed, 1);
    }

    #[tokio::test]
    async fn test_unsubscribed_class_counts_as_unhandled() {
        let f = fixture("fed-a").await;
        f.rti.deliver(names::SCENARIO_PAUSE, &[(names::SC_NAME, "x")], 7, b"", None);
        settle().await;

        assert!(seen_names(&f).is_empty());
        assert_eq!(f.stats.snapshot().unhandled, 1);
    }

    #[tokio::test]
    async fn test_timestamped_interactions_wait_for_release() {
        let f = fixture("fed-a").await;
        f.rti.deliver(names::SCENARIO_LOAD, &[(names::SC_NAME, "late")], 7, b"", Some(LogicalTime(2.0)));
        f.rti.deliver(names::SCENARIO_LOAD, &[(names::SC_NAME, "early")], 8, b"", Some(LogicalTime(1.0)));
        f.rti.deliver(names::SCENARIO_LOAD, &[(names::SC_NAME, "now")], 7, b"", None);
        settle().await;
        assert_eq!(seen_names(&f), vec!["now"]);

        f.released.send_replace(LogicalTime(1.0));
        settle().await;
        assert_eq!(seen_names(&f), vec!["now", "early"]);

        f.released.send_replace(LogicalTime(2.0));
        settle().await;
        assert_eq!(seen_names(&f), vec!["now", "early", "late"]);
        assert_eq!(f.stats.snapshot().held_for_time, 2);
    }

    #[tokio::test]
    async fn test_send_republishes_once_on_unpublished() {
        let f = fixture("fed-a").await;
        let loaded = f.rti.interaction_handle(names::SCENARIO_LOADED);

        f.rti.unpublish_next_sends.store(1, Ordering::SeqCst);
        f.outbox
            .send(loaded, &[(names::FEDERATE_NAME, "fed-a")], None)
            .await
            .unwrap();
        assert_eq!(f.rti.sent_of(names::SCENARIO_LOADED).len(), 1);

        f.rti.unpublish_next_sends.store(2, Ordering::SeqCst);
        let err = f
            .outbox
            .send(loaded, &[(names::FEDERATE_NAME, "fed-a")], None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Rti(RtiError::InteractionClassNotPublished(_))
        ));
        assert_eq!(f.stats.snapshot().send_failures, 1);
    }

    #[tokio::test]
    async fn test_send_target_travels_in_tag() {
        let f = fixture("fed-a").await;
        let loaded = f.rti.interaction_handle(names::SCENARIO_LOADED);
        f.outbox
            .send(loaded, &[(names::FEDERATE_NAME, "fed-a")], Some("controller"))
            .await
            .unwrap();
        assert_eq!(f.rti.sent.lock().unwrap()[0].tag, b"controller".to_vec());
    }

    #[tokio::test]
    async fn test_shutdown_discards_pending() {
        let mut f = fixture("fed-a").await;
        f.rti.deliver(names::SCENARIO_LOAD, &[(names::SC_NAME, "held")], 7, b"", Some(LogicalTime(9.0)));
        settle().await;

        f.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), &mut f.task)
            .await
            .unwrap()
            .unwrap();

        // Callbacks after teardown are discarded, not queued.
        f.rti.deliver(names::SCENARIO_LOAD, &[(names::SC_NAME, "after")], 7, b"", None);
        assert!(seen_names(&f).is_empty());
        assert_eq!(f.stats.snapshot().discarded, 2);
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let stats = Arc::new(DispatchStats::default());
        let (queue, _inbound) = inbound_queue(1, stats.clone());
        let interaction = || InboundInteraction {
            class: InteractionClassHandle(1),
            parameters: ParameterMap::new(),
            sender: SenderInfo {
                federate: fedbridge_env::FederateHandle(7),
            },
            tag: Vec::new(),
            timestamp: None,
        };

        queue.push(interaction());
        queue.push(interaction());

        let counts = stats.snapshot();
        assert_eq!(counts.received, 1);
        assert_eq!(counts.overflow_drops, 1);
        assert_eq!(counts.discarded, 0);
    }
}
