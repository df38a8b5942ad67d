//! In-memory RTI with fault injection.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────────────── SimRti ─────────────────────────────┐
//!  │ catalogue · federations · members · reserved names · faults     │
//!  └───────▲──────────────────────▲──────────────────────▲───────────┘
//!          │ service calls        │                      │ controller
//!  ┌───────┴────────┐     ┌───────┴────────┐     ┌───────┴────────┐
//!  │SimRtiAmbassador│     │SimRtiAmbassador│     │SimRtiController│
//!  └───────┬────────┘     └───────┬────────┘     └────────────────┘
//!          ▼ std mpsc             ▼ std mpsc
//!   callback thread #1     callback thread #2   ──► FederateAmbassador
//! ```
//!
//! Every connected session owns one OS thread that invokes its
//! [`FederateAmbassador`], in the order the RTI queued the callbacks.
//!
//! Time management is conservative: a time-constrained federate is granted
//! `t` once every other time-regulating member of its federation has
//! committed to a time whose lookahead reaches `t`.

use async_trait::async_trait;
use fedbridge_core::ClassManifest;
use fedbridge_env::{
    AttributeHandle, FederateAmbassador, FederateHandle, InboundInteraction,
    InteractionClassHandle, LogicalTime, Lookahead, ObjectClassHandle, ParameterHandle,
    ParameterMap, ResignAction, RtiAmbassador, RtiError, SenderInfo,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Sender handle used for interactions injected by the controller.
pub const RTI_SENDER: FederateHandle = FederateHandle(0);

// =============================================================================
// CALLBACK DELIVERY
// =============================================================================

#[derive(Debug)]
enum Callback {
    Interaction(InboundInteraction),
    Reservation { name: String, succeeded: bool },
    Grant(LogicalTime),
}

#[derive(Debug)]
struct Delivery {
    not_before: Option<Instant>,
    callback: Callback,
}

type CallbackSender = mpsc::Sender<Delivery>;

fn spawn_callback_thread(
    label: String,
    ambassador: Arc<dyn FederateAmbassador>,
) -> Result<CallbackSender, RtiError> {
    let (tx, rx) = mpsc::channel::<Delivery>();
    std::thread::Builder::new()
        .name(format!("rti-callbacks-{label}"))
        .spawn(move || {
            for delivery in rx {
                if let Some(at) = delivery.not_before {
                    let now = Instant::now();
                    if at > now {
                        std::thread::sleep(at - now);
                    }
                }
                match delivery.callback {
                    Callback::Interaction(interaction) => ambassador.receive_interaction(interaction),
                    Callback::Reservation { name, succeeded: true } => {
                        ambassador.name_reservation_succeeded(&name)
                    }
                    Callback::Reservation { name, succeeded: false } => {
                        ambassador.name_reservation_failed(&name)
                    }
                    Callback::Grant(time) => ambassador.time_advance_grant(time),
                }
            }
            trace!(federate = %label, "Callback thread finished");
        })
        .map_err(|e| RtiError::internal(format!("callback thread: {e}")))?;
    Ok(tx)
}

fn post(tx: &CallbackSender, callback: Callback, delay: Duration) {
    let not_before = (!delay.is_zero()).then(|| Instant::now() + delay);
    // A closed channel means the session disconnected; the callback is moot.
    let _ = tx.send(Delivery {
        not_before,
        callback,
    });
}

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Default)]
struct Catalogue {
    interactions: HashMap<String, InteractionClassHandle>,
    interaction_names: HashMap<InteractionClassHandle, String>,
    parameters: HashMap<(InteractionClassHandle, String), ParameterHandle>,
    objects: HashMap<String, ObjectClassHandle>,
    attributes: HashMap<(ObjectClassHandle, String), AttributeHandle>,
}

impl Catalogue {
    fn from_manifest(fom: &ClassManifest) -> Self {
        let mut cat = Catalogue::default();
        let mut next = 1u32;
        for (class, params) in fom.interactions() {
            let handle = InteractionClassHandle(next);
            next += 1;
            cat.interactions.insert(class.clone(), handle);
            cat.interaction_names.insert(handle, class.clone());
            for param in params {
                cat.parameters
                    .insert((handle, param.clone()), ParameterHandle(next));
                next += 1;
            }
        }
        for (class, attrs) in fom.objects() {
            let handle = ObjectClassHandle(next);
            next += 1;
            cat.objects.insert(class.clone(), handle);
            for attr in attrs {
                cat.attributes
                    .insert((handle, attr.clone()), AttributeHandle(next));
                next += 1;
            }
        }
        cat
    }
}

#[derive(Debug)]
struct Member {
    name: String,
    federation: String,
    callbacks: CallbackSender,
    published: HashSet<InteractionClassHandle>,
    subscribed: HashSet<InteractionClassHandle>,
    regulating: Option<Lookahead>,
    constrained: bool,
    granted: LogicalTime,
    pending: Option<LogicalTime>,
}

impl Member {
    /// Earliest time this member may still send a time-stamped interaction.
    fn lower_bound(&self) -> Option<LogicalTime> {
        self.regulating
            .map(|lookahead| self.pending.unwrap_or(self.granted).plus(lookahead))
    }
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: bool,
    failing_joins: u32,
    failing_resigns: u32,
    failing_reservation_requests: u32,
    withhold_reservations: bool,
    reservation_delay: Duration,
    withhold_grants: bool,
}

#[derive(Debug, Default)]
struct RtiState {
    catalogue: Catalogue,
    federations: HashSet<String>,
    members: BTreeMap<FederateHandle, Member>,
    /// (federation, name) → owner
    reserved: HashMap<(String, String), FederateHandle>,
    next_federate: u32,
    faults: Faults,
}

impl RtiState {
    fn member(&self, federate: FederateHandle) -> Result<&Member, RtiError> {
        self.members.get(&federate).ok_or(RtiError::NotJoined)
    }

    fn member_mut(&mut self, federate: FederateHandle) -> Result<&mut Member, RtiError> {
        self.members.get_mut(&federate).ok_or(RtiError::NotJoined)
    }

    fn check_interaction(&self, class: InteractionClassHandle) -> Result<(), RtiError> {
        if self.catalogue.interaction_names.contains_key(&class) {
            Ok(())
        } else {
            Err(RtiError::InvalidHandle(class.to_string()))
        }
    }

    /// Issues every grant the federation's current commitments allow.
    fn evaluate_grants(&mut self, federation: &str) {
        if self.faults.withhold_grants {
            return;
        }
        let due: Vec<(FederateHandle, LogicalTime)> = self
            .members
            .iter()
            .filter(|(_, m)| m.federation == federation)
            .filter_map(|(handle, m)| m.pending.map(|t| (*handle, m, t)))
            .filter(|(handle, m, target)| {
                !m.constrained
                    || self
                        .members
                        .iter()
                        .filter(|(other, o)| *other != handle && o.federation == federation)
                        .filter_map(|(_, o)| o.lower_bound())
                        .all(|bound| *target <= bound)
            })
            .map(|(handle, _, target)| (handle, target))
            .collect();

        for (handle, time) in due {
            if let Some(member) = self.members.get_mut(&handle) {
                member.granted = time;
                member.pending = None;
                debug!(federate = %member.name, %time, "Granting time advance");
                post(&member.callbacks, Callback::Grant(time), Duration::ZERO);
            }
        }
    }

    fn deliver(
        &self,
        federation: &str,
        sender: FederateHandle,
        class: InteractionClassHandle,
        parameters: &ParameterMap,
        tag: &[u8],
        timestamp: Option<LogicalTime>,
    ) -> usize {
        let mut delivered = 0;
        for (handle, member) in &self.members {
            if *handle == sender
                || member.federation != federation
                || !member.subscribed.contains(&class)
            {
                continue;
            }
            let timestamp = timestamp.filter(|_| member.constrained);
            post(
                &member.callbacks,
                Callback::Interaction(InboundInteraction {
                    class,
                    parameters: parameters.clone(),
                    sender: SenderInfo { federate: sender },
                    tag: tag.to_vec(),
                    timestamp,
                }),
                Duration::ZERO,
            );
            delivered += 1;
        }
        delivered
    }

    fn release_names(&mut self, federate: FederateHandle) {
        self.reserved.retain(|_, owner| *owner != federate);
    }
}

// =============================================================================
// SIM RTI
// =============================================================================

/// The shared in-memory RTI.
#[derive(Debug)]
pub struct SimRti {
    state: Mutex<RtiState>,
}

impl SimRti {
    /// Creates an RTI whose class catalogue is `fom`.
    pub fn new(fom: &ClassManifest) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RtiState {
                catalogue: Catalogue::from_manifest(fom),
                next_federate: 1,
                ..RtiState::default()
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RtiState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a new, unconnected session.
    pub fn ambassador(self: &Arc<Self>) -> Arc<SimRtiAmbassador> {
        Arc::new(SimRtiAmbassador {
            rti: self.clone(),
            session: Mutex::new(Session::default()),
        })
    }

    /// Returns the fault-injection handle.
    pub fn controller(self: &Arc<Self>) -> SimRtiController {
        SimRtiController { rti: self.clone() }
    }
}

// =============================================================================
// SESSION
// =============================================================================

#[derive(Debug, Default)]
struct Session {
    label: String,
    callbacks: Option<CallbackSender>,
    federate: Option<FederateHandle>,
}

/// One federate's connection to the [`SimRti`].
#[derive(Debug)]
pub struct SimRtiAmbassador {
    rti: Arc<SimRti>,
    session: Mutex<Session>,
}

impl SimRtiAmbassador {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn joined(&self) -> Result<FederateHandle, RtiError> {
        let session = self.session();
        if session.callbacks.is_none() {
            return Err(RtiError::NotConnected);
        }
        session.federate.ok_or(RtiError::NotJoined)
    }

    /// Handle of the joined federate, if any.
    pub fn federate_handle(&self) -> Option<FederateHandle> {
        self.session().federate
    }

    fn leave(&self, state: &mut RtiState, federate: FederateHandle) {
        if let Some(member) = state.members.remove(&federate) {
            state.release_names(federate);
            info!(federate = %member.name, federation = %member.federation, "Federate left");
            state.evaluate_grants(&member.federation);
        }
    }
}

#[async_trait]
impl RtiAmbassador for SimRtiAmbassador {
    async fn connect(
        &self,
        address: &str,
        callbacks: Arc<dyn FederateAmbassador>,
    ) -> Result<(), RtiError> {
        if self.rti.lock().faults.unreachable {
            return Err(RtiError::Unreachable(address.to_string()));
        }
        let mut session = self.session();
        if session.callbacks.is_some() {
            return Err(RtiError::internal("session already connected"));
        }
        session.label = address.to_string();
        session.callbacks = Some(spawn_callback_thread(address.to_string(), callbacks)?);
        debug!(%address, "Session connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RtiError> {
        let (callbacks, federate) = {
            let mut session = self.session();
            (session.callbacks.take(), session.federate.take())
        };
        if callbacks.is_none() {
            return Err(RtiError::NotConnected);
        }
        if let Some(federate) = federate {
            warn!(%federate, "Disconnect without resign, removing federate");
            let mut state = self.rti.lock();
            self.leave(&mut state, federate);
        }
        // Dropping the sender ends the callback thread.
        drop(callbacks);
        Ok(())
    }

    async fn create_federation_execution(&self, federation: &str, _fom: &str) -> Result<(), RtiError> {
        if self.session().callbacks.is_none() {
            return Err(RtiError::NotConnected);
        }
        let mut state = self.rti.lock();
        if !state.federations.insert(federation.to_string()) {
            return Err(RtiError::FederationAlreadyExists(federation.to_string()));
        }
        info!(%federation, "Federation execution created");
        Ok(())
    }

    async fn join_federation_execution(
        &self,
        federate_name: &str,
        federation: &str,
        _fom: &str,
    ) -> Result<FederateHandle, RtiError> {
        let callbacks = {
            let session = self.session();
            if session.federate.is_some() {
                return Err(RtiError::internal("session already joined"));
            }
            session.callbacks.clone().ok_or(RtiError::NotConnected)?
        };

        let mut state = self.rti.lock();
        if state.faults.failing_joins > 0 {
            state.faults.failing_joins -= 1;
            return Err(RtiError::FederationNotFound(federation.to_string()));
        }
        if !state.federations.contains(federation) {
            return Err(RtiError::FederationNotFound(federation.to_string()));
        }
        if state
            .members
            .values()
            .any(|m| m.federation == federation && m.name == federate_name)
        {
            return Err(RtiError::FederateNameInUse(federate_name.to_string()));
        }

        let handle = FederateHandle(state.next_federate);
        state.next_federate += 1;
        state.members.insert(
            handle,
            Member {
                name: federate_name.to_string(),
                federation: federation.to_string(),
                callbacks,
                published: HashSet::new(),
                subscribed: HashSet::new(),
                regulating: None,
                constrained: false,
                granted: LogicalTime::ZERO,
                pending: None,
            },
        );
        drop(state);

        let mut session = self.session();
        session.federate = Some(handle);
        session.label = federate_name.to_string();
        info!(federate = %federate_name, %federation, %handle, "Federate joined");
        Ok(handle)
    }

    async fn resign_federation_execution(&self, action: ResignAction) -> Result<(), RtiError> {
        let federate = self.joined()?;
        {
            let mut state = self.rti.lock();
            if state.faults.failing_resigns > 0 {
                state.faults.failing_resigns -= 1;
                return Err(RtiError::internal("resign lost"));
            }
        }
        self.session().federate = None;
        debug!(%federate, ?action, "Resign requested");
        let mut state = self.rti.lock();
        self.leave(&mut state, federate);
        Ok(())
    }

    async fn get_interaction_class_handle(
        &self,
        name: &str,
    ) -> Result<InteractionClassHandle, RtiError> {
        self.joined()?;
        self.rti
            .lock()
            .catalogue
            .interactions
            .get(name)
            .copied()
            .ok_or_else(|| RtiError::NameNotFound(name.to_string()))
    }

    async fn get_parameter_handle(
        &self,
        class: InteractionClassHandle,
        name: &str,
    ) -> Result<ParameterHandle, RtiError> {
        self.joined()?;
        let state = self.rti.lock();
        state.check_interaction(class)?;
        state
            .catalogue
            .parameters
            .get(&(class, name.to_string()))
            .copied()
            .ok_or_else(|| RtiError::NameNotFound(name.to_string()))
    }

    async fn get_object_class_handle(&self, name: &str) -> Result<ObjectClassHandle, RtiError> {
        self.joined()?;
        self.rti
            .lock()
            .catalogue
            .objects
            .get(name)
            .copied()
            .ok_or_else(|| RtiError::NameNotFound(name.to_string()))
    }

    async fn get_attribute_handle(
        &self,
        class: ObjectClassHandle,
        name: &str,
    ) -> Result<AttributeHandle, RtiError> {
        self.joined()?;
        self.rti
            .lock()
            .catalogue
            .attributes
            .get(&(class, name.to_string()))
            .copied()
            .ok_or_else(|| RtiError::NameNotFound(name.to_string()))
    }

    async fn publish_interaction_class(
        &self,
        class: InteractionClassHandle,
    ) -> Result<(), RtiError> {
        let federate = self.joined()?;
        let mut state = self.rti.lock();
        state.check_interaction(class)?;
        state.member_mut(federate)?.published.insert(class);
        Ok(())
    }

    async fn subscribe_interaction_class(
        &self,
        class: InteractionClassHandle,
    ) -> Result<(), RtiError> {
        let federate = self.joined()?;
        let mut state = self.rti.lock();
        state.check_interaction(class)?;
        state.member_mut(federate)?.subscribed.insert(class);
        Ok(())
    }

    async fn send_interaction(
        &self,
        class: InteractionClassHandle,
        parameters: ParameterMap,
        tag: Vec<u8>,
        timestamp: Option<LogicalTime>,
    ) -> Result<(), RtiError> {
        let federate = self.joined()?;
        let state = self.rti.lock();
        state.check_interaction(class)?;
        let member = state.member(federate)?;
        if !member.published.contains(&class) {
            return Err(RtiError::InteractionClassNotPublished(class.to_string()));
        }
        for handle in parameters.keys() {
            if !state.catalogue.parameters.iter().any(|((c, _), h)| *c == class && h == handle) {
                return Err(RtiError::InvalidHandle(handle.to_string()));
            }
        }

        // Only a regulating federate's time stamps are honoured.
        let timestamp = match (timestamp, member.lower_bound()) {
            (Some(time), Some(bound)) if time < bound => {
                return Err(RtiError::InvalidLogicalTime(format!(
                    "{time} is earlier than {bound}"
                )))
            }
            (Some(time), Some(_)) => Some(time),
            _ => None,
        };

        let federation = member.federation.clone();
        let delivered = state.deliver(&federation, federate, class, &parameters, &tag, timestamp);
        trace!(%federate, %class, delivered, "Interaction sent");
        Ok(())
    }

    async fn reserve_object_instance_name(&self, name: &str) -> Result<(), RtiError> {
        let federate = self.joined()?;
        let mut state = self.rti.lock();
        if state.faults.failing_reservation_requests > 0 {
            state.faults.failing_reservation_requests -= 1;
            return Err(RtiError::internal("reservation request dropped"));
        }
        let member = state.member(federate)?;
        let federation = member.federation.clone();
        let callbacks = member.callbacks.clone();

        let owner = *state
            .reserved
            .entry((federation, name.to_string()))
            .or_insert(federate);
        let succeeded = owner == federate;

        if state.faults.withhold_reservations {
            debug!(name, succeeded, "Withholding reservation callback");
            return Ok(());
        }
        post(
            &callbacks,
            Callback::Reservation {
                name: name.to_string(),
                succeeded,
            },
            state.faults.reservation_delay,
        );
        Ok(())
    }

    async fn enable_time_regulation(&self, lookahead: Lookahead) -> Result<(), RtiError> {
        let federate = self.joined()?;
        let mut state = self.rti.lock();
        let member = state.member_mut(federate)?;
        member.regulating = Some(lookahead);
        let federation = member.federation.clone();
        state.evaluate_grants(&federation);
        Ok(())
    }

    async fn enable_time_constrained(&self) -> Result<(), RtiError> {
        let federate = self.joined()?;
        self.rti.lock().member_mut(federate)?.constrained = true;
        Ok(())
    }

    async fn time_advance_request(&self, time: LogicalTime) -> Result<(), RtiError> {
        let federate = self.joined()?;
        let mut state = self.rti.lock();
        let member = state.member_mut(federate)?;
        if member.pending.is_some() {
            return Err(RtiError::InTimeAdvancingState);
        }
        if time <= member.granted {
            return Err(RtiError::InvalidLogicalTime(format!(
                "{time} is not after {}",
                member.granted
            )));
        }
        member.pending = Some(time);
        let federation = member.federation.clone();
        state.evaluate_grants(&federation);
        Ok(())
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

/// Fault injection and inspection for a [`SimRti`].
#[derive(Debug, Clone)]
pub struct SimRtiController {
    rti: Arc<SimRti>,
}

impl SimRtiController {
    /// Creates a federation execution directly.
    pub fn create_federation(&self, federation: &str) {
        self.rti.lock().federations.insert(federation.to_string());
    }

    /// Makes `connect` fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.rti.lock().faults.unreachable = unreachable;
    }

    /// Fails the next `count` joins as if the federation did not exist.
    pub fn fail_next_joins(&self, count: u32) {
        self.rti.lock().faults.failing_joins = count;
    }

    /// Fails the next `count` resigns; the federate stays joined.
    pub fn fail_next_resigns(&self, count: u32) {
        self.rti.lock().faults.failing_resigns = count;
    }

    /// Fails the next `count` reservation requests transiently.
    pub fn fail_next_reservation_requests(&self, count: u32) {
        self.rti.lock().faults.failing_reservation_requests = count;
    }

    /// Suppresses reservation callbacks (requests are still recorded).
    pub fn withhold_reservations(&self, withhold: bool) {
        self.rti.lock().faults.withhold_reservations = withhold;
    }

    /// Delays reservation callbacks.
    pub fn delay_reservations(&self, delay: Duration) {
        self.rti.lock().faults.reservation_delay = delay;
    }

    /// Suppresses time-advance grants. Releasing re-evaluates every request.
    pub fn withhold_grants(&self, withhold: bool) {
        let mut state = self.rti.lock();
        state.faults.withhold_grants = withhold;
        if !withhold {
            let federations: Vec<String> = state.federations.iter().cloned().collect();
            for federation in federations {
                state.evaluate_grants(&federation);
            }
        }
    }

    /// Withdraws a federate's publication of `class`, as a racing
    /// unpublish would. Returns false if nothing was withdrawn.
    pub fn force_unpublish(&self, federate_name: &str, class: &str) -> bool {
        let mut state = self.rti.lock();
        let Some(handle) = state.catalogue.interactions.get(class).copied() else {
            return false;
        };
        state
            .members
            .values_mut()
            .find(|m| m.name == federate_name)
            .map(|m| m.published.remove(&handle))
            .unwrap_or(false)
    }

    /// Delivers an interaction with arbitrary parameter bytes to every
    /// subscriber in `federation`. Returns the number of recipients.
    pub fn inject(
        &self,
        federation: &str,
        class: &str,
        parameters: Vec<(&str, Vec<u8>)>,
        tag: &[u8],
        timestamp: Option<LogicalTime>,
    ) -> Result<usize, RtiError> {
        let state = self.rti.lock();
        let handle = state
            .catalogue
            .interactions
            .get(class)
            .copied()
            .ok_or_else(|| RtiError::NameNotFound(class.to_string()))?;
        let mut encoded = ParameterMap::new();
        for (name, value) in parameters {
            let param = state
                .catalogue
                .parameters
                .get(&(handle, name.to_string()))
                .copied()
                .ok_or_else(|| RtiError::NameNotFound(name.to_string()))?;
            encoded.insert(param, value);
        }
        Ok(state.deliver(federation, RTI_SENDER, handle, &encoded, tag, timestamp))
    }

    /// Names of the federates joined to `federation`.
    pub fn federates(&self, federation: &str) -> Vec<String> {
        self.rti
            .lock()
            .members
            .values()
            .filter(|m| m.federation == federation)
            .map(|m| m.name.clone())
            .collect()
    }

    /// Last granted time of a federate.
    pub fn granted_time(&self, federate_name: &str) -> Option<LogicalTime> {
        self.rti
            .lock()
            .members
            .values()
            .find(|m| m.name == federate_name)
            .map(|m| m.granted)
    }

    /// Current owner name of a reserved object-instance name.
    pub fn reservation_owner(&self, federation: &str, name: &str) -> Option<String> {
        let state = self.rti.lock();
        let owner = state
            .reserved
            .get(&(federation.to_string(), name.to_string()))?;
        state.members.get(owner).map(|m| m.name.clone())
    }
}
