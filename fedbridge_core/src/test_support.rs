//! Scripted in-process RTI and engine used by the unit tests.

use async_trait::async_trait;
use fedbridge_env::{
    AttributeHandle, FederateAmbassador, FederateHandle, InboundInteraction,
    InteractionClassHandle, LogicalTime, Lookahead, ObjectClassHandle, ParameterHandle,
    ParameterMap, ResignAction, RtiAmbassador, RtiError, SenderInfo,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::{EngineError, EngineStatus, LocalEngine};
use crate::registry::ClassManifest;

/// A sent interaction as recorded by [`ScriptedRti`].
#[derive(Debug, Clone)]
pub struct SentInteraction {
    pub class: InteractionClassHandle,
    pub parameters: ParameterMap,
    pub tag: Vec<u8>,
    pub timestamp: Option<LogicalTime>,
}

#[derive(Default)]
struct Catalogue {
    interactions: HashMap<String, InteractionClassHandle>,
    parameters: HashMap<(InteractionClassHandle, String), ParameterHandle>,
    objects: HashMap<String, ObjectClassHandle>,
    attributes: HashMap<(ObjectClassHandle, String), AttributeHandle>,
}

/// Minimal RTI whose behaviour is scripted per test.
#[derive(Default)]
pub struct ScriptedRti {
    catalogue: Mutex<Catalogue>,
    callbacks: Mutex<Option<Arc<dyn FederateAmbassador>>>,
    pub unreachable: std::sync::atomic::AtomicBool,
    pub join_failures_remaining: AtomicU32,
    pub join_attempts: AtomicU32,
    pub lookups: AtomicUsize,
    pub published: Mutex<HashSet<InteractionClassHandle>>,
    pub subscribed: Mutex<HashSet<InteractionClassHandle>>,
    pub sent: Mutex<Vec<SentInteraction>>,
    pub reservations: Mutex<Vec<String>>,
    pub advance_requests: Mutex<Vec<LogicalTime>>,
    pub resigned: Mutex<Vec<ResignAction>>,
    pub disconnects: AtomicU32,
    /// Number of upcoming sends that fail with "not published"
    pub unpublish_next_sends: AtomicU32,
    /// Number of upcoming reservation requests that fail transiently
    pub fail_next_reservations: AtomicU32,
}

impl ScriptedRti {
    /// Creates an RTI whose catalogue holds everything in `manifest`.
    pub fn with_manifest(manifest: &ClassManifest) -> Arc<Self> {
        let rti = Self::default();
        {
            let mut cat = rti.catalogue.lock().unwrap();
            let mut next = 1u32;
            for (class, params) in manifest.interactions() {
                let handle = InteractionClassHandle(next);
                next += 1;
                cat.interactions.insert(class.clone(), handle);
                for param in params {
                    cat.parameters
                        .insert((handle, param.clone()), ParameterHandle(next));
                    next += 1;
                }
            }
            for (class, attrs) in manifest.objects() {
                let handle = ObjectClassHandle(next);
                next += 1;
                cat.objects.insert(class.clone(), handle);
                for attr in attrs {
                    cat.attributes
                        .insert((handle, attr.clone()), AttributeHandle(next));
                    next += 1;
                }
            }
        }
        Arc::new(rti)
    }

    /// Removes an interaction class from the catalogue.
    pub fn forget_interaction(&self, name: &str) {
        self.catalogue.lock().unwrap().interactions.remove(name);
    }

    pub fn interaction_handle(&self, name: &str) -> InteractionClassHandle {
        self.catalogue.lock().unwrap().interactions[name]
    }

    pub fn parameter_handle(&self, class: &str, param: &str) -> ParameterHandle {
        let cat = self.catalogue.lock().unwrap();
        let handle = cat.interactions[class];
        cat.parameters[&(handle, param.to_string())]
    }

    fn callbacks(&self) -> Arc<dyn FederateAmbassador> {
        self.callbacks
            .lock()
            .unwrap()
            .clone()
            .expect("not connected")
    }

    /// Delivers a text-valued interaction as the callback thread would.
    pub fn deliver(
        &self,
        class: &str,
        params: &[(&str, &str)],
        sender: u32,
        tag: &[u8],
        timestamp: Option<LogicalTime>,
    ) {
        let raw = params
            .iter()
            .map(|(name, value)| (*name, value.as_bytes().to_vec()))
            .collect();
        self.deliver_raw(class, raw, sender, tag, timestamp);
    }

    /// Delivers an interaction with arbitrary parameter bytes.
    pub fn deliver_raw(
        &self,
        class: &str,
        params: Vec<(&str, Vec<u8>)>,
        sender: u32,
        tag: &[u8],
        timestamp: Option<LogicalTime>,
    ) {
        let class_handle = self.interaction_handle(class);
        let parameters = params
            .into_iter()
            .map(|(name, value)| (self.parameter_handle(class, name), value))
            .collect();
        self.callbacks().receive_interaction(InboundInteraction {
            class: class_handle,
            parameters,
            sender: SenderInfo {
                federate: FederateHandle(sender),
            },
            tag: tag.to_vec(),
            timestamp,
        });
    }

    pub fn grant(&self, time: LogicalTime) {
        self.callbacks().time_advance_grant(time);
    }

    pub fn reservation_succeeded(&self, name: &str) {
        self.callbacks().name_reservation_succeeded(name);
    }

    pub fn reservation_failed(&self, name: &str) {
        self.callbacks().name_reservation_failed(name);
    }

    /// Sent interactions of one class, decoded to `(param, text)` pairs.
    pub fn sent_of(&self, class: &str) -> Vec<HashMap<String, String>> {
        let handle = self.interaction_handle(class);
        let cat = self.catalogue.lock().unwrap();
        let names: HashMap<ParameterHandle, String> = cat
            .parameters
            .iter()
            .filter(|((c, _), _)| *c == handle)
            .map(|((_, n), h)| (*h, n.clone()))
            .collect();
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.class == handle)
            .map(|s| {
                s.parameters
                    .iter()
                    .map(|(h, v)| (names[h].clone(), String::from_utf8_lossy(v).into_owned()))
                    .collect()
            })
            .collect()
    }
}

#[async_trait]
impl RtiAmbassador for ScriptedRti {
    async fn connect(
        &self,
        address: &str,
        callbacks: Arc<dyn FederateAmbassador>,
    ) -> Result<(), RtiError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RtiError::Unreachable(address.to_string()));
        }
        *self.callbacks.lock().unwrap() = Some(callbacks);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RtiError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_federation_execution(&self, _: &str, _: &str) -> Result<(), RtiError> {
        Ok(())
    }

    async fn join_federation_execution(
        &self,
        _federate_name: &str,
        federation: &str,
        _fom: &str,
    ) -> Result<FederateHandle, RtiError> {
        self.join_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.join_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.join_failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(RtiError::FederationNotFound(federation.to_string()));
        }
        Ok(FederateHandle(1))
    }

    async fn resign_federation_execution(&self, action: ResignAction) -> Result<(), RtiError> {
        self.resigned.lock().unwrap().push(action);
        Ok(())
    }

    async fn get_interaction_class_handle(
        &self,
        name: &str,
    ) -> Result<InteractionClassHandle, RtiError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.catalogue
            .lock()
            .unwrap()
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
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.catalogue
            .lock()
            .unwrap()
            .parameters
            .get(&(class, name.to_string()))
            .copied()
            .ok_or_else(|| RtiError::NameNotFound(name.to_string()))
    }

    async fn get_object_class_handle(&self, name: &str) -> Result<ObjectClassHandle, RtiError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.catalogue
            .lock()
            .unwrap()
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
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.catalogue
            .lock()
            .unwrap()
            .attributes
            .get(&(class, name.to_string()))
            .copied()
            .ok_or_else(|| RtiError::NameNotFound(name.to_string()))
    }

    async fn publish_interaction_class(
        &self,
        class: InteractionClassHandle,
    ) -> Result<(), RtiError> {
        self.published.lock().unwrap().insert(class);
        Ok(())
    }

    async fn subscribe_interaction_class(
        &self,
        class: InteractionClassHandle,
    ) -> Result<(), RtiError> {
        self.subscribed.lock().unwrap().insert(class);
        Ok(())
    }

    async fn send_interaction(
        &self,
        class: InteractionClassHandle,
        parameters: ParameterMap,
        tag: Vec<u8>,
        timestamp: Option<LogicalTime>,
    ) -> Result<(), RtiError> {
        let forced = self.unpublish_next_sends.load(Ordering::SeqCst);
        if forced > 0 {
            self.unpublish_next_sends.store(forced - 1, Ordering::SeqCst);
            return Err(RtiError::InteractionClassNotPublished(class.to_string()));
        }
        if !self.published.lock().unwrap().contains(&class) {
            return Err(RtiError::InteractionClassNotPublished(class.to_string()));
        }
        self.sent.lock().unwrap().push(SentInteraction {
            class,
            parameters,
            tag,
            timestamp,
        });
        Ok(())
    }

    async fn reserve_object_instance_name(&self, name: &str) -> Result<(), RtiError> {
        let forced = self.fail_next_reservations.load(Ordering::SeqCst);
        if forced > 0 {
            self.fail_next_reservations.store(forced - 1, Ordering::SeqCst);
            return Err(RtiError::internal("reservation request lost"));
        }
        self.reservations.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn enable_time_regulation(&self, _lookahead: Lookahead) -> Result<(), RtiError> {
        Ok(())
    }

    async fn enable_time_constrained(&self) -> Result<(), RtiError> {
        Ok(())
    }

    async fn time_advance_request(&self, time: LogicalTime) -> Result<(), RtiError> {
        self.advance_requests.lock().unwrap().push(time);
        Ok(())
    }
}

/// Engine whose readiness is scripted per test.
pub struct ScriptedEngine {
    /// (busy polls remaining, status after that); `u32::MAX` stays busy
    script: Mutex<(u32, EngineStatus)>,
    pub starts: AtomicU32,
    pub pauses: AtomicU32,
    pub stops: AtomicU32,
}

impl ScriptedEngine {
    fn scripted(busy: u32, status: EngineStatus) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new((busy, status)),
            starts: AtomicU32::new(0),
            pauses: AtomicU32::new(0),
            stops: AtomicU32::new(0),
        })
    }

    /// Reports Busy for `polls` status calls, then Ready.
    pub fn ready_after(polls: u32) -> Arc<Self> {
        Self::scripted(polls, EngineStatus::Ready)
    }

    /// Reports Failed immediately.
    pub fn failing(detail: &str) -> Arc<Self> {
        Self::scripted(0, EngineStatus::Failed(detail.to_string()))
    }

    pub fn set_status(&self, status: EngineStatus) {
        *self.script.lock().unwrap() = (0, status);
    }
}

#[async_trait]
impl LocalEngine for ScriptedEngine {
    async fn start_simulation(&self) -> Result<(), EngineError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pause_simulation(&self) -> Result<(), EngineError> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_simulation(&self) -> Result<(), EngineError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn status(&self) -> EngineStatus {
        let mut script = self.script.lock().unwrap();
        match script.0 {
            0 => script.1.clone(),
            u32::MAX => EngineStatus::Busy,
            _ => {
                script.0 -= 1;
                EngineStatus::Busy
            }
        }
    }
}
