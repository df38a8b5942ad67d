//! A bare federate that talks to the [`SimRti`] directly.
//!
//! Scenarios use it as the exercise director: it issues scenario commands
//! and records every interaction it is subscribed to, without any of the
//! bridge's queuing, addressing or time management in the way.

use fedbridge_core::dispatcher::decode;
use fedbridge_core::{BridgeError, ClassManifest, ClassRegistry, DecodedInteraction};
use fedbridge_env::{
    FederateAmbassador, FederateHandle, InboundInteraction, LogicalTime, ParameterMap,
    ResignAction, RtiAmbassador,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::warn;

use crate::rti::{SimRti, SimRtiAmbassador};

#[derive(Default)]
struct ProbeInbox {
    interactions: Mutex<Vec<InboundInteraction>>,
    notify: Notify,
}

impl FederateAmbassador for ProbeInbox {
    fn receive_interaction(&self, interaction: InboundInteraction) {
        self.interactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(interaction);
        self.notify.notify_waiters();
    }

    fn name_reservation_succeeded(&self, _name: &str) {}

    fn name_reservation_failed(&self, _name: &str) {}

    fn time_advance_grant(&self, _time: LogicalTime) {}
}

/// Directly joined federate used to drive and observe scenarios.
pub struct ProbeFederate {
    rti: Arc<SimRtiAmbassador>,
    registry: ClassRegistry,
    inbox: Arc<ProbeInbox>,
    federate: FederateHandle,
}

impl ProbeFederate {
    /// Connects, joins `federation` and resolves `manifest`.
    pub async fn join(
        rti: &Arc<SimRti>,
        name: &str,
        federation: &str,
        manifest: &ClassManifest,
    ) -> Result<Self, BridgeError> {
        let ambassador = rti.ambassador();
        let inbox = Arc::new(ProbeInbox::default());
        ambassador
            .connect(&format!("probe-{name}"), inbox.clone())
            .await?;
        let federate = ambassador
            .join_federation_execution(name, federation, "fom.xml")
            .await?;
        let registry = ClassRegistry::resolve(ambassador.as_ref(), manifest).await?;
        Ok(Self {
            rti: ambassador,
            registry,
            inbox,
            federate,
        })
    }

    pub fn federate_handle(&self) -> FederateHandle {
        self.federate
    }

    pub async fn publish(&self, class: &str) -> Result<(), BridgeError> {
        let handle = self.registry.interaction(class)?;
        Ok(self.rti.publish_interaction_class(handle).await?)
    }

    pub async fn subscribe(&self, class: &str) -> Result<(), BridgeError> {
        let handle = self.registry.interaction(class)?;
        Ok(self.rti.subscribe_interaction_class(handle).await?)
    }

    /// Sends text parameters, optionally addressed to one federate.
    pub async fn send(
        &self,
        class: &str,
        parameters: &[(&str, &str)],
        target: Option<&str>,
    ) -> Result<(), BridgeError> {
        let handle = self.registry.interaction(class)?;
        let mut encoded = ParameterMap::new();
        for (name, value) in parameters {
            encoded.insert(
                self.registry.parameter(handle, name)?,
                value.as_bytes().to_vec(),
            );
        }
        let tag = target.map(|t| t.as_bytes().to_vec()).unwrap_or_default();
        Ok(self.rti.send_interaction(handle, encoded, tag, None).await?)
    }

    /// Decoded interactions of `class` received so far.
    pub fn received(&self, class: &str) -> Vec<DecodedInteraction> {
        let Ok(handle) = self.registry.interaction(class) else {
            return Vec::new();
        };
        self.inbox
            .interactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|i| i.class == handle)
            .filter_map(|i| match decode(&self.registry, i.clone()) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    warn!(%class, error = %e, "Probe received undecodable interaction");
                    None
                }
            })
            .collect()
    }

    /// Waits until at least `count` interactions of `class` arrived.
    ///
    /// Returns what was received, which is shorter than `count` on timeout.
    pub async fn wait_for(
        &self,
        class: &str,
        count: usize,
        timeout: Duration,
    ) -> Vec<DecodedInteraction> {
        let wait = async {
            loop {
                let notified = self.inbox.notify.notified();
                if self.received(class).len() >= count {
                    return;
                }
                notified.await;
            }
        };
        // Timing out is reported through the short result.
        let _ = tokio::time::timeout(timeout, wait).await;
        self.received(class)
    }

    /// Resigns and disconnects.
    pub async fn leave(&self) -> Result<(), BridgeError> {
        self.rti
            .resign_federation_execution(ResignAction::NoAction)
            .await?;
        Ok(self.rti.disconnect().await?)
    }
}
