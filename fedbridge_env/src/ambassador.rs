//! Bus collaborator abstraction: the RTI service and its callbacks.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::RtiError;
use crate::types::{
    AttributeHandle, FederateHandle, InboundInteraction, InteractionClassHandle, LogicalTime,
    Lookahead, ObjectClassHandle, ParameterHandle, ParameterMap, ResignAction,
};

/// Service calls the federate makes on the RTI, from the control thread.
///
/// # Implementations
///
/// - **Production**: an adapter over a vendor RTI binding
/// - **Simulation**: `SimRtiAmbassador` - in-memory federation with faults
///
/// # Call Flow
///
/// ```text
/// Bridge (control thread)         RTI                 Bridge (callback thread)
///   |-- connect(host, amb) ------->|                          |
///   |-- join(fed, federation) ---->|                          |
///   |-- reserve_name(X) ---------->|                          |
///   |                              |-- name_reserved(X) ----->|
///   |-- time_advance_request(t) -->|                          |
///   |                              |-- time_advance_grant(t)->|
///   |-- resign(action) ----------->|                          |
/// ```
#[async_trait]
pub trait RtiAmbassador: Send + Sync + 'static {
    /// Connects to the RTI at `address`, registering the callback sink.
    ///
    /// # Returns
    /// * `Ok(())` - Connected; callbacks may arrive from now on
    /// * `Err(RtiError::Unreachable)` - No RTI answered
    async fn connect(
        &self,
        address: &str,
        callbacks: Arc<dyn FederateAmbassador>,
    ) -> Result<(), RtiError>;

    /// Disconnects from the RTI. No callbacks arrive afterwards.
    async fn disconnect(&self) -> Result<(), RtiError>;

    /// Creates a federation execution from a FOM reference.
    async fn create_federation_execution(
        &self,
        federation: &str,
        fom: &str,
    ) -> Result<(), RtiError>;

    /// Joins an existing federation execution.
    ///
    /// # Returns
    /// * `Err(RtiError::FederationNotFound)` - The execution does not exist yet
    async fn join_federation_execution(
        &self,
        federate_name: &str,
        federation: &str,
        fom: &str,
    ) -> Result<FederateHandle, RtiError>;

    /// Resigns from the joined federation execution.
    async fn resign_federation_execution(&self, action: ResignAction) -> Result<(), RtiError>;

    /// Resolves an interaction class name.
    async fn get_interaction_class_handle(
        &self,
        name: &str,
    ) -> Result<InteractionClassHandle, RtiError>;

    /// Resolves a parameter name within an interaction class.
    async fn get_parameter_handle(
        &self,
        class: InteractionClassHandle,
        name: &str,
    ) -> Result<ParameterHandle, RtiError>;

    /// Resolves an object class name.
    async fn get_object_class_handle(&self, name: &str) -> Result<ObjectClassHandle, RtiError>;

    /// Resolves an attribute name within an object class.
    async fn get_attribute_handle(
        &self,
        class: ObjectClassHandle,
        name: &str,
    ) -> Result<AttributeHandle, RtiError>;

    /// Declares that this federate sends the interaction class.
    async fn publish_interaction_class(&self, class: InteractionClassHandle)
        -> Result<(), RtiError>;

    /// Declares interest in the interaction class.
    async fn subscribe_interaction_class(
        &self,
        class: InteractionClassHandle,
    ) -> Result<(), RtiError>;

    /// Sends an interaction.
    ///
    /// `timestamp` of `None` sends in receive order.
    async fn send_interaction(
        &self,
        class: InteractionClassHandle,
        parameters: ParameterMap,
        tag: Vec<u8>,
        timestamp: Option<LogicalTime>,
    ) -> Result<(), RtiError>;

    /// Requests a reservation of an object instance name.
    ///
    /// The outcome arrives later through
    /// [`FederateAmbassador::name_reservation_succeeded`] or
    /// [`FederateAmbassador::name_reservation_failed`].
    async fn reserve_object_instance_name(&self, name: &str) -> Result<(), RtiError>;

    /// Makes this federate time-regulating with the given lookahead.
    async fn enable_time_regulation(&self, lookahead: Lookahead) -> Result<(), RtiError>;

    /// Makes this federate time-constrained.
    async fn enable_time_constrained(&self) -> Result<(), RtiError>;

    /// Requests an advance to `time`.
    ///
    /// The grant arrives later through
    /// [`FederateAmbassador::time_advance_grant`].
    async fn time_advance_request(&self, time: LogicalTime) -> Result<(), RtiError>;
}

/// Notifications the RTI delivers on its callback thread.
///
/// Implementations must return quickly and must not call back into the
/// RTI: they hand work off to the control side and return.
pub trait FederateAmbassador: Send + Sync {
    /// An interaction of a subscribed class arrived.
    fn receive_interaction(&self, interaction: InboundInteraction);

    /// A name reservation was granted.
    fn name_reservation_succeeded(&self, name: &str);

    /// A name reservation was refused (name already taken).
    fn name_reservation_failed(&self, name: &str);

    /// The federation released this federate to `time`.
    fn time_advance_grant(&self, time: LogicalTime);
}
