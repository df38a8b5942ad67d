//! RTI callback entry points.
//!
//! Everything here runs on the RTI's callback thread. Each callback hands
//! its payload to the component that owns it and returns; no callback
//! blocks, waits on the control thread, or runs user code. Once the
//! bridge starts resigning, inbound interactions are counted and dropped.

use fedbridge_env::{FederateAmbassador, InboundInteraction, LogicalTime};
use tracing::trace;

use crate::dispatcher::CallbackQueue;
use crate::reservation::ReservationSink;
use crate::shutdown::Shutdown;
use crate::time_manager::GrantLatch;

/// The bridge's [`FederateAmbassador`].
pub struct BridgeCallbacks {
    inbound: CallbackQueue,
    reservations: ReservationSink,
    grants: GrantLatch,
    shutdown: Shutdown,
}

impl BridgeCallbacks {
    pub fn new(
        inbound: CallbackQueue,
        reservations: ReservationSink,
        grants: GrantLatch,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            inbound,
            reservations,
            grants,
            shutdown,
        }
    }
}

impl FederateAmbassador for BridgeCallbacks {
    fn receive_interaction(&self, interaction: InboundInteraction) {
        trace!(class = %interaction.class, sender = %interaction.sender.federate, "Interaction callback");
        if self.shutdown.is_triggered() {
            self.inbound.discard(interaction);
        } else {
            self.inbound.push(interaction);
        }
    }

    fn name_reservation_succeeded(&self, name: &str) {
        self.reservations.resolve(name, true);
    }

    fn name_reservation_failed(&self, name: &str) {
        self.reservations.resolve(name, false);
    }

    fn time_advance_grant(&self, time: LogicalTime) {
        trace!(%time, "Grant callback");
        self.grants.post(time);
    }
}
