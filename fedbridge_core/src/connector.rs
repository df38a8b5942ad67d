//! The RTI Connector - connect, join, resign.
//!
//! The connector owns the bus session. Everything else borrows the
//! ambassador through it after [`RtiConnector::join`] succeeds.

use fedbridge_env::{
    FederateAmbassador, FederateContext, FederateHandle, ResignAction, RtiAmbassador, RtiError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{FederateIdentity, RetryPolicy};
use crate::error::BridgeError;

/// Lifecycle owner for one federate's bus session.
pub struct RtiConnector<Ctx, Rti>
where
    Ctx: FederateContext,
    Rti: RtiAmbassador + ?Sized,
{
    context: Arc<Ctx>,
    rti: Arc<Rti>,
    identity: FederateIdentity,
    resigned: AtomicBool,
}

impl<Ctx, Rti> RtiConnector<Ctx, Rti>
where
    Ctx: FederateContext,
    Rti: RtiAmbassador + ?Sized,
{
    pub fn new(context: Arc<Ctx>, rti: Arc<Rti>, identity: FederateIdentity) -> Self {
        Self {
            context,
            rti,
            identity,
            resigned: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &FederateIdentity {
        &self.identity
    }

    /// Opens the session and registers the callback sink.
    pub async fn connect(&self, callbacks: Arc<dyn FederateAmbassador>) -> Result<(), BridgeError> {
        let address = self.identity.rti_address();
        info!(%address, federate = %self.identity.federate_name, "Connecting to RTI");
        self.rti
            .connect(&address, callbacks)
            .await
            .map_err(|source| BridgeError::Connect { address, source })
    }

    /// Joins the federation execution, retrying while it does not exist.
    pub async fn join(
        &self,
        policy: &RetryPolicy,
        create_if_missing: bool,
    ) -> Result<FederateHandle, BridgeError> {
        let federation = &self.identity.federation_name;

        if create_if_missing {
            match self
                .rti
                .create_federation_execution(federation, &self.identity.fom_path)
                .await
            {
                Ok(()) => info!(%federation, "Created federation execution"),
                Err(RtiError::FederationAlreadyExists(_)) => {
                    debug!(%federation, "Federation execution already exists")
                }
                Err(source) => {
                    return Err(BridgeError::Join {
                        federation: federation.clone(),
                        attempts: 0,
                        source,
                    })
                }
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .rti
                .join_federation_execution(
                    &self.identity.federate_name,
                    federation,
                    &self.identity.fom_path,
                )
                .await
            {
                Ok(handle) => {
                    info!(%federation, federate = %self.identity.federate_name, %handle, attempt, "Joined federation");
                    return Ok(handle);
                }
                Err(RtiError::FederationNotFound(_)) if attempt < policy.max_attempts => {
                    let delay = policy.backoff(attempt)
                        + Duration::from_millis(self.context.random_below(policy.jitter_ms));
                    warn!(
                        %federation,
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Federation not found, retrying join"
                    );
                    self.context.sleep(delay).await;
                }
                Err(source) => {
                    return Err(BridgeError::Join {
                        federation: federation.clone(),
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }

    /// Returns true once [`resign`](Self::resign) has run.
    pub fn is_resigned(&self) -> bool {
        self.resigned.load(Ordering::SeqCst)
    }

    /// Resigns and disconnects. Only the first call talks to the bus.
    ///
    /// Both steps are attempted; the first failure is returned.
    pub async fn resign(&self, action: ResignAction) -> Result<(), BridgeError> {
        if self.resigned.swap(true, Ordering::SeqCst) {
            debug!(federate = %self.identity.federate_name, "Already resigned");
            return Ok(());
        }

        let resign = self.rti.resign_federation_execution(action).await;
        if let Err(e) = &resign {
            warn!(error = %e, "Resign failed, disconnecting anyway");
        }
        let disconnect = self.rti.disconnect().await;
        if let Err(e) = &disconnect {
            warn!(error = %e, "Disconnect failed");
        }
        info!(federate = %self.identity.federate_name, ?action, "Resigned from federation");

        resign?;
        disconnect?;
        Ok(())
    }
}
