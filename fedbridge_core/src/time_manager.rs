//! The Time Manager - logical time negotiation with the federation.
//!
//! # Phases
//!
//! ```text
//!            request_advance(t)          grant(t) via latch
//!   ┌──────┐ ─────────────────► ┌──────────────────┐ ─────────► ┌────────────────┐
//!   │ Idle │                    │ AdvanceRequested │            │ AdvanceGranted │
//!   └──────┘ ◄───────────────────────────────────────────────── └────────────────┘
//!                              consume_grant()
//! ```
//!
//! The grant is delivered on the RTI callback thread. It only ever writes
//! the single-slot [`GrantLatch`]; the phase moves to AdvanceGranted when
//! the control side observes the latch in [`TimeManager::await_grant`].

use fedbridge_env::{FederateContext, LogicalTime, Lookahead, RtiAmbassador};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::shutdown::Shutdown;

/// Time-advance phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdvancePhase {
    /// No request outstanding
    Idle,
    /// A request for the contained time was issued
    AdvanceRequested(LogicalTime),
    /// The federation released the federate to the contained time
    AdvanceGranted(LogicalTime),
}

/// Snapshot of the federate's time state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeState {
    /// Last time the federate consumed a grant for
    pub granted: LogicalTime,
    /// Fixed lookahead
    pub lookahead: Lookahead,
    /// Current phase
    pub phase: AdvancePhase,
}

/// Callback-thread side of the grant handoff.
///
/// Holds the only writer of the grant slot.
#[derive(Debug)]
pub struct GrantLatch {
    tx: watch::Sender<Option<LogicalTime>>,
}

impl GrantLatch {
    /// Records a grant. Never blocks.
    pub fn post(&self, time: LogicalTime) {
        self.tx.send_replace(Some(time));
    }
}

/// Tracks logical time and negotiates advances with the RTI.
pub struct TimeManager<Ctx, Rti>
where
    Ctx: FederateContext,
    Rti: RtiAmbassador + ?Sized,
{
    context: Arc<Ctx>,
    rti: Arc<Rti>,
    state: Mutex<TimeState>,
    grants: tokio::sync::Mutex<watch::Receiver<Option<LogicalTime>>>,
    released: watch::Sender<LogicalTime>,
    shutdown: Shutdown,
}

impl<Ctx, Rti> TimeManager<Ctx, Rti>
where
    Ctx: FederateContext,
    Rti: RtiAmbassador + ?Sized,
{
    /// Creates a manager at time zero and the latch its grants arrive on.
    pub fn new(
        context: Arc<Ctx>,
        rti: Arc<Rti>,
        lookahead: Lookahead,
        shutdown: Shutdown,
    ) -> (Self, GrantLatch) {
        let (grant_tx, grant_rx) = watch::channel(None);
        let (released, _) = watch::channel(LogicalTime::ZERO);
        let manager = Self {
            context,
            rti,
            state: Mutex::new(TimeState {
                granted: LogicalTime::ZERO,
                lookahead,
                phase: AdvancePhase::Idle,
            }),
            grants: tokio::sync::Mutex::new(grant_rx),
            released,
            shutdown,
        };
        (manager, GrantLatch { tx: grant_tx })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of the current time state.
    pub fn snapshot(&self) -> TimeState {
        *self.lock()
    }

    /// Returns the last consumed grant.
    pub fn granted(&self) -> LogicalTime {
        self.lock().granted
    }

    /// Returns true while a request is outstanding or a grant is unconsumed.
    pub fn is_advancing(&self) -> bool {
        !matches!(self.lock().phase, AdvancePhase::Idle)
    }

    /// Subscribes to the released time (updated by [`consume_grant`]).
    ///
    /// [`consume_grant`]: TimeManager::consume_grant
    pub fn released(&self) -> watch::Receiver<LogicalTime> {
        self.released.subscribe()
    }

    /// Earliest time stamp an outbound interaction may carry.
    pub fn earliest_send_time(&self) -> LogicalTime {
        let state = self.lock();
        state.granted.plus(state.lookahead)
    }

    /// Rejects time stamps inside the lookahead window.
    pub fn check_send_timestamp(&self, timestamp: LogicalTime) -> Result<(), BridgeError> {
        let earliest = self.earliest_send_time();
        if timestamp < earliest {
            return Err(BridgeError::InvalidTimestamp {
                requested: timestamp,
                earliest,
            });
        }
        Ok(())
    }

    /// Makes the federate time-regulating and/or time-constrained.
    pub async fn enable(&self, regulating: bool, constrained: bool) -> Result<(), BridgeError> {
        if regulating {
            let lookahead = self.lock().lookahead;
            self.rti.enable_time_regulation(lookahead).await?;
        }
        if constrained {
            self.rti.enable_time_constrained().await?;
        }
        info!(regulating, constrained, "Time management enabled");
        Ok(())
    }

    /// Issues a time-advance request (Idle → AdvanceRequested).
    ///
    /// `target` must be later than the last granted time and no further
    /// than one lookahead past it.
    pub async fn request_advance(&self, target: LogicalTime) -> Result<(), BridgeError> {
        {
            let mut state = self.lock();
            if state.phase != AdvancePhase::Idle {
                return Err(BridgeError::InvalidAdvance(format!(
                    "request for {target} while {:?}",
                    state.phase
                )));
            }
            if !target.value().is_finite() || target <= state.granted {
                return Err(BridgeError::InvalidAdvance(format!(
                    "{target} does not move past granted {}",
                    state.granted
                )));
            }
            let limit = state.granted.plus(state.lookahead);
            if target > limit {
                return Err(BridgeError::InvalidAdvance(format!(
                    "{target} is beyond granted {} plus lookahead ({limit})",
                    state.granted
                )));
            }
            // Set before the call so a fast grant always finds the request.
            state.phase = AdvancePhase::AdvanceRequested(target);
        }

        if let Err(e) = self.rti.time_advance_request(target).await {
            self.lock().phase = AdvancePhase::Idle;
            return Err(e.into());
        }
        debug!(%target, "Time advance requested");
        Ok(())
    }

    /// Requests an advance of exactly one lookahead.
    pub async fn advance_step(&self) -> Result<LogicalTime, BridgeError> {
        let target = self.earliest_send_time();
        self.request_advance(target).await?;
        Ok(target)
    }

    /// Waits for the outstanding request to be granted.
    ///
    /// Returns the granted time, [`BridgeError::AdvanceTimeout`] after
    /// `timeout`, or [`BridgeError::Resigned`] if the bridge resigns first.
    pub async fn await_grant(&self, timeout: Duration) -> Result<LogicalTime, BridgeError> {
        let target = match self.lock().phase {
            AdvancePhase::AdvanceRequested(target) => target,
            AdvancePhase::AdvanceGranted(time) => return Ok(time),
            AdvancePhase::Idle => {
                return Err(BridgeError::InvalidAdvance(
                    "await_grant without a request".into(),
                ))
            }
        };

        let floor = self.granted();
        let mut grants = self.grants.lock().await;
        let observed = async {
            grants
                .wait_for(|slot| match slot {
                    Some(time) if *time == target => true,
                    Some(time) if *time > floor => {
                        warn!(%time, %target, "Ignoring grant for a time that was not requested");
                        false
                    }
                    _ => false,
                })
                .await
                .map(|_| ())
        };

        tokio::select! {
            biased;
            result = observed => {
                if result.is_err() {
                    return Err(BridgeError::Resigned);
                }
            }
            _ = self.shutdown.triggered() => return Err(BridgeError::Resigned),
            _ = self.context.sleep(timeout) => {
                return Err(BridgeError::AdvanceTimeout(target, timeout.as_millis() as u64));
            }
        }

        let mut state = self.lock();
        if state.phase == AdvancePhase::AdvanceRequested(target) {
            state.phase = AdvancePhase::AdvanceGranted(target);
        }
        debug!(%target, "Time advance granted");
        Ok(target)
    }

    /// Consumes the grant (AdvanceGranted → Idle) and releases the new time.
    pub fn consume_grant(&self) -> Result<LogicalTime, BridgeError> {
        let time = {
            let mut state = self.lock();
            let AdvancePhase::AdvanceGranted(time) = state.phase else {
                return Err(BridgeError::InvalidAdvance(format!(
                    "consume_grant while {:?}",
                    state.phase
                )));
            };
            state.granted = time;
            state.phase = AdvancePhase::Idle;
            time
        };
        self.released.send_replace(time);
        Ok(time)
    }

    /// Request, wait and consume in one call.
    pub async fn advance_to(
        &self,
        target: LogicalTime,
        timeout: Duration,
    ) -> Result<LogicalTime, BridgeError> {
        self.request_advance(target).await?;
        self.await_grant(timeout).await?;
        self.consume_grant()
    }
}
