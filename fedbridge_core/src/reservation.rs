//! The Reservation Synchronizer - blocking object-instance name handshake.
//!
//! A reservation is a request on the control thread answered later by a
//! callback on the RTI thread. Each request gets a ticket whose identity is
//! `(name, sequence)`. The RTI answers reservations of the same name in
//! request order, so a callback always belongs to the oldest outstanding
//! ticket for its name. A ticket whose waiter gave up stays in line as a
//! tombstone and swallows exactly one late callback, which keeps a stale
//! answer from resolving a newer request for the same name.
//!
//! An answer can also be lost outright. A tombstone older than the grace
//! period is therefore dropped when the next request for its name is
//! enqueued; otherwise it would swallow every later answer for that name.

use fedbridge_env::{FederateContext, RtiAmbassador};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::shutdown::Shutdown;

/// Result of a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// The name now belongs to this federate
    Reserved,
    /// Another federate holds the name
    NameTaken,
    /// No answer arrived in time
    TimedOut,
}

#[derive(Debug)]
struct Ticket {
    sequence: u64,
    /// `None` once the waiter has given up
    slot: Option<oneshot::Sender<bool>>,
    /// Context time at which the waiter gave up
    abandoned_at: Option<Duration>,
}

impl Ticket {
    fn expired(&self, now: Duration, grace: Duration) -> bool {
        self.abandoned_at
            .is_some_and(|at| now.saturating_sub(at) >= grace)
    }
}

#[derive(Debug, Default)]
struct Pending {
    by_name: HashMap<String, VecDeque<Ticket>>,
}

/// Callback-thread side of the reservation handoff.
#[derive(Debug, Clone)]
pub struct ReservationSink {
    pending: Arc<Mutex<Pending>>,
}

impl ReservationSink {
    /// Resolves the oldest outstanding ticket for `name`.
    ///
    /// Callbacks that match no ticket, or match a tombstone, are dropped.
    pub fn resolve(&self, name: &str, succeeded: bool) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(queue) = pending.by_name.get_mut(name) else {
            warn!(name, succeeded, "Reservation callback with no outstanding request");
            return;
        };
        let Some(ticket) = queue.pop_front() else {
            return;
        };
        if queue.is_empty() {
            pending.by_name.remove(name);
        }

        match ticket.slot {
            Some(slot) => {
                // The waiter may have timed out between our lock and now; the
                // send then fails and the answer is simply lost with it.
                let _ = slot.send(succeeded);
            }
            None => {
                debug!(name, sequence = ticket.sequence, succeeded, "Late reservation callback ignored");
            }
        }
    }
}

/// Issues reservations and waits for their outcome.
pub struct ReservationSynchronizer<Ctx, Rti>
where
    Ctx: FederateContext,
    Rti: RtiAmbassador + ?Sized,
{
    context: Arc<Ctx>,
    rti: Arc<Rti>,
    pending: Arc<Mutex<Pending>>,
    next_sequence: AtomicU64,
    tombstone_grace: Duration,
    shutdown: Shutdown,
}

impl<Ctx, Rti> ReservationSynchronizer<Ctx, Rti>
where
    Ctx: FederateContext,
    Rti: RtiAmbassador + ?Sized,
{
    /// Creates a synchronizer and the sink its callbacks resolve through.
    ///
    /// `tombstone_grace` is how long a timed-out ticket keeps waiting for
    /// its late answer once a newer request for the same name is queued.
    pub fn new(
        context: Arc<Ctx>,
        rti: Arc<Rti>,
        tombstone_grace: Duration,
        shutdown: Shutdown,
    ) -> (Self, ReservationSink) {
        let pending = Arc::new(Mutex::new(Pending::default()));
        let sink = ReservationSink {
            pending: pending.clone(),
        };
        let sync = Self {
            context,
            rti,
            pending,
            next_sequence: AtomicU64::new(1),
            tombstone_grace,
            shutdown,
        };
        (sync, sink)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of tickets (live or tombstoned) awaiting a callback.
    pub fn outstanding(&self) -> usize {
        self.lock().by_name.values().map(VecDeque::len).sum()
    }

    fn enqueue(&self, name: &str) -> (u64, oneshot::Receiver<bool>) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let now = self.context.now();
        let mut pending = self.lock();
        let queue = pending.by_name.entry(name.to_string()).or_default();
        let before = queue.len();
        queue.retain(|t| !t.expired(now, self.tombstone_grace));
        if queue.len() < before {
            debug!(name, dropped = before - queue.len(), "Expired reservation tombstones dropped");
        }
        queue.push_back(Ticket {
            sequence,
            slot: Some(tx),
            abandoned_at: None,
        });
        (sequence, rx)
    }

    fn remove(&self, name: &str, sequence: u64) {
        let mut pending = self.lock();
        if let Some(queue) = pending.by_name.get_mut(name) {
            queue.retain(|t| t.sequence != sequence);
            if queue.is_empty() {
                pending.by_name.remove(name);
            }
        }
    }

    fn tombstone(&self, name: &str, sequence: u64) {
        let now = self.context.now();
        if let Some(ticket) = self
            .lock()
            .by_name
            .get_mut(name)
            .and_then(|q| q.iter_mut().find(|t| t.sequence == sequence))
        {
            ticket.slot = None;
            ticket.abandoned_at = Some(now);
        }
    }

    /// Reserves `name`, blocking up to `timeout` for the RTI's answer.
    ///
    /// A transient request failure is retried once. Resigning while waiting
    /// returns [`BridgeError::Resigned`].
    pub async fn reserve(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<ReservationOutcome, BridgeError> {
        if self.shutdown.is_triggered() {
            return Err(BridgeError::Resigned);
        }

        let (sequence, mut rx) = self.enqueue(name);

        let mut request = self.rti.reserve_object_instance_name(name).await;
        if let Err(e) = &request {
            if e.is_transient() {
                warn!(name, error = %e, "Reservation request failed, re-requesting once");
                request = self.rti.reserve_object_instance_name(name).await;
            }
        }
        if let Err(e) = request {
            self.remove(name, sequence);
            return Err(e.into());
        }

        let answer = tokio::select! {
            biased;
            answer = &mut rx => answer.ok(),
            _ = self.shutdown.triggered() => {
                self.tombstone(name, sequence);
                return Err(BridgeError::Resigned);
            }
            _ = self.context.sleep(timeout) => None,
        };

        let outcome = match answer {
            Some(true) => ReservationOutcome::Reserved,
            Some(false) => ReservationOutcome::NameTaken,
            None => {
                self.tombstone(name, sequence);
                // The answer may have landed while we were tombstoning.
                match rx.try_recv() {
                    Ok(true) => ReservationOutcome::Reserved,
                    Ok(false) => ReservationOutcome::NameTaken,
                    Err(_) => ReservationOutcome::TimedOut,
                }
            }
        };

        debug!(name, sequence, ?outcome, "Reservation finished");
        Ok(outcome)
    }
}
