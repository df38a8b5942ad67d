//! Dispatch counters.
//!
//! Written from both the callback thread (queue overflow, discards after
//! close) and the dispatch loop, so every counter is atomic.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the callback queue and the dispatch loop.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    delivered: AtomicU64,
    decode_failures: AtomicU64,
    overflow_drops: AtomicU64,
    unhandled: AtomicU64,
    misaddressed: AtomicU64,
    held_for_time: AtomicU64,
    discarded: AtomicU64,
    sent: AtomicU64,
    send_failures: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounts {
    /// Interactions accepted into the inbound queue
    pub received: u64,
    /// Handler invocations
    pub delivered: u64,
    /// Interactions dropped because they failed to decode
    pub decode_failures: u64,
    /// Interactions dropped because the queue was full
    pub overflow_drops: u64,
    /// Interactions of a class with no handler
    pub unhandled: u64,
    /// Interactions tagged for another federate
    pub misaddressed: u64,
    /// Interactions that waited for a time grant
    pub held_for_time: u64,
    /// Interactions discarded during teardown
    pub discarded: u64,
    /// Interactions sent
    pub sent: u64,
    /// Sends abandoned after the retry
    pub send_failures: u64,
}

macro_rules! counter {
    ($($field:ident => $incr:ident),* $(,)?) => {
        impl DispatchStats {
            $(
                pub(crate) fn $incr(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            /// Takes a snapshot of every counter.
            pub fn snapshot(&self) -> DispatchCounts {
                DispatchCounts {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counter! {
    received => record_received,
    delivered => record_delivered,
    decode_failures => record_decode_failure,
    overflow_drops => record_overflow,
    unhandled => record_unhandled,
    misaddressed => record_misaddressed,
    held_for_time => record_held,
    discarded => record_discarded,
    sent => record_sent,
    send_failures => record_send_failure,
}

impl DispatchStats {
    pub(crate) fn record_discarded_n(&self, n: u64) {
        self.discarded.fetch_add(n, Ordering::Relaxed);
    }
}
