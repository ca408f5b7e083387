//! The submit/complete handlers, runnable without a kernel.
//!
//! [`MonitorSession`] runs the same algorithm as the BPF programs over
//! user-space tables. A host (the test driver, or anything else that sees
//! request lifecycle events) calls it through [`RequestHooks`].
//!
//! Handler contract: no blocking beyond a shard lock on one key, no
//! allocation once the tables are built, constant work per call.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use biolat_common::compute_bucket;

use crate::{
    histogram::Histogram,
    table::{InFlightTable, RequestId, TrackOutcome},
};

/// Monotonic nanosecond time source.
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> u64;
}

/// Nanoseconds since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ns: u64) -> Self {
        Self {
            now_ns: AtomicU64::new(start_ns),
        }
    }

    pub fn set(&self, now_ns: u64) {
        self.now_ns.store(now_ns, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ns: u64) {
        self.now_ns.fetch_add(delta_ns, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_ns(&self) -> u64 {
        (**self).now_ns()
    }
}

/// What happened to a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteOutcome {
    Recorded { slot: u32, elapsed_us: u64 },
    /// No start on record: dropped at submission, or a duplicate completion.
    Unmatched,
}

/// Callbacks a host invokes on request lifecycle events.
pub trait RequestHooks {
    fn on_submit(&self, id: RequestId) -> TrackOutcome;
    fn on_complete(&self, id: RequestId) -> CompleteOutcome;
}

/// One monitoring session: the two shared tables and the clock the handlers
/// stamp events with.
#[derive(Debug)]
pub struct MonitorSession<C = MonotonicClock> {
    in_flight: Arc<InFlightTable>,
    histogram: Arc<Histogram>,
    clock: C,
}

impl<C: Clock> MonitorSession<C> {
    pub fn new(in_flight: Arc<InFlightTable>, histogram: Arc<Histogram>, clock: C) -> Self {
        Self {
            in_flight,
            histogram,
            clock,
        }
    }

    pub fn in_flight(&self) -> &Arc<InFlightTable> {
        &self.in_flight
    }

    pub fn histogram(&self) -> &Arc<Histogram> {
        &self.histogram
    }
}

impl<C: Clock> RequestHooks for MonitorSession<C> {
    fn on_submit(&self, id: RequestId) -> TrackOutcome {
        self.in_flight.upsert(id, self.clock.now_ns())
    }

    fn on_complete(&self, id: RequestId) -> CompleteOutcome {
        let Some(start_ns) = self.in_flight.take(id) else {
            return CompleteOutcome::Unmatched;
        };

        let elapsed_us = self.clock.now_ns().saturating_sub(start_ns) / 1_000;
        let slot = compute_bucket(elapsed_us);
        self.histogram.record(slot);

        CompleteOutcome::Recorded { slot, elapsed_us }
    }
}
