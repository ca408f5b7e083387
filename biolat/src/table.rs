//! Bounded correlation store for requests between submission and completion.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::{mapref::entry::Entry, DashMap};

/// Opaque handle of one in-flight request. Only ever compared, never
/// dereferenced; the kernel side uses the `struct request` address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// What happened to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    Inserted,
    /// A stale entry for a recycled identity was overwritten.
    Replaced,
    /// The table is full; this request will not be measured.
    Dropped,
}

/// Request start times keyed by [`RequestId`], holding at most `capacity`
/// entries.
///
/// All operations on a single key are atomic (the key's shard is locked for
/// the duration of the call). Storage for `capacity` entries is reserved up
/// front and a full table refuses new keys instead of growing.
#[derive(Debug)]
pub struct InFlightTable {
    entries: DashMap<RequestId, u64>,
    live: AtomicUsize,
    capacity: usize,
}

impl InFlightTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity),
            live: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Records `start_ns` for `id`, overwriting any previous start.
    pub fn upsert(&self, id: RequestId, start_ns: u64) -> TrackOutcome {
        match self.entries.entry(id) {
            Entry::Occupied(mut entry) => {
                entry.insert(start_ns);
                TrackOutcome::Replaced
            }
            Entry::Vacant(entry) => {
                if !self.reserve_slot() {
                    return TrackOutcome::Dropped;
                }
                entry.insert(start_ns);
                TrackOutcome::Inserted
            }
        }
    }

    /// Removes `id` and hands back its start time. Of two racing callers for
    /// the same key only one gets `Some`.
    pub fn take(&self, id: RequestId) -> Option<u64> {
        let (_, start_ns) = self.entries.remove(&id)?;
        self.live.fetch_sub(1, Ordering::AcqRel);
        Some(start_ns)
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn reserve_slot(&self) -> bool {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.capacity).then_some(live + 1)
            })
            .is_ok()
    }
}
