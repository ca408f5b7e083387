use std::sync::atomic::{AtomicU64, Ordering};

use biolat_common::LATENCY_SLOTS;

const SLOTS: usize = LATENCY_SLOTS as usize;

/// Fixed array of per-slot completion counters.
///
/// Handlers only ever add; the aggregator drains each slot with an atomic
/// swap, so an increment racing a reset lands in either the closing or the
/// next interval, never nowhere.
#[derive(Debug)]
pub struct Histogram {
    slots: [AtomicU64; SLOTS],
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Out-of-range slots are folded into the last one.
    pub fn record(&self, slot: u32) {
        self.slots[(slot as usize).min(SLOTS - 1)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, slot: u32) -> Option<u64> {
        self.slots
            .get(slot as usize)
            .map(|counter| counter.load(Ordering::Relaxed))
    }

    /// Returns the count of `slot` and zeroes it in one step.
    pub fn drain(&self, slot: u32) -> Option<u64> {
        self.slots
            .get(slot as usize)
            .map(|counter| counter.swap(0, Ordering::Relaxed))
    }

    pub fn total(&self) -> u64 {
        self.slots.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}
