//! Lossless draining of the kernel's two-half latency histogram.
//!
//! User space cannot read-and-zero a map slot in one step, so the kernel
//! writes to one half while the other is drained. Each cycle:
//!
//! 1. settle the idle half: it has had no writers for a whole interval, so
//!    what it gained since it was last read is final and it can be zeroed;
//! 2. point the completion handler at that freshly zeroed half;
//! 3. read the half just retired, reporting what it gained since last seen.
//!
//! A handler that picked up the old epoch just before step 2 may still add to
//! the retired half after step 3. The counter is never overwritten while it
//! can have writers, so that late count is picked up by step 1 of the next
//! cycle.

use biolat_common::{counter_index, LATENCY_HALVES, LATENCY_SLOTS};
use log::debug;

use crate::aggregator::HistogramSource;

const SLOTS: usize = LATENCY_SLOTS as usize;

/// Raw access to the kernel counters and the epoch selector.
pub trait CounterBank {
    type Error: std::error::Error;

    fn read(&self, index: u32) -> Result<u64, Self::Error>;
    fn write(&mut self, index: u32, value: u64) -> Result<(), Self::Error>;
    fn set_epoch(&mut self, half: u32) -> Result<(), Self::Error>;
}

pub struct EpochHistogram<B> {
    bank: B,
    active: u32,
    seen: [[u64; SLOTS]; LATENCY_HALVES as usize],
    late: [u64; SLOTS],
}

impl<B: CounterBank> EpochHistogram<B> {
    /// `bank` must still be in its load-time state: all zero, epoch 0.
    pub fn new(bank: B) -> Self {
        Self {
            bank,
            active: 0,
            seen: [[0; SLOTS]; LATENCY_HALVES as usize],
            late: [0; SLOTS],
        }
    }

    pub fn active_half(&self) -> u32 {
        self.active
    }

    pub fn bank(&self) -> &B {
        &self.bank
    }

    /// Counts `half` gained at `slot` since it was last read.
    fn gained(&mut self, half: u32, slot: u32) -> Result<u64, B::Error> {
        let value = self.bank.read(counter_index(half, slot))?;
        let seen = &mut self.seen[half as usize][slot as usize];
        let gained = value.wrapping_sub(*seen);
        *seen = value;
        Ok(gained)
    }
}

impl<B: CounterBank> HistogramSource for EpochHistogram<B> {
    type Error = B::Error;

    fn begin_interval(&mut self) -> Result<(), B::Error> {
        let idle = self.active ^ 1;

        for slot in 0..LATENCY_SLOTS {
            match self.gained(idle, slot) {
                Ok(late) => {
                    self.late[slot as usize] += late;
                    // On failure `seen` keeps the old value and nothing is lost.
                    if self.bank.write(counter_index(idle, slot), 0).is_ok() {
                        self.seen[idle as usize][slot as usize] = 0;
                    }
                }
                Err(e) => debug!("idle half slot {slot} unreadable: {e}"),
            }
        }

        self.bank.set_epoch(idle)?;
        self.active = idle;
        Ok(())
    }

    fn drain_bucket(&mut self, slot: u32) -> Result<u64, B::Error> {
        let retired = self.active ^ 1;
        let gained = self.gained(retired, slot)?;
        Ok(gained + std::mem::take(&mut self.late[slot as usize]))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        time::Duration,
    };

    use biolat_common::LATENCY_COUNTERS;

    use super::*;
    use crate::{aggregator::Aggregator, config::OutputFormat};

    #[derive(Debug, thiserror::Error)]
    #[error("map lookup failed")]
    struct LookupFailed;

    /// In-memory stand-in for the kernel maps. Can add a completion right
    /// after a given counter is read, the way a handler on another CPU would.
    #[derive(Default)]
    struct FakeBank {
        counters: RefCell<Vec<u64>>,
        epoch: Cell<u32>,
        // (counter read, counter incremented)
        bump_after_read: Cell<Option<(u32, u32)>>,
        fail_read: Cell<Option<u32>>,
    }

    impl FakeBank {
        fn new() -> Self {
            Self {
                counters: RefCell::new(vec![0; LATENCY_COUNTERS as usize]),
                ..Default::default()
            }
        }

        /// A completion landing in whatever half the epoch names.
        fn complete(&self, slot: u32) {
            self.counters.borrow_mut()[counter_index(self.epoch.get(), slot) as usize] += 1;
        }

        fn total(&self) -> u64 {
            self.counters.borrow().iter().sum()
        }
    }

    impl CounterBank for FakeBank {
        type Error = LookupFailed;

        fn read(&self, index: u32) -> Result<u64, LookupFailed> {
            if self.fail_read.get() == Some(index) {
                self.fail_read.set(None);
                return Err(LookupFailed);
            }
            let value = self.counters.borrow()[index as usize];
            if let Some((read, bump)) = self.bump_after_read.get() {
                if read == index {
                    self.bump_after_read.set(None);
                    self.counters.borrow_mut()[bump as usize] += 1;
                }
            }
            Ok(value)
        }

        fn write(&mut self, index: u32, value: u64) -> Result<(), LookupFailed> {
            self.counters.borrow_mut()[index as usize] = value;
            Ok(())
        }

        fn set_epoch(&mut self, half: u32) -> Result<(), LookupFailed> {
            self.epoch.set(half);
            Ok(())
        }
    }

    fn aggregator() -> Aggregator {
        Aggregator::new(Duration::from_secs(1), 64, OutputFormat::Text)
    }

    #[test]
    fn late_completion_in_retired_half_is_reported_next_interval() {
        let bank = FakeBank::new();
        for _ in 0..5 {
            bank.complete(8);
        }
        // A handler that read epoch 0 before the flip lands right after user
        // space has read slot 8 of half 0.
        bank.bump_after_read
            .set(Some((counter_index(0, 8), counter_index(0, 8))));

        let mut histogram = EpochHistogram::new(bank);
        let first = aggregator().collect(&mut histogram);
        let second = aggregator().collect(&mut histogram);

        assert_eq!(first.count(8), Some(5));
        assert_eq!(second.count(8), Some(1));
        assert_eq!(first.total() + second.total(), 6);
    }

    #[test]
    fn completion_during_drain_goes_to_the_new_half() {
        let bank = FakeBank::new();
        bank.complete(3);
        bank.bump_after_read
            .set(Some((counter_index(0, 3), counter_index(1, 3))));

        let mut histogram = EpochHistogram::new(bank);
        let first = aggregator().collect(&mut histogram);
        assert_eq!(histogram.active_half(), 1);
        let second = aggregator().collect(&mut histogram);

        assert_eq!(first.count(3), Some(1));
        assert_eq!(second.count(3), Some(1));
    }

    #[test]
    fn halves_alternate_and_end_up_zeroed() {
        let mut histogram = EpochHistogram::new(FakeBank::new());
        let mut reported = 0;

        for cycle in 0..6u32 {
            for slot in [0, 9, 63] {
                histogram.bank().complete(slot);
            }
            reported += aggregator().collect(&mut histogram).total();
            assert_eq!(histogram.bank().epoch.get(), (cycle + 1) % 2);
        }
        // Two quiet cycles settle both halves.
        reported += aggregator().collect(&mut histogram).total();
        reported += aggregator().collect(&mut histogram).total();

        assert_eq!(reported, 18);
        assert_eq!(histogram.bank().total(), 0);
    }

    #[test]
    fn unreadable_counter_is_reported_later() {
        let bank = FakeBank::new();
        bank.complete(5);
        bank.complete(5);
        bank.fail_read.set(Some(counter_index(0, 5)));

        let mut histogram = EpochHistogram::new(bank);
        let first = aggregator().collect(&mut histogram);
        let second = aggregator().collect(&mut histogram);

        assert_eq!(first.count(5), Some(0));
        assert_eq!(second.count(5), Some(2));
    }
}
