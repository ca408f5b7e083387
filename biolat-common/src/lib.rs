#![cfg_attr(not(test), no_std)]

//! Layout shared by the kernel handlers and the user-space reporter.

/// Maximum number of requests tracked between submission and completion.
/// Submissions beyond this are not measured.
pub const MAX_IN_FLIGHT: u32 = 4096;

/// Number of log2 latency slots kept by the kernel side.
pub const LATENCY_SLOTS: u32 = 64;

/// The kernel keeps two copies of the histogram and the completion handler
/// writes to the one selected by the epoch map, so user space can drain one
/// copy while the other takes new completions. Counter `i` of half `h` lives
/// at `h * LATENCY_SLOTS + i`.
pub const LATENCY_HALVES: u32 = 2;
pub const LATENCY_COUNTERS: u32 = LATENCY_HALVES * LATENCY_SLOTS;

/// Slots rendered per report unless the operator asks for more.
pub const DEFAULT_DISPLAY_SLOTS: u32 = 18;

/// Longest bar drawn for a single slot. Larger counts are clamped.
pub const MAX_BAR_WIDTH: u64 = 50;

pub const LATENCIES_MAP: &str = "LATENCIES";
pub const EPOCH_MAP: &str = "EPOCH";
pub const DROPPED_MAP: &str = "DROPPED";

pub const SUBMIT_PROGRAM: &str = "block_rq_insert";
pub const COMPLETE_PROGRAM: &str = "block_rq_complete";

/// Maps a latency in microseconds to its histogram slot.
///
/// Slot `i` is the smallest index with `latency_us < 2^(i + 1)`, so slot 0
/// holds `0..=1`, slot 1 holds `2..=3`, slot 2 holds `4..=7` and so on. Slot
/// 63 takes everything from `2^63` up. This is the bit length of the value,
/// computed without a loop so the verifier sees a fixed instruction count.
#[inline(always)]
pub fn compute_bucket(latency_us: u64) -> u32 {
    63 - (latency_us | 1).leading_zeros()
}

/// Smallest latency (µs) counted in `slot`.
#[inline(always)]
pub fn bucket_lower_us(slot: u32) -> u64 {
    match slot {
        0 => 0,
        s => 1u64 << s.min(LATENCY_SLOTS - 1),
    }
}

/// Largest latency (µs) counted in `slot`, inclusive.
#[inline(always)]
pub fn bucket_upper_us(slot: u32) -> u64 {
    u64::MAX >> (LATENCY_SLOTS - 1 - slot.min(LATENCY_SLOTS - 1))
}

/// Index of `slot` in half `half` of the kernel latency array.
#[inline(always)]
pub fn counter_index(half: u32, slot: u32) -> u32 {
    (half & 1) * LATENCY_SLOTS + slot.min(LATENCY_SLOTS - 1)
}
