use core::sync::atomic::{AtomicU64, Ordering};

use aya_ebpf::helpers::bpf_ktime_get_ns;
use biolat_common::{compute_bucket, counter_index};

use crate::{DROPPED, EPOCH, LATENCIES, START_TIMES};

// BPF_ANY: a request address can be recycled before we saw its completion.
const BPF_ANY: u64 = 0;

/// Remember when `request` was handed to the driver.
#[inline(always)]
pub fn record_start(request: u64) {
    let now = unsafe { bpf_ktime_get_ns() };

    // Table full: the request goes unmeasured. Count it per CPU.
    if START_TIMES.insert(&request, &now, BPF_ANY).is_err() {
        if let Some(dropped) = DROPPED.get_ptr_mut(0) {
            unsafe { *dropped += 1 };
        }
    }
}

/// Fold the elapsed time of `request` into the active histogram half.
///
/// Returns the slot that was incremented, or `None` when no start was
/// recorded for the request.
#[inline(always)]
pub fn record_completion(request: u64) -> Option<u32> {
    let start = unsafe { *START_TIMES.get(&request)? };
    let now = unsafe { bpf_ktime_get_ns() };

    // Whoever deletes the entry owns the measurement. A racing duplicate
    // completion loses here and counts nothing.
    START_TIMES.remove(&request).ok()?;

    let slot = compute_bucket(now.saturating_sub(start) / 1_000);
    let half = EPOCH.get(0).copied().unwrap_or(0);
    let counter = LATENCIES.get_ptr_mut(counter_index(half, slot))?;
    unsafe { AtomicU64::from_ptr(counter) }.fetch_add(1, Ordering::Relaxed);

    Some(slot)
}
