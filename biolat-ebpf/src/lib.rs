#![no_std]

use aya_ebpf::{
    macros::map,
    maps::{Array, HashMap, PerCpuArray},
};
use biolat_common::{LATENCY_COUNTERS, MAX_IN_FLIGHT};

pub mod block;

// Key: request address, Value: submission time (ns, CLOCK_MONOTONIC)
#[map]
pub static START_TIMES: HashMap<u64, u64> = HashMap::with_max_entries(MAX_IN_FLIGHT, 0);

// Two halves of completion counts per latency slot. Only the half named by
// EPOCH is written; user space zeroes the other one.
#[map]
pub static LATENCIES: Array<u64> = Array::with_max_entries(LATENCY_COUNTERS, 0);

// Single entry: the half completions currently go to. Flipped by user space.
#[map]
pub static EPOCH: Array<u32> = Array::with_max_entries(1, 0);

// Submissions not tracked because START_TIMES was full. Never reset.
#[map]
pub static DROPPED: PerCpuArray<u64> = PerCpuArray::with_max_entries(1, 0);
