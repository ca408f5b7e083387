#![no_std]
#![no_main]

use aya_ebpf::{macros::btf_tracepoint, programs::BtfTracePointContext};
use biolat_ebpf::block::{record_completion, record_start};

// Both tracepoints receive `struct request *rq` as their first argument. Only
// the address is used, as a correlation key.

#[btf_tracepoint(function = "block_rq_insert")]
pub fn block_rq_insert(ctx: BtfTracePointContext) -> i32 {
    let rq: *const core::ffi::c_void = unsafe { ctx.arg(0) };
    record_start(rq as u64);
    0
}

#[btf_tracepoint(function = "block_rq_complete")]
pub fn block_rq_complete(ctx: BtfTracePointContext) -> i32 {
    let rq: *const core::ffi::c_void = unsafe { ctx.arg(0) };
    let _ = record_completion(rq as u64);
    0
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
