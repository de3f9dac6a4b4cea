//! x86-64 System V context switch.
//!
//! Callee-saved registers per the SysV ABI: `rbx`, `rbp`, `r12`-`r15`. A
//! context switch amounts to spilling those plus `rsp` and loading the
//! target's. The initial frame for a freshly made context fakes the six
//! register slots a normal switch would pop, followed by a return address
//! pointing at `entry`, so the first `swap_context` into it "returns" into
//! user code via `ret` instead of a real function call.

use std::arch::global_asm;

use super::RawContext;

global_asm!(
    ".text",
    ".global green_rt_swap_context",
    "green_rt_swap_context:",
    "push rbp",
    "push rbx",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "mov [rdi], rsp",
    "mov rsp, rsi",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbx",
    "pop rbp",
    "ret",
);

extern "C" {
    /// Save the current stack pointer (after pushing callee-saved regs) into
    /// `*old`, then switch `rsp` to `new` and pop the regs found there.
    fn green_rt_swap_context(old: *mut RawContext, new: RawContext);
}

pub unsafe fn swap_context(old: *mut RawContext, new: RawContext) {
    green_rt_swap_context(old, new)
}

/// Frame layout, low to high address: r15, r14, r13, r12, rbx, rbp, retaddr.
/// 7 * 8 = 56 bytes of real content inside a 64-byte (16-aligned) reservation.
const FRAME_BYTES: usize = 64;

pub unsafe fn make(stack_base: *mut u8, stack_size: usize, entry: extern "C" fn() -> !) -> RawContext {
    let top = stack_base as usize + stack_size;
    let aligned_top = top & !0xf;
    let frame = aligned_top - FRAME_BYTES;

    let words = frame as *mut usize;
    // words[0..=5] are r15,r14,r13,r12,rbx,rbp -- their initial values are
    // never read meaningfully, only popped before the first `ret`.
    for i in 0..6 {
        words.add(i).write(0);
    }
    words.add(6).write(entry as usize);

    frame
}
