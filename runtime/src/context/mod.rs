//! Raw context switching between a scheduler's main loop and a coroutine's
//! shared stack.
//!
//! A [`RawContext`] is just the saved stack pointer of a suspended execution.
//! `make` writes an initial frame onto a stack region so that the first
//! [`swap`] into it starts running `entry`; every later `swap` resumes
//! exactly where the previous one left off. There is no return value or
//! payload threaded through `swap` itself -- callers that need to pass data
//! across a switch do so through the `Scheduler`'s own state (`running`,
//! thread-local "current scheduler", wait records, ...), the same way the
//! teacher's green-thread scheduler exchanges its `CURRENT_THREAD_ENTRY` out
//! of band rather than through registers.

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
use x86_64 as arch;

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
use aarch64 as arch;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("green_rt::context only implements x86_64 and aarch64 context switching");

/// The saved stack pointer of a suspended context. `0` means "never started".
pub type RawContext = usize;

/// Write an initial frame onto `[stack_base, stack_base + stack_size)` so that
/// switching into the returned context starts executing `entry`.
///
/// `entry` must never return; the coroutine wrapper that calls into user code
/// is responsible for landing back in the scheduler when the task finishes.
///
/// # Safety
/// `stack_base` must point to at least `stack_size` writable, otherwise-unused
/// bytes that outlive the returned context.
pub unsafe fn make(stack_base: *mut u8, stack_size: usize, entry: extern "C" fn() -> !) -> RawContext {
    arch::make(stack_base, stack_size, entry)
}

/// Save the caller's callee-saved registers and stack pointer into `*save_to`,
/// then switch to the stack pointer recorded in `resume` and return there.
///
/// # Safety
/// `resume` must be a context produced by [`make`] or a context previously
/// suspended by a call to `swap` that saved into a still-live slot. The stack
/// region backing `resume` must still be valid and not concurrently resumed
/// from elsewhere.
pub unsafe fn swap(save_to: &mut RawContext, resume: RawContext) {
    arch::swap_context(save_to as *mut RawContext, resume)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const STACK_SIZE: usize = 64 * 1024;

    static COUNTER: AtomicU32 = AtomicU32::new(0);
    static mut MAIN_CTX: RawContext = 0;
    static mut TASK_CTX: RawContext = 0;

    extern "C" fn task_entry() -> ! {
        COUNTER.store(99, Ordering::SeqCst);
        unsafe {
            swap(&mut *std::ptr::addr_of_mut!(TASK_CTX), *std::ptr::addr_of!(MAIN_CTX));
        }
        unreachable!("scheduler must not resume a finished task");
    }

    #[test]
    fn switch_into_fresh_context_runs_entry() {
        COUNTER.store(0, Ordering::SeqCst);
        let mut stack = vec![0u8; STACK_SIZE];
        let top = unsafe { stack.as_mut_ptr().add(STACK_SIZE) };

        unsafe {
            let ctx = make(stack.as_mut_ptr(), STACK_SIZE, task_entry);
            TASK_CTX = ctx;
            swap(&mut *std::ptr::addr_of_mut!(MAIN_CTX), ctx);
        }
        let _ = top;

        assert_eq!(COUNTER.load(Ordering::SeqCst), 99);
    }
}
