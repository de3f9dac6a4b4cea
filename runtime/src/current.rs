//! Thread-local bridge between the sync primitives in [`crate::sync`] and
//! whichever scheduler loop owns the current OS thread.
//!
//! Exactly one scheduler runs per thread for its whole lifetime, so the
//! [`Yielder`] it implements is bound once, at thread startup. Which
//! coroutine (if any) is presently running is set and cleared around every
//! resume, since a primitive's `wait`/`lock` needs to know whether its
//! caller is a coroutine (suspend cooperatively) or a plain thread (park on
//! a condvar), exactly as the original's `co::is_coroutine()` check does.

use crate::demux::{Direction, RawFd};
use crate::sync::wait::WaitRecord;
use crate::timer::TimerHandle;
use std::cell::Cell;
use std::sync::Arc;

/// What a scheduler exposes to sync primitives so they can suspend the
/// running coroutine and later hand it back to the ready queue.
pub trait Yielder: Send + Sync {
    fn scheduler_id(&self) -> u32;

    /// Suspend the calling coroutine, switching back into this thread's
    /// scheduler loop. Returns once some other call resumes it. Must only
    /// be called while a coroutine is current on this thread.
    fn yield_now(&self);

    /// Move `coroutine_id` from suspended to ready on its own scheduler.
    /// Safe to call from any thread.
    fn add_ready(&self, coroutine_id: u32);

    /// Arm a timeout for `coroutine_id`, `ms` milliseconds out.
    fn add_timer(&self, ms: u32, coroutine_id: u32) -> TimerHandle;

    /// Disarm a still-pending timer.
    fn erase_timer(&self, handle: TimerHandle);

    /// Attach (or clear, passing `None`) the wait record the currently
    /// running coroutine is about to suspend on, so the scheduler's timer
    /// sweep can race it fairly against whichever primitive signals it.
    fn set_wait_record(&self, record: Option<Arc<WaitRecord>>);

    /// Register interest in `direction`-readiness on `fd` for the running
    /// coroutine. `false` if registration failed.
    fn add_io_event(&self, fd: RawFd, direction: Direction) -> bool;

    /// Remove a previously registered interest.
    fn del_io_event(&self, fd: RawFd, direction: Direction);

    /// `true` iff the running coroutine's last resume was a timer firing.
    fn timed_out(&self) -> bool;
}

thread_local! {
    static YIELDER: Cell<Option<*const (dyn Yielder + 'static)>> = Cell::new(None);
    static RUNNING: Cell<Option<u32>> = Cell::new(None);
}

/// Bind the scheduler owning this thread. Called once from the scheduler's
/// own run loop before it starts resuming coroutines; `scheduler` must
/// outlive the thread (schedulers are never torn down while their thread
/// runs).
pub fn bind_yielder(scheduler: &'static dyn Yielder) {
    YIELDER.with(|y| y.set(Some(scheduler as *const dyn Yielder)));
}

/// The scheduler loop running on this thread, if any.
pub fn yielder() -> Option<&'static dyn Yielder> {
    YIELDER.with(|y| y.get().map(|p| unsafe { &*p }))
}

/// Record that `coroutine_id` is now running on this thread.
pub fn enter_coroutine(coroutine_id: u32) {
    RUNNING.with(|r| r.set(Some(coroutine_id)));
}

/// Clear the current coroutine, e.g. right before a context switch away
/// from it.
pub fn leave_coroutine() {
    RUNNING.with(|r| r.set(None));
}

/// `(scheduler_id, coroutine_id)` of the coroutine running on this thread,
/// or `None` if this thread is not presently inside one (either it isn't a
/// scheduler thread at all, or the scheduler itself is between tasks).
pub fn running() -> Option<(u32, u32)> {
    let co_id = RUNNING.with(|r| r.get())?;
    let sched_id = yielder()?.scheduler_id();
    Some((sched_id, co_id))
}
