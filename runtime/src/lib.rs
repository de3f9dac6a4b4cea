//! `green-rt`: a cooperative M:N coroutine runtime.
//!
//! A small, fixed fleet of OS threads (one [`scheduler::Scheduler`] each)
//! cooperatively multiplexes many lightweight tasks over a handful of
//! shared stacks. Tasks submitted with [`go`] run until they explicitly
//! suspend — at [`sleep`], a [`sync::Event`]/[`sync::Mutex`] wait, or a
//! hooked/`net` I/O call — never pre-emptively.
//!
//! See `SPEC_FULL.md` / `DESIGN.md` in the repository root for the full
//! design rationale.

mod config;
mod context;
mod copool;
mod current;
mod demux;
mod error;
mod hook;
mod io_event;
#[cfg(unix)]
mod net;
mod scheduler;
mod scheduler_manager;
mod sock_ctx;
mod sync;
mod task_manager;
mod timer;

pub use config::Config;
pub use current::running;
pub use demux::Direction;
pub use error::{is_interrupted, is_would_block, timed_out};
pub use io_event::IoEvent;
pub use sync::{Event, Mutex, Pool, WaitGroup};
pub use task_manager::Task;

#[cfg(unix)]
pub use net::{
    accept, bind, close, connect, listen, recv, recvfrom, recvn, send, sendto, set_recv_buffer_size,
    set_reuseaddr, set_send_buffer_size, set_tcp_keepalive, set_tcp_nodelay, shutdown, socket, tcp_socket,
    udp_socket, Shutdown,
};
#[cfg(unix)]
pub use hook::posix as hook_posix;
#[cfg(windows)]
pub use hook::windows as hook_windows;

/// A read-only view onto one scheduler in the fleet, for observability.
#[derive(Clone, Copy)]
pub struct SchedulerHandle(&'static scheduler::Scheduler);

impl SchedulerHandle {
    pub fn id(&self) -> u32 {
        self.0.id()
    }

    /// Total time this scheduler's loop has spent running, in
    /// microseconds, for whoever wants to expose it as a metric.
    pub fn cputime_us(&self) -> u64 {
        self.0.cputime_us()
    }
}

/// Submit a task to the process-wide scheduler fleet, dispatched
/// round-robin. Returns immediately; the task starts the next time its
/// assigned scheduler drains its new-task queue.
pub fn go<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    go_boxed(Box::new(f));
}

/// Same as [`go`], for callers that already have a boxed closure (the hook
/// layer and `Pool::clear` use this to avoid an extra allocation).
pub fn go_boxed(task: Task) {
    scheduler_manager::global().go(task);
}

/// Suspend the running coroutine for `ms` milliseconds. Outside a
/// coroutine this parks the OS thread instead via `std::thread::sleep`.
pub fn sleep(ms: u32) {
    match current::yielder() {
        Some(yielder) => {
            let co_id = running().expect("yielder bound without a running coroutine").1;
            let timer = yielder.add_timer(ms, co_id);
            yielder.yield_now();
            yielder.erase_timer(timer);
        }
        None => std::thread::sleep(std::time::Duration::from_millis(ms as u64)),
    }
}

/// `true` iff the running coroutine's last resume was triggered by a timer
/// firing rather than an explicit wakeup.
pub fn timeout() -> bool {
    current::yielder().map(|y| y.timed_out()).unwrap_or(false)
}

/// The id of the scheduler running the calling coroutine, or `-1` if this
/// thread isn't presently running one.
pub fn scheduler_id() -> i32 {
    running().map(|(s, _)| s as i32).unwrap_or(-1)
}

/// The id of the coroutine currently running on this thread, or `-1`.
pub fn coroutine_id() -> i32 {
    running().map(|(_, c)| c as i32).unwrap_or(-1)
}

/// A handle to every scheduler in the process-wide fleet.
pub fn all_schedulers() -> Vec<SchedulerHandle> {
    scheduler_manager::global().all().iter().map(|s| SchedulerHandle(s)).collect()
}

/// Signal every scheduler in the process-wide fleet to stop after its
/// current tick, and block until each has acknowledged via its shutdown
/// completion event.
pub fn stop() {
    scheduler_manager::global().stop();
}

/// Whether `disable_hook_sleep` is set, consulted fresh from the
/// environment each call since it can legitimately be flipped between
/// tests.
pub(crate) fn config_disable_hook_sleep() -> bool {
    Config::from_env().disable_hook_sleep
}
