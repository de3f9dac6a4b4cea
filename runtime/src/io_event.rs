//! RAII helper that suspends the running coroutine until a socket becomes
//! readable/writable, or a deadline passes.
//!
//! Registration with the demultiplexer is deferred to the first `wait()`
//! call rather than done in the constructor, so a caller that races the
//! socket closed before ever waiting never registers at all. The `Drop`
//! impl removes the registration if one was installed, mirroring the
//! original's destructor — this is what lets a coroutine `return` or `?`
//! out of a function mid-wait without leaking an epoll/kqueue entry.

use crate::current;
use crate::demux::{Direction, RawFd};
use crate::error;
use std::io;

pub struct IoEvent {
    fd: RawFd,
    direction: Direction,
    has_ev: bool,
}

impl IoEvent {
    /// Build a helper for `direction`-readiness on `fd`. Does not register
    /// anything yet; call `wait` to actually suspend.
    pub fn new(fd: RawFd, direction: Direction) -> Self {
        IoEvent { fd, direction, has_ev: false }
    }

    /// Suspend until `fd` is ready for `direction`, or `ms` milliseconds
    /// pass (`None` waits forever). Returns `Ok(true)` once ready,
    /// `Ok(false)` if registration itself failed (rare: e.g. `fd` already
    /// closed), and a `TimedOut` error on timeout.
    pub fn wait(&mut self, ms: Option<u32>) -> io::Result<bool> {
        let (_, coroutine_id) = current::running().expect("IoEvent::wait called outside a coroutine");
        let yielder = current::yielder().expect("coroutine running without a bound scheduler");

        if !self.has_ev {
            self.has_ev = yielder.add_io_event(self.fd, self.direction);
            if !self.has_ev {
                return Ok(false);
            }
        }

        let timer = ms.map(|m| yielder.add_timer(m, coroutine_id));
        yielder.yield_now();
        let timed_out = yielder.timed_out();
        if let Some(handle) = timer {
            if !timed_out {
                yielder.erase_timer(handle);
            }
        }

        if timed_out {
            Err(error::timed_out())
        } else {
            Ok(true)
        }
    }
}

impl Drop for IoEvent {
    fn drop(&mut self) {
        if self.has_ev {
            if let Some(yielder) = current::yielder() {
                yielder.del_io_event(self.fd, self.direction);
            }
        }
    }
}
