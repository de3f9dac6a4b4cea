//! Scheduler-aware wrapper functions standing in for the original's
//! libc-symbol interposition.
//!
//! The original intercepts libc's `read`/`write`/`connect`/`poll`/`sleep`/…
//! at link time (`dlsym(RTLD_NEXT, ...)`) so *unmodified* blocking code
//! becomes coroutine-friendly. Doing the same in Rust would mean
//! `#[no_mangle] extern "C" fn read(...)` shadowing libc's symbol process
//! -wide — sound only behind `LD_PRELOAD`/a cdylib, invisible to the type
//! system, and impossible to scope to "this crate's sockets" without
//! affecting every other linked library's file descriptors too. Instead
//! this module exposes the same decision logic as ordinary functions a
//! caller opts into explicitly: `hook::read(fd, buf)` instead of
//! `libc::read(fd, buf)`. See `DESIGN.md`.

use crate::current;
use crate::demux::{Direction, RawFd};
use crate::error;
use crate::io_event::IoEvent;
use log::trace;
use std::collections::HashMap;
use std::io;
use std::sync::{Mutex, OnceLock};

#[cfg(unix)]
pub mod posix;
#[cfg(windows)]
pub mod windows;

const SHUT_READ: u8 = 1;
const SHUT_WRITE: u8 = 2;

/// Per-fd hook bookkeeping: whether the caller set it non-blocking
/// themselves, whether *we* flipped it behind their back, per-direction
/// shutdown state, and send/recv timeouts capped the same way the original
/// caps them (`SO_RCVTIMEO`/`SO_SNDTIMEO` are 16-bit milliseconds).
#[derive(Debug, Clone, Copy, Default)]
pub struct HookCtx {
    non_blocking: bool,
    we_flipped_it: bool,
    shut_flags: u8,
    recv_timeout_ms: u16,
    send_timeout_ms: u16,
    is_sock_or_pipe: bool,
}

impl HookCtx {
    pub fn is_non_blocking(&self) -> bool {
        self.non_blocking
    }

    pub fn set_non_blocking(&mut self, v: bool) {
        self.non_blocking = v;
        self.we_flipped_it = false;
    }

    fn has_mark(&self) -> bool {
        self.we_flipped_it
    }

    fn set_mark(&mut self) {
        self.we_flipped_it = true;
    }

    pub fn set_shut_read(&mut self) {
        self.shut_flags |= SHUT_READ;
        if self.shut_flags == SHUT_READ | SHUT_WRITE {
            *self = HookCtx::default();
        }
    }

    pub fn set_shut_write(&mut self) {
        self.shut_flags |= SHUT_WRITE;
        if self.shut_flags == SHUT_READ | SHUT_WRITE {
            *self = HookCtx::default();
        }
    }

    pub fn set_sock_or_pipe(&mut self) {
        self.is_sock_or_pipe = true;
    }

    pub fn is_sock_or_pipe(&self) -> bool {
        self.is_sock_or_pipe
    }

    /// Milliseconds, capped to `u16::MAX` as the original caps
    /// `SO_RCVTIMEO`/`SO_SNDTIMEO`; `0` means "no timeout" (`None`).
    pub fn set_recv_timeout(&mut self, ms: u32) {
        self.recv_timeout_ms = ms.min(u16::MAX as u32) as u16;
    }

    pub fn set_send_timeout(&mut self, ms: u32) {
        self.send_timeout_ms = ms.min(u16::MAX as u32) as u16;
    }

    pub fn recv_timeout(&self) -> Option<u32> {
        if self.recv_timeout_ms == 0 {
            None
        } else {
            Some(self.recv_timeout_ms as u32)
        }
    }

    pub fn send_timeout(&self) -> Option<u32> {
        if self.send_timeout_ms == 0 {
            None
        } else {
            Some(self.send_timeout_ms as u32)
        }
    }
}

struct HookTable {
    ctxs: Mutex<HashMap<RawFd, HookCtx>>,
}

impl HookTable {
    fn new() -> Self {
        HookTable { ctxs: Mutex::new(HashMap::new()) }
    }

    fn with<R>(&self, fd: RawFd, f: impl FnOnce(&mut HookCtx) -> R) -> R {
        let mut table = self.ctxs.lock().unwrap();
        f(table.entry(fd).or_default())
    }

    fn remove(&self, fd: RawFd) {
        self.ctxs.lock().unwrap().remove(&fd);
    }
}

static TABLE: OnceLock<HookTable> = OnceLock::new();

fn table() -> &'static HookTable {
    TABLE.get_or_init(HookTable::new)
}

pub fn get_ctx(fd: RawFd) -> HookCtx {
    table().with(fd, |c| *c)
}

pub fn with_ctx<R>(fd: RawFd, f: impl FnOnce(&mut HookCtx) -> R) -> R {
    table().with(fd, f)
}

pub fn clear_ctx(fd: RawFd) {
    table().remove(fd);
}

/// Flip `fd` non-blocking only if the caller hasn't already told us it's
/// blocking-by-choice, recording that we're the one who did it so a later
/// hook call doesn't flip it again (and so close/shutdown can tell our
/// override apart from user intent, mirroring the original's `nb_mark`).
#[cfg(unix)]
fn ensure_non_blocking(fd: RawFd) {
    table().with(fd, |ctx| {
        if !ctx.has_mark() {
            crate::net::set_nonblock(fd);
            ctx.set_mark();
        }
    });
}

/// Shared loop body behind `read`/`write`/`recv`/`send`/…: try the
/// underlying non-blocking syscall, and suspend on `EWOULDBLOCK`/`EAGAIN`
/// via `ev` using `timeout_ms` until it succeeds, times out, or hits a
/// real error.
fn retry_until_ready<F>(mut ev: IoEvent, timeout_ms: Option<u32>, mut attempt: F) -> io::Result<usize>
where
    F: FnMut() -> io::Result<usize>,
{
    loop {
        match attempt() {
            Ok(n) => return Ok(n),
            Err(e) if error::is_would_block(&e) => {
                ev.wait(timeout_ms)?;
            }
            Err(e) if error::is_interrupted(&e) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// `true` if there is a bound scheduler on this thread — the precondition
/// for every suspension-based hook path; off a scheduler thread the hook
/// always falls through to the plain blocking call.
fn in_coroutine() -> bool {
    current::yielder().is_some()
}

/// `poll`-style wait over a single fd with a pure read-or-write interest,
/// converted to a proper suspension. Returns `true` if the fd became ready,
/// `false` on timeout.
pub fn poll_one(fd: RawFd, direction: Direction, ms: Option<u32>) -> io::Result<bool> {
    trace!("hook poll_one fd={fd} direction={direction:?} ms={ms:?}");
    let mut ev = IoEvent::new(fd, direction);
    match ev.wait(ms) {
        Ok(ready) => Ok(ready),
        Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(false),
        Err(e) => Err(e),
    }
}

/// Exponential polling fallback for sets the scheduler can't turn into a
/// single suspension (more than one fd): repeated non-blocking `poll_fn`
/// calls separated by a sleep that grows 1, 2, 4, …, capped at 16ms.
pub fn poll_many<F>(mut ms: Option<u32>, mut poll_fn: F) -> io::Result<usize>
where
    F: FnMut() -> io::Result<usize>,
{
    let mut step = 1u32;
    loop {
        let r = poll_fn()?;
        if r != 0 || ms == Some(0) {
            return Ok(r);
        }
        if let Some(remaining) = ms {
            step = step.min(remaining);
        }
        sleep(step);
        if let Some(remaining) = &mut ms {
            *remaining = remaining.saturating_sub(step);
        }
        step = (step * 2).min(16);
    }
}

/// Suspend the current coroutine for `ms` milliseconds. Falls back to a
/// real thread sleep when called outside a coroutine, or when
/// `disable_hook_sleep` is set.
pub fn sleep(ms: u32) {
    if !in_coroutine() || crate::config_disable_hook_sleep() {
        std::thread::sleep(std::time::Duration::from_millis(ms as u64));
        return;
    }
    crate::sleep(ms);
}
