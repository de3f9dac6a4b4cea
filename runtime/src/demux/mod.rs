//! Platform readiness/completion demultiplexer, wrapped behind one interface
//! per the original's epoll/kqueue/iocp trio.
//!
//! Exactly one demultiplexer implementation is compiled in, selected by
//! `cfg(target_os = ...)`. All three share the same public shape: register
//! interest tagged by coroutine id, wait for a batch of events, and decode
//! which coroutine(s) became resumable. A self-pipe (POSIX) or an extra
//! completion packet (Windows) gives every scheduler a `signal()` any other
//! thread can call to interrupt a blocked `wait`.

use std::io;

/// Which side of a full-duplex fd a coroutine is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Common shape implemented by the platform-specific demultiplexer.
pub trait Demultiplexer {
    /// Register (or upgrade an existing registration for) read-readiness on
    /// `fd`, tagged with `coroutine_id`. Returns `false` on registration
    /// failure.
    fn add_ev_read(&mut self, fd: RawFd, coroutine_id: u32) -> bool;
    fn add_ev_write(&mut self, fd: RawFd, coroutine_id: u32) -> bool;
    fn del_ev_read(&mut self, fd: RawFd);
    fn del_ev_write(&mut self, fd: RawFd);
    fn del_event(&mut self, fd: RawFd);

    /// Block for up to `ms` milliseconds (forever if negative), appending
    /// every coroutine id that became resumable to `ready`. Internal
    /// bookkeeping events (the wakeup pipe, empty completion packets) are
    /// consumed and never appear in `ready`.
    fn wait(&mut self, ms: i32, ready: &mut Vec<u32>) -> io::Result<()>;

    /// Wake a thread blocked in `wait`, from any thread. Idempotent: several
    /// back-to-back calls collapse into at most one extra wakeup.
    fn signal(&self);
}

#[cfg(unix)]
pub type RawFd = std::os::unix::io::RawFd;
#[cfg(windows)]
pub type RawFd = std::os::windows::io::RawSocket;

#[cfg(target_os = "linux")]
mod epoll;
#[cfg(target_os = "linux")]
pub use epoll::Epoll as PlatformDemux;

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
mod kqueue;
#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
pub use kqueue::Kqueue as PlatformDemux;

#[cfg(windows)]
mod iocp;
#[cfg(windows)]
pub use iocp::Iocp as PlatformDemux;

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly",
    windows
)))]
compile_error!("green_rt has no demultiplexer for this target_os");
