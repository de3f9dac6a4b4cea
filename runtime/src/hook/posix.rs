//! POSIX surface: `socket`/`connect`/`accept`/`read`/`write`/`recv`/`send`/
//! `close`/`shutdown`/`poll`-equivalents and the timeout setters, each
//! deciding per-call whether to suspend cooperatively or fall straight
//! through to the blocking syscall.
//!
//! Fallthrough happens when: there's no scheduler bound to this thread,
//! the fd was explicitly marked non-blocking by its owner, or (for
//! `read`/`write`) the fd isn't a socket or pipe at all. Otherwise the call
//! is retried against the non-blocking descriptor with an `IoEvent`
//! suspension standing in for the wait a blocking syscall would do in the
//! kernel.

use super::{ensure_non_blocking, in_coroutine, retry_until_ready};
use crate::demux::{Direction, RawFd};
use crate::error;
use crate::io_event::IoEvent;
use crate::net;
use log::trace;
use std::io;
use std::net::SocketAddr;

/// Create a socket and mark it as one in the hook table, so `read`/`write`
/// on it later get the suspend-on-`EWOULDBLOCK` treatment.
pub fn socket(domain: libc::c_int, ty: libc::c_int, protocol: libc::c_int) -> io::Result<RawFd> {
    let fd = net::socket(domain, ty, protocol)?;
    super::with_ctx(fd, |ctx| ctx.set_sock_or_pipe());
    Ok(fd)
}

pub fn pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(error::last_os_error());
    }
    for fd in fds {
        net::set_nonblock(fd);
        super::with_ctx(fd, |ctx| ctx.set_sock_or_pipe());
    }
    Ok((fds[0], fds[1]))
}

/// Record the caller's own non-blocking choice. Must be called instead of
/// a raw `fcntl(O_NONBLOCK)` for the hook layer to honor it.
pub fn set_non_blocking(fd: RawFd, v: bool) {
    if v {
        net::set_nonblock(fd);
    }
    super::with_ctx(fd, |ctx| ctx.set_non_blocking(v));
}

pub fn set_send_timeout(fd: RawFd, ms: u32) {
    super::with_ctx(fd, |ctx| ctx.set_send_timeout(ms));
}

pub fn set_recv_timeout(fd: RawFd, ms: u32) {
    super::with_ctx(fd, |ctx| ctx.set_recv_timeout(ms));
}

pub fn close(fd: RawFd) -> io::Result<()> {
    trace!("hook close fd={fd}");
    super::clear_ctx(fd);
    net::close(fd, 0)
}

pub fn shutdown(fd: RawFd, how: net::Shutdown) -> io::Result<()> {
    trace!("hook shutdown fd={fd} how={how:?}");
    match how {
        net::Shutdown::Read => super::with_ctx(fd, |ctx| ctx.set_shut_read()),
        net::Shutdown::Write => super::with_ctx(fd, |ctx| ctx.set_shut_write()),
        net::Shutdown::Both => super::clear_ctx(fd),
    }
    net::shutdown(fd, how)
}

pub fn connect(fd: RawFd, addr: SocketAddr) -> io::Result<()> {
    trace!("hook connect fd={fd}");
    if !in_coroutine() {
        return net::connect(fd, addr, None);
    }
    let ctx = super::get_ctx(fd);
    if ctx.is_non_blocking() {
        return net::connect(fd, addr, None);
    }

    // The original temporarily flips the fd non-blocking for the duration
    // of this call and restores it afterward, rather than leaving a
    // permanent nb_mark the way accept/read/write do, since a caller who
    // asked for a blocking connect() expects later operations on the fd to
    // still look blocking.
    net::set_nonblock(fd);
    let result = net::connect(fd, addr, ctx.send_timeout());
    unsafe {
        libc::fcntl(fd, libc::F_SETFL, libc::fcntl(fd, libc::F_GETFL) & !libc::O_NONBLOCK);
    }
    result
}

pub fn accept(fd: RawFd) -> io::Result<RawFd> {
    trace!("hook accept fd={fd}");
    if !in_coroutine() {
        return net::accept(fd);
    }
    let ctx = super::get_ctx(fd);
    if ctx.is_non_blocking() {
        return net::accept(fd);
    }
    ensure_non_blocking(fd);
    net::accept(fd)
}

pub fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let ctx = super::get_ctx(fd);
    if !in_coroutine() || !ctx.is_sock_or_pipe() || ctx.is_non_blocking() {
        return raw_read(fd, buf);
    }
    ensure_non_blocking(fd);
    let ev = IoEvent::new(fd, Direction::Read);
    retry_until_ready(ev, ctx.recv_timeout(), || raw_read(fd, buf))
}

pub fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let ctx = super::get_ctx(fd);
    if !in_coroutine() || !ctx.is_sock_or_pipe() || ctx.is_non_blocking() {
        return raw_write(fd, buf);
    }
    ensure_non_blocking(fd);
    let ev = IoEvent::new(fd, Direction::Write);
    retry_until_ready(ev, ctx.send_timeout(), || raw_write(fd, buf))
}

pub fn recv(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let ctx = super::get_ctx(fd);
    if !in_coroutine() || ctx.is_non_blocking() {
        return raw_read(fd, buf);
    }
    ensure_non_blocking(fd);
    let ev = IoEvent::new(fd, Direction::Read);
    retry_until_ready(ev, ctx.recv_timeout(), || raw_read(fd, buf))
}

pub fn send(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let ctx = super::get_ctx(fd);
    if !in_coroutine() || ctx.is_non_blocking() {
        return raw_write(fd, buf);
    }
    ensure_non_blocking(fd);
    let ev = IoEvent::new(fd, Direction::Write);
    retry_until_ready(ev, ctx.send_timeout(), || raw_write(fd, buf))
}

/// Single-fd `poll`: a pure `POLLIN` or `POLLOUT` interest converts to a
/// proper suspension. Returns `0`/`1`, matching `poll(2)`'s return-count
/// convention for a single-fd set.
pub fn poll_single(fd: RawFd, want_write: bool, ms: Option<u32>) -> io::Result<i32> {
    if !in_coroutine() {
        return raw_poll_single(fd, want_write, ms);
    }
    let direction = if want_write { Direction::Write } else { Direction::Read };
    Ok(if super::poll_one(fd, direction, ms)? { 1 } else { 0 })
}

/// General `poll`: a single fd with a pure read-or-write interest takes
/// the suspension path above; larger sets fall back to repeated
/// non-blocking polls with the bounded exponential backoff described in
/// `hook::poll_many`, since there's no single coroutine to suspend on
/// behalf of several fds at once.
pub fn poll(fds: &mut [libc::pollfd], ms: Option<u32>) -> io::Result<i32> {
    if !in_coroutine() || ms == Some(0) {
        return raw_poll(fds, ms);
    }
    if fds.len() == 1 {
        let want_write = fds[0].events == libc::POLLOUT;
        if fds[0].fd >= 0 && (fds[0].events == libc::POLLIN || want_write) {
            let r = poll_single(fds[0].fd, want_write, ms)?;
            if r == 1 {
                fds[0].revents = fds[0].events;
            }
            return Ok(r);
        }
    }

    super::poll_many(ms, || raw_poll(fds, Some(0)).map(|r| r.max(0) as usize))
        .map(|r| r as i32)
}

fn raw_poll(fds: &mut [libc::pollfd], ms: Option<u32>) -> io::Result<i32> {
    let timeout = ms.map(|m| m as libc::c_int).unwrap_or(-1);
    let r = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
    if r == -1 {
        Err(error::last_os_error())
    } else {
        Ok(r)
    }
}

fn raw_read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let r = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if r == -1 {
        Err(error::last_os_error())
    } else {
        Ok(r as usize)
    }
}

fn raw_write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let r = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if r == -1 {
        Err(error::last_os_error())
    } else {
        Ok(r as usize)
    }
}

fn raw_poll_single(fd: RawFd, want_write: bool, ms: Option<u32>) -> io::Result<i32> {
    let mut pfd = libc::pollfd { fd, events: if want_write { libc::POLLOUT } else { libc::POLLIN }, revents: 0 };
    let timeout = ms.map(|m| m as libc::c_int).unwrap_or(-1);
    let r = unsafe { libc::poll(&mut pfd, 1, timeout) };
    if r == -1 {
        Err(error::last_os_error())
    } else {
        Ok(r)
    }
}
