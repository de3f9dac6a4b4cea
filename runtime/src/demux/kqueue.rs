//! BSD/macOS demultiplexer, backed by `kqueue(2)` plus a self-pipe.
//!
//! Unlike epoll, kqueue tracks read and write interest on the same fd as two
//! independent filter registrations (`EVFILT_READ` / `EVFILT_WRITE`), each
//! with its own `udata` slot, so the waiter id rides directly on the kevent
//! instead of needing to be packed or looked back up through
//! [`crate::sock_ctx`] at wake time. The table is still updated on every
//! registration change so it stays accurate for anything else that
//! consults it (the hook layer's `has_event` checks on close, for one).

use super::{Demultiplexer, RawFd};
use crate::sock_ctx;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

const MAX_EVENTS: usize = 1024;

pub struct Kqueue {
    kq: RawFd,
    pipe_r: RawFd,
    pipe_w: RawFd,
    signaled: AtomicBool,
    scheduler_id: u32,
    events: Vec<libc::kevent>,
}

fn kevent_register(kq: RawFd, fd: RawFd, filter: i16, flags: u16, udata: usize) -> io::Result<()> {
    let mut kev: libc::kevent = unsafe { std::mem::zeroed() };
    kev.ident = fd as usize;
    kev.filter = filter;
    kev.flags = flags;
    kev.udata = udata as *mut libc::c_void;
    let r = unsafe { libc::kevent(kq, &kev, 1, ptr::null_mut(), 0, ptr::null()) };
    if r < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

impl Kqueue {
    pub fn new(scheduler_id: u32) -> io::Result<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut fds = [0; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(kq) };
            return Err(err);
        }
        unsafe {
            libc::fcntl(fds[0], libc::F_SETFL, libc::O_NONBLOCK);
            libc::fcntl(fds[0], libc::F_SETFD, libc::FD_CLOEXEC);
            libc::fcntl(fds[1], libc::F_SETFD, libc::FD_CLOEXEC);
        }

        let demux = Kqueue {
            kq,
            pipe_r: fds[0],
            pipe_w: fds[1],
            signaled: AtomicBool::new(false),
            scheduler_id,
            events: vec![unsafe { std::mem::zeroed() }; MAX_EVENTS],
        };

        kevent_register(demux.kq, demux.pipe_r, libc::EVFILT_READ, libc::EV_ADD, 0)?;
        Ok(demux)
    }

    fn close(&mut self) {
        unsafe {
            if self.kq >= 0 {
                libc::close(self.kq);
                self.kq = -1;
            }
            if self.pipe_r >= 0 {
                libc::close(self.pipe_r);
                self.pipe_r = -1;
            }
            if self.pipe_w >= 0 {
                libc::close(self.pipe_w);
                self.pipe_w = -1;
            }
        }
    }

    fn handle_ev_pipe(&self) {
        let mut buf = [0u8; 256];
        loop {
            let r = unsafe {
                libc::read(self.pipe_r, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if r < 0 {
                break;
            }
            if (r as usize) < buf.len() {
                break;
            }
        }
        self.signaled.store(false, Ordering::Release);
    }
}

impl Drop for Kqueue {
    fn drop(&mut self) {
        self.close();
    }
}

impl Demultiplexer for Kqueue {
    fn add_ev_read(&mut self, fd: RawFd, coroutine_id: u32) -> bool {
        if fd < 0 {
            return false;
        }
        if kevent_register(self.kq, fd, libc::EVFILT_READ, libc::EV_ADD | libc::EV_CLEAR, coroutine_id as usize + 1)
            .is_err()
        {
            return false;
        }
        sock_ctx::table().with(fd, |ctx| ctx.add_ev_read(self.scheduler_id, coroutine_id));
        true
    }

    fn add_ev_write(&mut self, fd: RawFd, coroutine_id: u32) -> bool {
        if fd < 0 {
            return false;
        }
        if kevent_register(self.kq, fd, libc::EVFILT_WRITE, libc::EV_ADD | libc::EV_CLEAR, coroutine_id as usize + 1)
            .is_err()
        {
            return false;
        }
        sock_ctx::table().with(fd, |ctx| ctx.add_ev_write(self.scheduler_id, coroutine_id));
        true
    }

    fn del_ev_read(&mut self, fd: RawFd) {
        if fd < 0 {
            return;
        }
        let _ = kevent_register(self.kq, fd, libc::EVFILT_READ, libc::EV_DELETE, 0);
        sock_ctx::table().with(fd, |ctx| ctx.del_ev_read());
    }

    fn del_ev_write(&mut self, fd: RawFd) {
        if fd < 0 {
            return;
        }
        let _ = kevent_register(self.kq, fd, libc::EVFILT_WRITE, libc::EV_DELETE, 0);
        sock_ctx::table().with(fd, |ctx| ctx.del_ev_write());
    }

    fn del_event(&mut self, fd: RawFd) {
        if fd < 0 {
            return;
        }
        let _ = kevent_register(self.kq, fd, libc::EVFILT_READ, libc::EV_DELETE, 0);
        let _ = kevent_register(self.kq, fd, libc::EVFILT_WRITE, libc::EV_DELETE, 0);
        sock_ctx::table().with(fd, |ctx| ctx.del_event());
    }

    fn wait(&mut self, ms: i32, ready: &mut Vec<u32>) -> io::Result<()> {
        let timeout = if ms < 0 {
            None
        } else {
            Some(libc::timespec { tv_sec: (ms / 1000) as libc::time_t, tv_nsec: ((ms % 1000) * 1_000_000) as libc::c_long })
        };
        let timeout_ptr = timeout.as_ref().map_or(ptr::null(), |t| t as *const libc::timespec);

        let n = unsafe {
            libc::kevent(
                self.kq,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                MAX_EVENTS as i32,
                timeout_ptr,
            )
        };
        if n < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(e);
        }

        for i in 0..n as usize {
            let kev = self.events[i];
            let fd = kev.ident as RawFd;
            if fd == self.pipe_r {
                self.handle_ev_pipe();
                continue;
            }
            if let Some(co_id) = (kev.udata as usize).checked_sub(1) {
                ready.push(co_id as u32);
            }
        }
        Ok(())
    }

    fn signal(&self) {
        if self.signaled.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            let byte = b'x';
            unsafe {
                libc::write(self.pipe_w, &byte as *const u8 as *const libc::c_void, 1);
            }
        }
    }
}
