//! Linux demultiplexer, backed directly by `epoll(7)` plus a self-pipe.
//!
//! A single `epoll_event` carries one `data` word per fd, but a socket's
//! reader and writer can be two different coroutines (one blocked in
//! `recv`, one in `send`). Rather than decode through the shared
//! [`crate::sock_ctx`] table on every wakeup, the word is split the way the
//! spec calls for: the high 32 bits hold the reader's id, the low 32 bits
//! the writer's, each stored as `id + 1` so `0` unambiguously means "no
//! waiter on this side" (coroutine ids themselves start at 0). `sock_ctx`
//! is still consulted at registration time, to look up whichever side
//! isn't the one currently being added or removed, so that side's id
//! survives into the rebuilt word.

use super::{Demultiplexer, RawFd};
use crate::sock_ctx;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

const MAX_EVENTS: usize = 1024;
const PIPE_SENTINEL: u64 = u64::MAX;

fn pack(reader: Option<u32>, writer: Option<u32>) -> u64 {
    let r = reader.map_or(0u64, |id| id as u64 + 1);
    let w = writer.map_or(0u64, |id| id as u64 + 1);
    (r << 32) | w
}

fn unpack(word: u64) -> (Option<u32>, Option<u32>) {
    let r = (word >> 32) as u32;
    let w = (word & 0xFFFF_FFFF) as u32;
    (r.checked_sub(1), w.checked_sub(1))
}

pub struct Epoll {
    epfd: RawFd,
    pipe_r: RawFd,
    pipe_w: RawFd,
    signaled: AtomicBool,
    scheduler_id: u32,
    events: Vec<libc::epoll_event>,
}

impl Epoll {
    pub fn new(scheduler_id: u32) -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut fds = [0; 2];
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epfd) };
            return Err(err);
        }

        let mut demux = Epoll {
            epfd,
            pipe_r: fds[0],
            pipe_w: fds[1],
            signaled: AtomicBool::new(false),
            scheduler_id,
            events: vec![unsafe { std::mem::zeroed() }; MAX_EVENTS],
        };

        let mut ev = libc::epoll_event { events: libc::EPOLLIN as u32, u64: PIPE_SENTINEL };
        let r = unsafe { libc::epoll_ctl(demux.epfd, libc::EPOLL_CTL_ADD, demux.pipe_r, &mut ev) };
        if r != 0 {
            let err = io::Error::last_os_error();
            demux.close();
            return Err(err);
        }

        Ok(demux)
    }

    fn close(&mut self) {
        unsafe {
            if self.epfd >= 0 {
                libc::close(self.epfd);
                self.epfd = -1;
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
            let r = unsafe { libc::read(self.pipe_r, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
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

impl Drop for Epoll {
    fn drop(&mut self) {
        self.close();
    }
}

impl Demultiplexer for Epoll {
    fn add_ev_read(&mut self, fd: RawFd, coroutine_id: u32) -> bool {
        if fd < 0 {
            return false;
        }
        let sched_id = self.scheduler_id;
        let epfd = self.epfd;
        sock_ctx::table().with(fd, |ctx| {
            if ctx.has_ev_read() {
                return true;
            }
            let writer = ctx.get_ev_write(sched_id);
            let mask = if writer.is_some() {
                libc::EPOLLIN | libc::EPOLLOUT | libc::EPOLLET
            } else {
                libc::EPOLLIN | libc::EPOLLET
            };
            let mut ev = libc::epoll_event { events: mask as u32, u64: pack(Some(coroutine_id), writer) };
            let op = if writer.is_some() { libc::EPOLL_CTL_MOD } else { libc::EPOLL_CTL_ADD };
            let r = unsafe { libc::epoll_ctl(epfd, op, fd, &mut ev) };
            if r == 0 {
                ctx.add_ev_read(sched_id, coroutine_id);
                true
            } else {
                false
            }
        })
    }

    fn add_ev_write(&mut self, fd: RawFd, coroutine_id: u32) -> bool {
        if fd < 0 {
            return false;
        }
        let sched_id = self.scheduler_id;
        let epfd = self.epfd;
        sock_ctx::table().with(fd, |ctx| {
            if ctx.has_ev_write() {
                return true;
            }
            let reader = ctx.get_ev_read(sched_id);
            let mask = if reader.is_some() {
                libc::EPOLLIN | libc::EPOLLOUT | libc::EPOLLET
            } else {
                libc::EPOLLOUT | libc::EPOLLET
            };
            let mut ev = libc::epoll_event { events: mask as u32, u64: pack(reader, Some(coroutine_id)) };
            let op = if reader.is_some() { libc::EPOLL_CTL_MOD } else { libc::EPOLL_CTL_ADD };
            let r = unsafe { libc::epoll_ctl(epfd, op, fd, &mut ev) };
            if r == 0 {
                ctx.add_ev_write(sched_id, coroutine_id);
                true
            } else {
                false
            }
        })
    }

    fn del_ev_read(&mut self, fd: RawFd) {
        if fd < 0 {
            return;
        }
        let sched_id = self.scheduler_id;
        let epfd = self.epfd;
        sock_ctx::table().with(fd, |ctx| {
            if !ctx.has_ev_read() {
                return;
            }
            ctx.del_ev_read();
            let writer = ctx.get_ev_write(sched_id);
            if writer.is_none() {
                unsafe { libc::epoll_ctl(epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
            } else {
                let mut ev = libc::epoll_event {
                    events: (libc::EPOLLOUT | libc::EPOLLET) as u32,
                    u64: pack(None, writer),
                };
                unsafe { libc::epoll_ctl(epfd, libc::EPOLL_CTL_MOD, fd, &mut ev) };
            }
        });
    }

    fn del_ev_write(&mut self, fd: RawFd) {
        if fd < 0 {
            return;
        }
        let sched_id = self.scheduler_id;
        let epfd = self.epfd;
        sock_ctx::table().with(fd, |ctx| {
            if !ctx.has_ev_write() {
                return;
            }
            ctx.del_ev_write();
            let reader = ctx.get_ev_read(sched_id);
            if reader.is_none() {
                unsafe { libc::epoll_ctl(epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
            } else {
                let mut ev = libc::epoll_event {
                    events: (libc::EPOLLIN | libc::EPOLLET) as u32,
                    u64: pack(reader, None),
                };
                unsafe { libc::epoll_ctl(epfd, libc::EPOLL_CTL_MOD, fd, &mut ev) };
            }
        });
    }

    fn del_event(&mut self, fd: RawFd) {
        if fd < 0 {
            return;
        }
        let epfd = self.epfd;
        sock_ctx::table().with(fd, |ctx| {
            if ctx.has_event() {
                ctx.del_event();
                unsafe { libc::epoll_ctl(epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
            }
        });
    }

    fn wait(&mut self, ms: i32, ready: &mut Vec<u32>) -> io::Result<()> {
        let n = unsafe { libc::epoll_wait(self.epfd, self.events.as_mut_ptr(), MAX_EVENTS as i32, ms) };
        if n < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(e);
        }

        for i in 0..n as usize {
            let ev = self.events[i];
            if ev.u64 == PIPE_SENTINEL {
                self.handle_ev_pipe();
                continue;
            }
            let (reader, writer) = unpack(ev.u64);
            let readable = ev.events & (libc::EPOLLIN as u32 | libc::EPOLLERR as u32 | libc::EPOLLHUP as u32) != 0;
            let writable = ev.events & (libc::EPOLLOUT as u32 | libc::EPOLLERR as u32 | libc::EPOLLHUP as u32) != 0;
            if readable {
                if let Some(co_id) = reader {
                    ready.push(co_id);
                }
            }
            if writable {
                if let Some(co_id) = writer {
                    ready.push(co_id);
                }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrips() {
        assert_eq!(unpack(pack(Some(7), Some(9))), (Some(7), Some(9)));
        assert_eq!(unpack(pack(None, Some(3))), (None, Some(3)));
        assert_eq!(unpack(pack(Some(0), None)), (Some(0), None));
    }

    #[test]
    fn new_epoll_has_no_ready_events_immediately() {
        let mut demux = Epoll::new(0).expect("epoll_create1");
        let mut ready = Vec::new();
        demux.wait(0, &mut ready).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn signal_wakes_wait() {
        let mut demux = Epoll::new(0).expect("epoll_create1");
        demux.signal();
        let mut ready = Vec::new();
        demux.wait(1000, &mut ready).unwrap();
        assert!(ready.is_empty());
    }
}
