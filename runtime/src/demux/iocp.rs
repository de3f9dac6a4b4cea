//! Windows demultiplexer, backed by an I/O completion port.
//!
//! `#[cfg(windows)]`-only and reviewed but not exercised on real Windows
//! hardware in this crate's own test run; see `SPEC_FULL.md` for that
//! caveat. A completion port delivers completions rather than plain
//! readiness, so sockets here are expected to be driven with overlapped
//! `WSARecv`/`WSASend` (see `crate::hook::windows`), and each completed
//! overlapped I/O carries its own coroutine id via its `OVERLAPPED`
//! extension rather than through the shared [`crate::sock_ctx`] table; the
//! read/write split that table exists for is still consulted so both
//! backends expose the identical `Demultiplexer` shape.

use super::{Demultiplexer, RawFd};
use crate::sock_ctx;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use winapi::shared::minwindef::DWORD;
use winapi::shared::ntdef::NULL;
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::ioapiset::{CreateIoCompletionPort, GetQueuedCompletionStatusEx, PostQueuedCompletionStatus};
use winapi::um::minwinbase::OVERLAPPED_ENTRY;

const MAX_EVENTS: usize = 1024;
/// Completion key used for the wakeup packet posted by `signal`; real
/// sockets are associated with their own fd as the key, which is never 0.
const WAKEUP_KEY: usize = 0;

pub struct Iocp {
    port: winapi::um::winnt::HANDLE,
    signaled: AtomicBool,
    scheduler_id: u32,
    entries: Vec<OVERLAPPED_ENTRY>,
}

unsafe impl Send for Iocp {}

impl Iocp {
    pub fn new(scheduler_id: u32) -> io::Result<Self> {
        let port = unsafe {
            CreateIoCompletionPort(INVALID_HANDLE_VALUE, ptr::null_mut(), 0, 0)
        };
        if port.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Iocp {
            port,
            signaled: AtomicBool::new(false),
            scheduler_id,
            entries: vec![unsafe { std::mem::zeroed() }; MAX_EVENTS],
        })
    }

    /// Associate `fd` with this completion port. Overlapped operations
    /// issued against it afterwards surface through `wait`.
    pub fn add_event(&self, fd: RawFd) -> bool {
        sock_ctx::table().with(fd as i32, |ctx| {
            if ctx.has_event() {
                return true;
            }
            let handle = fd as winapi::um::winnt::HANDLE;
            let r = unsafe { CreateIoCompletionPort(handle, self.port, fd as usize, 0) };
            if !r.is_null() {
                ctx.add_ev_read(self.scheduler_id, 0);
                true
            } else {
                false
            }
        })
    }
}

impl Drop for Iocp {
    fn drop(&mut self) {
        unsafe {
            if !self.port.is_null() {
                CloseHandle(self.port);
                self.port = ptr::null_mut();
            }
        }
    }
}

impl Demultiplexer for Iocp {
    fn add_ev_read(&mut self, fd: RawFd, coroutine_id: u32) -> bool {
        let ok = self.add_event(fd);
        if ok {
            sock_ctx::table().with(fd as i32, |ctx| ctx.add_ev_read(self.scheduler_id, coroutine_id));
        }
        ok
    }

    fn add_ev_write(&mut self, fd: RawFd, coroutine_id: u32) -> bool {
        let ok = self.add_event(fd);
        if ok {
            sock_ctx::table().with(fd as i32, |ctx| ctx.add_ev_write(self.scheduler_id, coroutine_id));
        }
        ok
    }

    fn del_ev_read(&mut self, fd: RawFd) {
        sock_ctx::table().with(fd as i32, |ctx| ctx.del_ev_read());
    }

    fn del_ev_write(&mut self, fd: RawFd) {
        sock_ctx::table().with(fd as i32, |ctx| ctx.del_ev_write());
    }

    fn del_event(&mut self, fd: RawFd) {
        sock_ctx::table().with(fd as i32, |ctx| ctx.del_event());
    }

    fn wait(&mut self, ms: i32, ready: &mut Vec<u32>) -> io::Result<()> {
        let timeout: DWORD = if ms < 0 { winapi::um::winbase::INFINITE } else { ms as DWORD };
        let mut removed: u32 = 0;
        let ok = unsafe {
            GetQueuedCompletionStatusEx(
                self.port,
                self.entries.as_mut_ptr(),
                MAX_EVENTS as u32,
                &mut removed,
                timeout,
                0,
            )
        };
        if ok == 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::TimedOut {
                return Ok(());
            }
            return Err(e);
        }

        let sched_id = self.scheduler_id;
        for i in 0..removed as usize {
            let entry = self.entries[i];
            if entry.lpCompletionKey == WAKEUP_KEY {
                self.signaled.store(false, Ordering::Release);
                continue;
            }
            let fd = entry.lpCompletionKey as RawFd as i32;
            sock_ctx::table().with(fd, |ctx| {
                if let Some(co_id) = ctx.get_ev_read(sched_id) {
                    ready.push(co_id);
                }
                if let Some(co_id) = ctx.get_ev_write(sched_id) {
                    ready.push(co_id);
                }
            });
        }
        Ok(())
    }

    fn signal(&self) {
        if self.signaled.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            unsafe {
                PostQueuedCompletionStatus(self.port, 0, WAKEUP_KEY, NULL as *mut _);
            }
        }
    }
}
