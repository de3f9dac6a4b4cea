//! Per-fd socket context table.
//!
//! The original keys a lazily-grown two-level array directly by raw fd so
//! lookups never allocate on the hot path. This port uses a `Mutex<HashMap>`
//! instead: fds are not dense in a safe Rust program the way they are in a
//! C runtime that hands out consecutive descriptors, and a hash map keeps
//! the invariants (at most one reader, at most one writer, atomic clear on
//! close) just as easily with a much smaller unsafe surface. See
//! `DESIGN.md` for the tradeoff.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    pub scheduler_id: u32,
    pub coroutine_id: u32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SockCtx {
    reader: Option<Waiter>,
    writer: Option<Waiter>,
}

impl SockCtx {
    pub fn has_ev_read(&self) -> bool {
        self.reader.is_some()
    }

    pub fn has_ev_write(&self) -> bool {
        self.writer.is_some()
    }

    pub fn has_ev_read_on(&self, scheduler_id: u32) -> bool {
        matches!(self.reader, Some(w) if w.scheduler_id == scheduler_id)
    }

    pub fn has_ev_write_on(&self, scheduler_id: u32) -> bool {
        matches!(self.writer, Some(w) if w.scheduler_id == scheduler_id)
    }

    pub fn has_event(&self) -> bool {
        self.has_ev_read() || self.has_ev_write()
    }

    pub fn add_ev_read(&mut self, scheduler_id: u32, coroutine_id: u32) {
        self.reader = Some(Waiter { scheduler_id, coroutine_id });
    }

    pub fn add_ev_write(&mut self, scheduler_id: u32, coroutine_id: u32) {
        self.writer = Some(Waiter { scheduler_id, coroutine_id });
    }

    pub fn del_ev_read(&mut self) {
        self.reader = None;
    }

    pub fn del_ev_write(&mut self) {
        self.writer = None;
    }

    pub fn del_event(&mut self) {
        self.reader = None;
        self.writer = None;
    }

    pub fn get_ev_read(&self, scheduler_id: u32) -> Option<u32> {
        self.reader.filter(|w| w.scheduler_id == scheduler_id).map(|w| w.coroutine_id)
    }

    pub fn get_ev_write(&self, scheduler_id: u32) -> Option<u32> {
        self.writer.filter(|w| w.scheduler_id == scheduler_id).map(|w| w.coroutine_id)
    }
}

pub struct SockCtxTable {
    inner: Mutex<HashMap<i32, SockCtx>>,
}

impl SockCtxTable {
    fn new() -> Self {
        SockCtxTable { inner: Mutex::new(HashMap::new()) }
    }

    pub fn with<R>(&self, fd: i32, f: impl FnOnce(&mut SockCtx) -> R) -> R {
        let mut table = self.inner.lock().unwrap();
        let ctx = table.entry(fd).or_default();
        f(ctx)
    }

    pub fn remove(&self, fd: i32) {
        self.inner.lock().unwrap().remove(&fd);
    }
}

static TABLE: OnceLock<SockCtxTable> = OnceLock::new();

/// The process-wide socket context table, matching the original's
/// `co::get_sock_ctx` singleton.
pub fn table() -> &'static SockCtxTable {
    TABLE.get_or_init(SockCtxTable::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_and_writer_are_independent() {
        let t = SockCtxTable::new();
        t.with(5, |c| c.add_ev_read(0, 1));
        t.with(5, |c| c.add_ev_write(1, 2));
        t.with(5, |c| {
            assert!(c.has_ev_read_on(0));
            assert!(c.has_ev_write_on(1));
            assert!(!c.has_ev_read_on(1));
        });
    }

    #[test]
    fn close_clears_both_sides() {
        let t = SockCtxTable::new();
        t.with(7, |c| {
            c.add_ev_read(0, 1);
            c.add_ev_write(0, 2);
        });
        t.with(7, |c| c.del_event());
        t.with(7, |c| assert!(!c.has_event()));
    }
}
