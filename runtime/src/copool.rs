//! Dense-id pool of coroutine control blocks ("Copool" in the original).
//!
//! Coroutines are allocated lazily and returned to a free-id list when they
//! finish; when the free list grows past a threshold their `saved_stack`
//! buffer is released to cap steady-state memory, mirroring the original's
//! `Copool::push`. The backing table is a `Vec<Box<Coroutine>>` rather than a
//! raw growable array of `Coroutine`s: each `Box` keeps the control block at
//! a stable heap address across `Vec` growth, which is what lets a raw
//! pointer to the "currently running" coroutine stay valid while the vector
//! is extended from another call.
//!
//! A `Copool` is private to the scheduler thread that owns it and is never
//! touched from another thread, so it needs no internal locking.

use crate::context::RawContext;
use crate::timer::TimerHandle;
use std::sync::Arc;

use crate::sync::wait::WaitRecord;

/// Once the free list grows past this many entries, a recycled coroutine's
/// stack save buffer is dropped instead of kept around for reuse.
const STACK_RELEASE_THRESHOLD: usize = 1024;

pub struct Coroutine {
    pub id: u32,
    /// Bumped every time this slot is recycled, so an id obtained from a
    /// stale event (a demultiplexer or timer notification that raced a
    /// `close`/completion) can be told apart from whichever task currently
    /// holds the id.
    pub generation: u32,
    pub scheduler_id: u32,
    pub stack_slot: usize,
    /// Saved stack pointer while suspended; `0` while resident or unstarted.
    pub ctx: RawContext,
    /// Copy-out buffer for this coroutine's live stack region while another
    /// coroutine occupies the shared slot.
    pub saved_stack: Vec<u8>,
    pub timer_handle: Option<TimerHandle>,
    pub wait_record: Option<Arc<WaitRecord>>,
    /// Set immediately before this coroutine is resumed when that resume is
    /// driven by its timer expiring (as opposed to an explicit wake), and
    /// cleared before every other resume. Read by `Scheduler::timed_out`.
    pub timed_out: bool,
    /// The task closure, taken the first time this coroutine is resumed.
    pub entry: Option<Box<dyn FnOnce() + Send + 'static>>,
    pub finished: bool,
}

impl Coroutine {
    fn reset(&mut self, scheduler_id: u32, stack_slot: usize, entry: Box<dyn FnOnce() + Send + 'static>) {
        self.scheduler_id = scheduler_id;
        self.stack_slot = stack_slot;
        self.ctx = 0;
        self.saved_stack.clear();
        self.timer_handle = None;
        self.wait_record = None;
        self.timed_out = false;
        self.entry = Some(entry);
        self.finished = false;
    }
}

pub struct Copool {
    table: Vec<Box<Coroutine>>,
    free_ids: Vec<u32>,
}

impl Copool {
    pub fn new() -> Self {
        Copool { table: Vec::new(), free_ids: Vec::new() }
    }

    /// Allocate (or recycle) a control block bound to `entry`, assigning it
    /// `stack_slot` on this scheduler. Returns a stable pointer into the
    /// table; valid until the coroutine is `push`ed back and the table is
    /// dropped.
    pub fn pop(
        &mut self,
        scheduler_id: u32,
        stack_slot: usize,
        entry: Box<dyn FnOnce() + Send + 'static>,
    ) -> *mut Coroutine {
        if let Some(id) = self.free_ids.pop() {
            let co = &mut self.table[id as usize];
            co.reset(scheduler_id, stack_slot, entry);
            &mut **co as *mut Coroutine
        } else {
            let id = self.table.len() as u32;
            self.table.push(Box::new(Coroutine {
                id,
                generation: 0,
                scheduler_id,
                stack_slot,
                ctx: 0,
                saved_stack: Vec::new(),
                timer_handle: None,
                wait_record: None,
                timed_out: false,
                entry: Some(entry),
                finished: false,
            }));
            &mut *self.table[id as usize] as *mut Coroutine
        }
    }

    /// Return a finished coroutine's id to the free list.
    pub fn push(&mut self, id: u32) {
        self.free_ids.push(id);
        let co = &mut self.table[id as usize];
        co.generation = co.generation.wrapping_add(1);
        if self.free_ids.len() >= STACK_RELEASE_THRESHOLD {
            co.saved_stack = Vec::new();
        }
    }

    pub fn get(&self, id: u32) -> Option<&Coroutine> {
        self.table.get(id as usize).map(|b| &**b)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Coroutine> {
        self.table.get_mut(id as usize).map(|b| &mut **b)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for Copool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_assigns_dense_ids() {
        let mut pool = Copool::new();
        let a = pool.pop(0, 0, Box::new(|| {}));
        let b = pool.pop(0, 1, Box::new(|| {}));
        unsafe {
            assert_eq!((*a).id, 0);
            assert_eq!((*b).id, 1);
        }
    }

    #[test]
    fn push_then_pop_reuses_id() {
        let mut pool = Copool::new();
        let a = pool.pop(0, 0, Box::new(|| {}));
        let id = unsafe { (*a).id };
        pool.push(id);
        let b = pool.pop(0, 0, Box::new(|| {}));
        unsafe {
            assert_eq!((*b).id, id);
        }
        assert_eq!(pool.len(), 1);
    }
}
