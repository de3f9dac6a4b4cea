//! `Pool`: a per-scheduler free list of opaque pointers, for recycling
//! thread-affine resources (parser buffers, TLS contexts) without crossing
//! scheduler threads.
//!
//! Each scheduler gets its own list so `pop`/`push` never need to
//! synchronize across threads; the cost is that `clear` cannot simply walk
//! every list from the caller's thread; it instead spawns one cleanup task
//! per scheduler so each list is drained on the thread that owns it, and
//! waits on a `WaitGroup` for all of them to finish.

use super::wait_group::WaitGroup;
use crate::current;
use std::os::raw::c_void;
use std::sync::{Arc, Mutex};

type CreateFn = dyn Fn() -> *mut c_void + Send + Sync;
type DestroyFn = dyn Fn(*mut c_void) + Send + Sync;

struct PoolInner {
    lists: Vec<Mutex<Vec<usize>>>,
    cap: usize,
    create: Option<Box<CreateFn>>,
    destroy: Option<Box<DestroyFn>>,
}

// Pointers are opaque payload handed back verbatim to the caller's own
// create/destroy callbacks; this type never dereferences them.
unsafe impl Send for PoolInner {}
unsafe impl Sync for PoolInner {}

/// A cheaply cloned handle; all clones share the same per-scheduler lists.
#[derive(Clone)]
pub struct Pool(Arc<PoolInner>);

impl Pool {
    pub fn new(scheduler_count: usize, cap: usize) -> Self {
        Pool::with_callbacks(scheduler_count, cap, None, None)
    }

    pub fn with_callbacks(
        scheduler_count: usize,
        cap: usize,
        create: Option<Box<CreateFn>>,
        destroy: Option<Box<DestroyFn>>,
    ) -> Self {
        let lists = (0..scheduler_count).map(|_| Mutex::new(Vec::new())).collect();
        Pool(Arc::new(PoolInner { lists, cap, create, destroy }))
    }

    fn list_for(&self, scheduler_id: u32) -> &Mutex<Vec<usize>> {
        &self.0.lists[scheduler_id as usize]
    }

    /// Pop a value off the calling coroutine's scheduler's free list,
    /// creating one via the pool's `create` callback if the list is empty
    /// and a callback was provided.
    pub fn pop(&self) -> Option<*mut c_void> {
        let (scheduler_id, _) = current::running().expect("Pool::pop called outside a coroutine");
        let mut list = self.list_for(scheduler_id).lock().unwrap();
        if let Some(raw) = list.pop() {
            return Some(raw as *mut c_void);
        }
        drop(list);
        self.0.create.as_ref().map(|f| f())
    }

    /// Push a value back onto the calling coroutine's scheduler's free
    /// list, destroying it immediately instead if the list is already at
    /// capacity.
    pub fn push(&self, p: *mut c_void) {
        let (scheduler_id, _) = current::running().expect("Pool::push called outside a coroutine");
        let mut list = self.list_for(scheduler_id).lock().unwrap();
        if list.len() >= self.0.cap {
            drop(list);
            if let Some(destroy) = &self.0.destroy {
                destroy(p);
            }
        } else {
            list.push(p as usize);
        }
    }

    /// Total number of values presently held across every scheduler's free
    /// list.
    pub fn size(&self) -> usize {
        self.0.lists.iter().map(|l| l.lock().unwrap().len()).sum()
    }

    /// Drain and destroy every free list, one cleanup task per scheduler so
    /// each runs on the thread that owns the list.
    pub fn clear(&self) {
        let n = self.0.lists.len();
        if n == 0 {
            return;
        }
        let wg = WaitGroup::new();
        wg.add(n as u32);
        for scheduler_id in 0..n {
            let pool = self.clone();
            let wg = wg.clone();
            crate::scheduler_manager::spawn_on(
                scheduler_id as u32,
                Box::new(move || {
                    let mut list = pool.list_for(scheduler_id as u32).lock().unwrap();
                    let drained = std::mem::take(&mut *list);
                    drop(list);
                    if let Some(destroy) = &pool.0.destroy {
                        for raw in drained {
                            destroy(raw as *mut c_void);
                        }
                    }
                    wg.done();
                }),
            );
        }
        wg.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_without_create_callback_returns_none_when_empty() {
        let pool = Pool::new(1, 16);
        // Not running inside a coroutine here; exercise the list directly
        // to avoid the `current::running` panic path in a unit test.
        let list = pool.list_for(0).lock().unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn size_reflects_manual_pushes() {
        let pool = Pool::new(2, 16);
        pool.list_for(0).lock().unwrap().push(0xdead);
        pool.list_for(1).lock().unwrap().push(0xbeef);
        assert_eq!(pool.size(), 2);
    }
}
