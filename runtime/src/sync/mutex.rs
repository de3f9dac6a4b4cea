//! `Mutex`: a strict FIFO lock meant for coroutines.
//!
//! Ownership transfers directly from `unlock` to the head of the wait
//! queue rather than being re-contended, so a coroutine that has been
//! waiting longest always goes next. There is no timed variant: a blocked
//! coroutine only resumes when `unlock` hands it the lock. Calling `lock`
//! from a plain thread (not inside a coroutine) is a misuse this type
//! cannot safely honor, since there would be no coroutine to wake later;
//! it is rejected in debug builds and merely logged in release ones rather
//! than left to corrupt the queue.

use super::wait::WaitRecord;
use crate::current;
use log::error;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

struct State {
    locked: bool,
    queue: VecDeque<Arc<WaitRecord>>,
}

struct MutexInner {
    state: StdMutex<State>,
}

/// A cheaply cloned FIFO lock handle; all clones guard the same critical
/// section.
#[derive(Clone)]
pub struct Mutex(Arc<MutexInner>);

impl Mutex {
    pub fn new() -> Self {
        Mutex(Arc::new(MutexInner { state: StdMutex::new(State { locked: false, queue: VecDeque::new() }) }))
    }

    /// Acquire the lock, suspending the calling coroutine until it is this
    /// lock's turn to run.
    pub fn lock(&self) {
        let (scheduler_id, coroutine_id) = match current::running() {
            Some(ids) => ids,
            None => {
                debug_assert!(false, "Mutex::lock called from a thread that is not a coroutine");
                error!("Mutex::lock called outside a coroutine; granting an unlocked-but-contended lock");
                return;
            }
        };

        let mut state = self.0.state.lock().unwrap();
        if !state.locked {
            state.locked = true;
            return;
        }

        let record = Arc::new(WaitRecord::new(scheduler_id, coroutine_id));
        state.queue.push_back(record.clone());
        drop(state);

        let yielder = current::yielder().expect("coroutine running without a bound scheduler");
        yielder.set_wait_record(Some(record.clone()));
        yielder.yield_now();
        yielder.set_wait_record(None);
        debug_assert!(matches!(record.state(), super::wait::WaitState::Ready));
    }

    /// Try to acquire the lock without blocking.
    pub fn try_lock(&self) -> bool {
        let mut state = self.0.state.lock().unwrap();
        if state.locked {
            false
        } else {
            state.locked = true;
            true
        }
    }

    /// Release the lock, handing it directly to the next queued waiter if
    /// any, or marking it free otherwise.
    pub fn unlock(&self) {
        let mut state = self.0.state.lock().unwrap();
        loop {
            match state.queue.pop_front() {
                None => {
                    state.locked = false;
                    return;
                }
                Some(record) => {
                    if record.mark_ready() {
                        if let Some(yielder) = current::yielder() {
                            if yielder.scheduler_id() == record.scheduler_id {
                                yielder.add_ready(record.coroutine_id);
                                return;
                            }
                        }
                        crate::scheduler_manager::wake(record.scheduler_id, record.coroutine_id);
                        return;
                    }
                    // Lost a race to whoever else marked this record; try the next waiter.
                }
            }
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
