//! `Event`: one-shot wakeup shared between coroutines, and usable from
//! plain threads too.
//!
//! A coroutine caller is suspended by pushing a [`WaitRecord`] into the
//! wait set and yielding back to its scheduler; `signal` drains the set and
//! CASes each record `Wait -> Ready`, re-enqueuing the winners. A thread
//! caller instead blocks on a `Condvar`, which `signal` always notifies
//! regardless of whether any coroutine was also waiting. The `signaled`
//! flag itself is a single level: it persists until the next `wait` call
//! observes and consumes it, so a `signal` that races ahead of a `wait`
//! still counts, but only once.

use super::wait::WaitRecord;
use crate::current;
use std::sync::{Arc, Condvar, Mutex};

struct State {
    signaled: bool,
    wait_set: Vec<Arc<WaitRecord>>,
}

struct EventInner {
    state: Mutex<State>,
    condvar: Condvar,
}

/// A cheaply cloned handle to a shared event; all clones refer to the same
/// underlying wakeup.
#[derive(Clone)]
pub struct Event(Arc<EventInner>);

impl Event {
    pub fn new() -> Self {
        Event(Arc::new(EventInner {
            state: Mutex::new(State { signaled: false, wait_set: Vec::new() }),
            condvar: Condvar::new(),
        }))
    }

    /// Block until a signal is observed.
    pub fn wait(&self) {
        self.wait_timeout(None);
    }

    /// Block until a signal is observed or `ms` milliseconds pass.
    /// Returns `true` if a signal won the race.
    pub fn wait_ms(&self, ms: u32) -> bool {
        self.wait_timeout(Some(ms))
    }

    fn wait_timeout(&self, ms: Option<u32>) -> bool {
        {
            let mut state = self.0.state.lock().unwrap();
            if state.signaled {
                state.signaled = false;
                return true;
            }
        }

        match current::running() {
            Some((scheduler_id, coroutine_id)) => self.wait_as_coroutine(scheduler_id, coroutine_id, ms),
            None => self.wait_as_thread(ms),
        }
    }

    fn wait_as_coroutine(&self, scheduler_id: u32, coroutine_id: u32, ms: Option<u32>) -> bool {
        let record = Arc::new(WaitRecord::new(scheduler_id, coroutine_id));
        {
            let mut state = self.0.state.lock().unwrap();
            state.wait_set.push(record.clone());
        }

        let yielder = current::yielder().expect("coroutine running without a bound scheduler");
        yielder.set_wait_record(Some(record.clone()));
        let timer = ms.map(|m| yielder.add_timer(m, coroutine_id));
        yielder.yield_now();
        yielder.set_wait_record(None);

        if let Some(handle) = timer {
            yielder.erase_timer(handle);
        }
        matches!(record.state(), super::wait::WaitState::Ready)
    }

    fn wait_as_thread(&self, ms: Option<u32>) -> bool {
        let mut state = self.0.state.lock().unwrap();
        match ms {
            None => {
                while !state.signaled {
                    state = self.0.condvar.wait(state).unwrap();
                }
                state.signaled = false;
                true
            }
            Some(ms) => {
                let deadline = std::time::Duration::from_millis(ms as u64);
                let (mut guard, timed_out) =
                    self.0.condvar.wait_timeout_while(state, deadline, |s| !s.signaled).unwrap();
                if timed_out.timed_out() {
                    false
                } else {
                    guard.signaled = false;
                    true
                }
            }
        }
    }

    /// Wake every coroutine and thread currently waiting, and leave a
    /// pulse for the next caller of `wait` if nobody was.
    pub fn signal(&self) {
        let mut state = self.0.state.lock().unwrap();
        state.signaled = true;
        let waiters = std::mem::take(&mut state.wait_set);
        for record in waiters {
            if record.mark_ready() {
                if let Some(yielder) = current::yielder() {
                    if yielder.scheduler_id() == record.scheduler_id {
                        yielder.add_ready(record.coroutine_id);
                        continue;
                    }
                }
                // Cross-thread signal: defer to the scheduler manager lookup
                // the caller is expected to route through in practice;
                // resolved by `crate::scheduler_manager` at call sites that
                // signal across scheduler threads.
                crate::scheduler_manager::wake(record.scheduler_id, record.coroutine_id);
            }
        }
        drop(state);
        self.0.condvar.notify_all();
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}
