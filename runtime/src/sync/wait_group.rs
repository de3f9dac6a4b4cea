//! `WaitGroup`: an atomic counter plus an embedded [`Event`] signalled on
//! the transition to zero, mirroring the original's composition of the two
//! rather than a bespoke implementation.

use super::event::Event;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

struct WaitGroupInner {
    counter: AtomicU32,
    event: Event,
}

/// A cheaply cloned handle; all clones share the same counter.
#[derive(Clone)]
pub struct WaitGroup(Arc<WaitGroupInner>);

impl WaitGroup {
    pub fn new() -> Self {
        WaitGroup(Arc::new(WaitGroupInner { counter: AtomicU32::new(0), event: Event::new() }))
    }

    /// Increase the outstanding count by `n`.
    pub fn add(&self, n: u32) {
        self.0.counter.fetch_add(n, Ordering::AcqRel);
    }

    /// Decrease the outstanding count by one; signals waiters when it
    /// reaches zero. Must only be called after a matching `add`.
    pub fn done(&self) {
        if self.0.counter.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.event.signal();
        }
    }

    /// Block until the outstanding count reaches zero.
    pub fn wait(&self) {
        if self.0.counter.load(Ordering::Acquire) == 0 {
            return;
        }
        self.0.event.wait();
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_returns_once_all_done_fire() {
        let wg = WaitGroup::new();
        wg.add(4);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let wg = wg.clone();
            handles.push(thread::spawn(move || wg.done()));
        }
        wg.wait();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn wait_on_zero_counter_returns_immediately() {
        let wg = WaitGroup::new();
        wg.wait();
    }
}
