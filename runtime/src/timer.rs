//! Ordered deadline -> coroutine map and timeout sweep.
//!
//! Timers are only ever added from the scheduler thread that owns this
//! manager (coroutines cannot migrate), so no lock is needed. The backing
//! store is a `BTreeMap` keyed by `(deadline_ms, sequence)` rather than the
//! original's `std::multimap` with a cached insertion-hint iterator: stable
//! Rust's `BTreeMap` has no cursor API to carry such a hint across calls, so
//! inserts and erases are both plain `O(log n)` instead of the original's
//! amortized `O(1)` insert for near-monotonic deadlines. See `DESIGN.md`.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A stable handle returned by `add`, usable with `erase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerHandle {
    deadline_ms: i64,
    seq: u64,
}

/// Milliseconds since a monotonic-ish epoch. Wall-clock based (like the
/// original's `now::ms()`), not a true monotonic clock, since this crate has
/// no dependency on a monotonic-clock crate; deadlines are always computed
/// as `now_ms() + relative_ms` so small wall-clock adjustments only shift
/// absolute deadlines, they don't invert ordering between timers added back
/// to back.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub struct TimerManager {
    timers: BTreeMap<TimerHandle, u32>,
    next_seq: u64,
}

impl TimerManager {
    pub fn new() -> Self {
        TimerManager { timers: BTreeMap::new(), next_seq: 0 }
    }

    /// Arm a timer `ms` milliseconds from now for `coroutine_id`.
    pub fn add(&mut self, ms: u32, coroutine_id: u32) -> TimerHandle {
        let handle = TimerHandle { deadline_ms: now_ms() + ms as i64, seq: self.next_seq };
        self.next_seq += 1;
        self.timers.insert(handle, coroutine_id);
        handle
    }

    /// Remove a still-pending timer. A no-op if it already fired.
    pub fn erase(&mut self, handle: TimerHandle) {
        self.timers.remove(&handle);
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Collect every coroutine whose deadline has passed, and report how many
    /// milliseconds remain until the next pending deadline (`None` if the map
    /// is now empty).
    pub fn check_timeout(&mut self, expired: &mut Vec<u32>) -> Option<u32> {
        let now = now_ms();
        loop {
            let next_key = match self.timers.keys().next() {
                Some(k) => *k,
                None => return None,
            };
            if next_key.deadline_ms > now {
                return Some((next_key.deadline_ms - now).min(u32::MAX as i64) as u32);
            }
            let co_id = self.timers.remove(&next_key).unwrap();
            expired.push(co_id);
        }
    }
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn zero_ms_timer_is_immediately_expired() {
        let mut mgr = TimerManager::new();
        mgr.add(0, 42);
        sleep(Duration::from_millis(1));
        let mut expired = Vec::new();
        let next = mgr.check_timeout(&mut expired);
        assert_eq!(expired, vec![42]);
        assert!(next.is_none());
    }

    #[test]
    fn erase_removes_pending_timer() {
        let mut mgr = TimerManager::new();
        let h = mgr.add(10_000, 1);
        mgr.erase(h);
        assert!(mgr.is_empty());
    }

    #[test]
    fn future_timer_reports_remaining_ms() {
        let mut mgr = TimerManager::new();
        mgr.add(50, 1);
        let mut expired = Vec::new();
        let next = mgr.check_timeout(&mut expired).unwrap();
        assert!(expired.is_empty());
        assert!(next <= 50);
    }
}
