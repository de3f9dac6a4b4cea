//! The wait-record CAS state machine shared by every suspension point that
//! races a timeout against a signal.
//!
//! Exactly one of "timed out" and "was signalled" may win: both the timer
//! sweep and `Event::signal`/`Mutex::unlock` try to flip the same record
//! from `Wait` to their own terminal state, and only the call whose
//! compare-and-swap succeeds gets to enqueue the coroutine back onto its
//! scheduler's ready queue. The loser's attempt is simply a no-op.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WaitState {
    Wait = 0,
    Ready = 1,
    TimedOut = 2,
}

impl WaitState {
    fn from_u8(v: u8) -> WaitState {
        match v {
            0 => WaitState::Wait,
            1 => WaitState::Ready,
            _ => WaitState::TimedOut,
        }
    }
}

pub struct WaitRecord {
    state: AtomicU8,
    pub scheduler_id: u32,
    pub coroutine_id: u32,
}

impl WaitRecord {
    pub fn new(scheduler_id: u32, coroutine_id: u32) -> Self {
        WaitRecord { state: AtomicU8::new(WaitState::Wait as u8), scheduler_id, coroutine_id }
    }

    pub fn state(&self) -> WaitState {
        WaitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Attempt `Wait -> Ready`. Returns whether this call won the race.
    pub fn mark_ready(&self) -> bool {
        self.state
            .compare_exchange(WaitState::Wait as u8, WaitState::Ready as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Attempt `Wait -> TimedOut`. Returns whether this call won the race.
    pub fn mark_timed_out(&self) -> bool {
        self.state
            .compare_exchange(WaitState::Wait as u8, WaitState::TimedOut as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn only_one_side_wins_the_race() {
        let record = Arc::new(WaitRecord::new(0, 1));
        let a = record.clone();
        let b = record.clone();
        let t1 = thread::spawn(move || a.mark_ready());
        let t2 = thread::spawn(move || b.mark_timed_out());
        let ready_won = t1.join().unwrap();
        let timeout_won = t2.join().unwrap();
        assert_ne!(ready_won, timeout_won);
    }

    #[test]
    fn state_reflects_the_winner() {
        let record = WaitRecord::new(0, 1);
        assert!(record.mark_ready());
        assert!(!record.mark_timed_out());
        assert_eq!(record.state(), WaitState::Ready);
    }
}
