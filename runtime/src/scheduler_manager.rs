//! The process-wide fleet of schedulers and the round-robin dispatch that
//! spreads new tasks across them.
//!
//! `next_scheduler` avoids modulo bias from a plain `counter % N` by
//! falling back to a wall-clock sample for the handful of counter values
//! where an unbiased wrap isn't possible, exactly as the original does;
//! the common power-of-two scheduler count takes the cheaper masked path
//! instead.

use crate::config::Config;
use crate::scheduler::Scheduler;
use crate::task_manager::Task;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

pub struct SchedulerManager {
    scheds: Vec<&'static Scheduler>,
    counter: AtomicU32,
    /// `2^32 mod N`.
    r: u32,
    /// `Some(N - 1)` when `N` is a power of two (`r == 0`), letting dispatch
    /// use a cheap mask instead of a division.
    pow2_mask: Option<u32>,
}

impl SchedulerManager {
    fn new(cfg: &Config) -> io::Result<Self> {
        let n = cfg.sched_num.max(1);
        let mut scheds = Vec::with_capacity(n);
        for id in 0..n {
            let sched: &'static Scheduler =
                Box::leak(Box::new(Scheduler::new(id as u32, n as u32, cfg.stack_size, cfg.sched_log)?));
            std::thread::Builder::new()
                .name(format!("green-rt-sched-{id}"))
                .spawn(move || sched.run())
                .expect("failed to spawn scheduler thread");
            scheds.push(sched);
        }

        let r = ((1u64 << 32) % n as u64) as u32;
        let pow2_mask = if r == 0 { Some(n as u32 - 1) } else { None };

        Ok(SchedulerManager { scheds, counter: AtomicU32::new(u32::MAX), r, pow2_mask })
    }

    /// Build an isolated fleet for tests, bypassing the process-wide
    /// singleton entirely.
    pub fn init_for_test(sched_num: usize) -> Self {
        Self::new(&Config::for_tests(sched_num)).expect("failed to start test scheduler fleet")
    }

    pub fn count(&self) -> usize {
        self.scheds.len()
    }

    pub fn scheduler(&self, id: u32) -> &'static Scheduler {
        self.scheds[id as usize]
    }

    pub fn all(&self) -> &[&'static Scheduler] {
        &self.scheds
    }

    pub fn next_scheduler(&self) -> &'static Scheduler {
        let n = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if let Some(mask) = self.pow2_mask {
            return self.scheds[(n & mask) as usize];
        }
        if n <= u32::MAX - self.r {
            self.scheds[(n % self.scheds.len() as u32) as usize]
        } else {
            self.scheds[(monotonic_us() as usize) % self.scheds.len()]
        }
    }

    pub fn go(&self, task: Task) {
        self.next_scheduler().add_new_task(task);
    }

    /// Signal every scheduler to stop, then block until each has
    /// acknowledged via its own shutdown completion event.
    pub fn stop(&self) {
        for s in &self.scheds {
            s.stop();
        }
        for s in &self.scheds {
            s.wait_for_shutdown();
        }
    }
}

fn monotonic_us() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_micros() as u64
}

static GLOBAL: OnceLock<SchedulerManager> = OnceLock::new();

/// The process-wide fleet, lazily built from `Config::from_env()` on first
/// use.
pub fn global() -> &'static SchedulerManager {
    GLOBAL.get_or_init(|| SchedulerManager::new(&Config::from_env()).expect("failed to start scheduler fleet"))
}

/// Move `coroutine_id` back onto its scheduler's ready queue from any
/// thread. Primitives (`Event`, `Mutex`) use this when the record they won
/// a CAS on belongs to a scheduler other than the one signalling it.
///
/// Only routes through the process-wide fleet; primitives shared between
/// coroutines on a test-only fleet built via `init_for_test` must keep all
/// interacting coroutines on that same fleet for this path to apply.
pub fn wake(scheduler_id: u32, coroutine_id: u32) {
    global().scheduler(scheduler_id).add_ready_task(coroutine_id);
}

/// Queue `task` directly on a specific scheduler, bypassing round-robin
/// dispatch. Used by `Pool::clear` to run one cleanup per scheduler on the
/// thread that owns its free list.
pub fn spawn_on(scheduler_id: u32, task: Task) {
    global().scheduler(scheduler_id).add_new_task(task);
}
