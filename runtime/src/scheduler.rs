//! The per-thread cooperative scheduler loop.
//!
//! One `Scheduler` owns exactly one OS thread for its whole life. Its
//! `copool`, `timer_mgr`, and demultiplexer are touched only from that
//! thread (no lock needed, same invariant as the original's `SchedulerImpl`
//! running single-threaded per `_id`); the task manager is the one piece
//! other threads reach into, to hand over new work or wake a sleeping
//! coroutine, which is why it carries its own mutex.

use crate::config::STACK_SLOTS;
use crate::context::{self, RawContext};
use crate::copool::{Coroutine, Copool};
use crate::current::{self, Yielder};
use crate::demux::{self, Demultiplexer, PlatformDemux};
use crate::sync::Event;
use crate::task_manager::{Task, TaskManager};
use crate::timer::TimerHandle;
use log::{trace, warn};
use std::cell::Cell;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

thread_local! {
    /// Which scheduler owns this OS thread, set once in `Scheduler::run`.
    static CURRENT_SCHEDULER: Cell<*const Scheduler> = Cell::new(ptr::null());
}

/// Entry point for every fresh coroutine context. Takes no arguments: it
/// reads "which scheduler, which coroutine" out of thread-local and
/// per-scheduler state set up by `resume` just before the switch into it.
extern "C" fn coroutine_trampoline() -> ! {
    let sched = CURRENT_SCHEDULER.with(|c| c.get());
    assert!(!sched.is_null(), "coroutine context started on a thread with no bound scheduler");
    unsafe { (*sched).run_current_to_completion() };
    unreachable!("a finished coroutine's context must never be resumed again");
}

pub struct Scheduler {
    id: u32,
    sched_num: u32,
    stack_size: usize,
    stacks: Vec<Box<[u8]>>,
    /// The scheduler loop's own suspended context, written as a side
    /// effect of the `context::swap` call that jumps into a coroutine; read
    /// by that coroutine's `yield_now` to jump back.
    main_ctx: Cell<RawContext>,
    running: Cell<*mut Coroutine>,
    copool: std::cell::UnsafeCell<Copool>,
    task_mgr: TaskManager,
    timer_mgr: std::cell::UnsafeCell<crate::timer::TimerManager>,
    demux: std::cell::UnsafeCell<PlatformDemux>,
    stop: AtomicBool,
    /// Signalled once after `run`'s loop exits, so `SchedulerManager::stop`
    /// can block until every scheduler has actually torn down rather than
    /// just requested to.
    shutdown: Event,
    cputime_ns: AtomicU64,
    sched_log: bool,
}

// SAFETY: `main_ctx`, `running`, `copool`, `timer_mgr`, and `demux` are
// mutated only by the single OS thread running this scheduler's `run`
// loop. Other threads only ever touch `task_mgr` (its own mutex) and call
// `add_ready_task`/`stop`/`wait_for_shutdown`, which reach the
// demultiplexer only through its `&self` `signal()`, or `shutdown`'s own
// internal lock, neither of which alias the owning thread's `&mut`
// borrows above.
unsafe impl Sync for Scheduler {}

impl Scheduler {
    pub fn new(id: u32, sched_num: u32, stack_size: usize, sched_log: bool) -> io::Result<Self> {
        let stacks = (0..STACK_SLOTS).map(|_| vec![0u8; stack_size].into_boxed_slice()).collect();
        let demux = PlatformDemux::new(id)?;
        Ok(Scheduler {
            id,
            sched_num,
            stack_size,
            stacks,
            main_ctx: Cell::new(0),
            running: Cell::new(ptr::null_mut()),
            copool: std::cell::UnsafeCell::new(Copool::new()),
            task_mgr: TaskManager::new(),
            timer_mgr: std::cell::UnsafeCell::new(crate::timer::TimerManager::new()),
            demux: std::cell::UnsafeCell::new(demux),
            stop: AtomicBool::new(false),
            shutdown: Event::new(),
            cputime_ns: AtomicU64::new(0),
            sched_log,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn cputime_us(&self) -> u64 {
        self.cputime_ns.load(Ordering::Relaxed) / 1000
    }

    fn copool(&self) -> &mut Copool {
        unsafe { &mut *self.copool.get() }
    }

    fn timer_mgr(&self) -> &mut crate::timer::TimerManager {
        unsafe { &mut *self.timer_mgr.get() }
    }

    fn demux(&self) -> &mut PlatformDemux {
        unsafe { &mut *self.demux.get() }
    }

    /// Global id of the coroutine presently running on this scheduler, if
    /// any.
    pub fn running_coroutine_id(&self) -> Option<u32> {
        let ptr = self.running.get();
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { (*ptr).id })
        }
    }

    pub fn timed_out(&self) -> bool {
        let ptr = self.running.get();
        if ptr.is_null() {
            false
        } else {
            unsafe { (*ptr).timed_out }
        }
    }

    /// Queue a new task for this scheduler, thread-safe.
    pub fn add_new_task(&self, task: Task) {
        self.task_mgr.add_new_task(task);
        self.demux().signal();
    }

    /// Queue an already-allocated coroutine to resume, thread-safe.
    pub fn add_ready_task(&self, coroutine_id: u32) {
        self.task_mgr.add_ready_task(coroutine_id);
        self.demux().signal();
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.demux().signal();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Block until this scheduler's `run` loop has actually exited.
    pub fn wait_for_shutdown(&self) {
        self.shutdown.wait();
    }

    /// Add or remove interest in IO readiness on `fd` for the currently
    /// running coroutine.
    pub fn add_io_event(&self, fd: demux::RawFd, direction: demux::Direction) -> bool {
        let co_id = self.running_coroutine_id().expect("add_io_event called outside a coroutine");
        match direction {
            demux::Direction::Read => self.demux().add_ev_read(fd, co_id),
            demux::Direction::Write => self.demux().add_ev_write(fd, co_id),
        }
    }

    pub fn del_io_event(&self, fd: demux::RawFd, direction: demux::Direction) {
        match direction {
            demux::Direction::Read => self.demux().del_ev_read(fd),
            demux::Direction::Write => self.demux().del_ev_write(fd),
        }
    }

    pub fn del_io_events(&self, fd: demux::RawFd) {
        self.demux().del_event(fd);
    }

    /// `true` iff `ptr` lies within the stack slot currently occupied by
    /// the running coroutine; used by the hook layer to decide whether a
    /// buffer needs copying off the shared stack before an async call.
    pub fn on_stack(&self, ptr: *const u8) -> bool {
        let co = self.running.get();
        if co.is_null() {
            return false;
        }
        let slot = unsafe { (*co).stack_slot };
        let base = self.stacks[slot].as_ptr();
        let top = unsafe { base.add(self.stack_size) };
        (ptr as *const u8) >= base && (ptr as *const u8) < top
    }

    /// Run this scheduler's loop forever on the calling thread, until
    /// `stop` is called.
    pub fn run(&'static self) {
        current::bind_yielder(self);
        CURRENT_SCHEDULER.with(|c| c.set(self as *const Scheduler));

        while !self.is_stopped() {
            let tick_start = Instant::now();
            self.drain_new_and_ready_tasks();

            let mut expired = Vec::new();
            let next_ms = self.timer_mgr().check_timeout(&mut expired);
            for co_id in expired {
                if self.timer_wins_race(co_id) {
                    self.resume(co_id);
                }
            }

            let wait_ms = if self.is_stopped() {
                0
            } else {
                next_ms.map(|ms| ms as i32).unwrap_or(-1)
            };

            let mut ready = Vec::new();
            if let Err(e) = self.demux().wait(wait_ms, &mut ready) {
                if e.kind() != io::ErrorKind::Interrupted {
                    warn!("scheduler {} demultiplexer wait error: {}", self.id, e);
                }
            }
            for co_id in ready {
                self.clear_timed_out(co_id);
                self.resume(co_id);
            }

            self.cputime_ns.fetch_add(tick_start.elapsed().as_nanos() as u64, Ordering::Relaxed);
            if self.sched_log {
                trace!("scheduler {} tick, cputime_us={}", self.id, self.cputime_us());
            }
        }
        current::leave_coroutine();
        self.shutdown.signal();
    }

    /// `true` if this resume is due to `co_id`'s timer firing — either a
    /// plain timeout (no wait record) or the winning side of the race
    /// against whichever primitive `co_id` was also suspended on. Marks the
    /// coroutine's `timed_out` flag so `Scheduler::timed_out`/`Yielder::
    /// timed_out` can report it once it resumes.
    fn timer_wins_race(&self, co_id: u32) -> bool {
        match self.copool().get_mut(co_id) {
            Some(co) => {
                let won = match &co.wait_record {
                    Some(record) => record.mark_timed_out(),
                    None => true,
                };
                co.timed_out = won;
                won
            }
            None => false,
        }
    }

    /// Clear a coroutine's `timed_out` flag before an explicit (non-timer)
    /// wake, so a stale timeout from a previous suspension never leaks into
    /// this resume.
    fn clear_timed_out(&self, co_id: u32) {
        if let Some(co) = self.copool().get_mut(co_id) {
            co.timed_out = false;
        }
    }

    fn drain_new_and_ready_tasks(&self) {
        let (new_tasks, ready_ids) = self.task_mgr.drain_all();
        for task in new_tasks {
            let co_ptr = self.copool().pop(self.id, 0, task);
            let id = unsafe { (*co_ptr).id };
            let slot = (id as usize) & (STACK_SLOTS - 1);
            unsafe {
                (*co_ptr).stack_slot = slot;
            }
            self.resume_ptr(co_ptr);
        }
        for co_id in ready_ids {
            self.clear_timed_out(co_id);
            self.resume(co_id);
        }
    }

    fn resume(&self, co_id: u32) {
        match self.copool().get_mut(co_id) {
            Some(co) => {
                let ptr: *mut Coroutine = co;
                self.resume_ptr(ptr);
            }
            None => warn!("scheduler {} resume of unknown coroutine {}", self.id, co_id),
        }
    }

    /// Switch into `co`, restoring its shared-stack bytes first if it was
    /// previously suspended, and copying them back out if it suspends
    /// again rather than finishing.
    fn resume_ptr(&self, co: *mut Coroutine) {
        unsafe {
            self.running.set(co);
            current::enter_coroutine((*co).id);

            let slot = (*co).stack_slot;
            let base = self.stacks[slot].as_mut_ptr();
            let top = base.add(self.stack_size);

            if (*co).ctx == 0 {
                (*co).ctx = context::make(base, self.stack_size, coroutine_trampoline);
            } else if !(*co).saved_stack.is_empty() {
                let dest = top.sub((*co).saved_stack.len());
                ptr::copy_nonoverlapping((*co).saved_stack.as_ptr(), dest, (*co).saved_stack.len());
            }

            context::swap(&mut *self.main_ctx.as_ptr(), (*co).ctx);

            current::leave_coroutine();
            self.running.set(ptr::null_mut());

            if (*co).finished {
                let id = (*co).id;
                self.copool().push(id);
            } else {
                let live_len = top as usize - (*co).ctx;
                (*co).saved_stack.clear();
                (*co).saved_stack.extend_from_slice(std::slice::from_raw_parts((*co).ctx as *const u8, live_len));
            }
        }
    }

    /// Runs on the coroutine's own (shared) stack: execute its task
    /// closure to completion, then jump back into the scheduler loop for
    /// good.
    fn run_current_to_completion(&self) {
        let co = self.running.get();
        let entry = unsafe { (*co).entry.take() }.expect("coroutine resumed with no entry set");
        entry();
        unsafe {
            (*co).finished = true;
            context::swap(&mut (*co).ctx, self.main_ctx.get());
        }
        unreachable!("finished coroutine context resumed again");
    }
}

impl Yielder for Scheduler {
    fn scheduler_id(&self) -> u32 {
        self.id
    }

    fn yield_now(&self) {
        let co = self.running.get();
        assert!(!co.is_null(), "yield_now called outside a coroutine");
        unsafe {
            context::swap(&mut (*co).ctx, self.main_ctx.get());
        }
    }

    fn add_ready(&self, coroutine_id: u32) {
        self.add_ready_task(coroutine_id);
    }

    fn add_timer(&self, ms: u32, coroutine_id: u32) -> TimerHandle {
        self.timer_mgr().add(ms, coroutine_id)
    }

    fn erase_timer(&self, handle: TimerHandle) {
        self.timer_mgr().erase(handle);
    }

    fn set_wait_record(&self, record: Option<std::sync::Arc<crate::sync::wait::WaitRecord>>) {
        let co = self.running.get();
        assert!(!co.is_null(), "set_wait_record called outside a coroutine");
        unsafe {
            (*co).wait_record = record;
        }
    }

    fn add_io_event(&self, fd: demux::RawFd, direction: demux::Direction) -> bool {
        Scheduler::add_io_event(self, fd, direction)
    }

    fn del_io_event(&self, fd: demux::RawFd, direction: demux::Direction) {
        Scheduler::del_io_event(self, fd, direction)
    }

    fn timed_out(&self) -> bool {
        Scheduler::timed_out(self)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.id)
            .field("sched_num", &self.sched_num)
            .field("cputime_us", &self.cputime_us())
            .finish()
    }
}
