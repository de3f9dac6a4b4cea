//! Fan out a batch of coroutines against a pooled resource and wait for all
//! of them with a `WaitGroup`, then drain the pool.

use green_rt::{Pool, WaitGroup};
use log::info;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Worker {
    id: usize,
}

impl Worker {
    fn run(&self) {
        info!("worker {} running", self.id);
    }
}

fn main() {
    env_logger::init();

    static NEXT_ID: AtomicUsize = AtomicUsize::new(0);
    let pool = Pool::with_callbacks(
        green_rt::all_schedulers().len(),
        1024,
        Some(Box::new(|| {
            Box::into_raw(Box::new(Worker { id: NEXT_ID.fetch_add(1, Ordering::Relaxed) })) as *mut std::ffi::c_void
        })),
        Some(Box::new(|p: *mut std::ffi::c_void| unsafe {
            drop(Box::from_raw(p as *mut Worker));
        })),
    );

    let wg = WaitGroup::new();
    wg.add(8);
    for i in 0..8 {
        let pool = pool.clone();
        let wg = wg.clone();
        green_rt::go(move || {
            info!("go: {i}");
            let p = pool.pop().expect("pool create callback always returns a worker");
            let worker = unsafe { &*(p as *const Worker) };
            worker.run();
            pool.push(p);
            info!("pool size: {}", pool.size());
            wg.done();
        });
    }
    wg.wait();

    pool.clear();
    info!("pool size after clear: {}", pool.size());

    std::thread::sleep(std::time::Duration::from_millis(200));
}
