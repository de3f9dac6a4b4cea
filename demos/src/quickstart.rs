//! The smallest possible program: one coroutine that logs a few times and
//! sleeps between each, and a main thread that waits for it to finish.

use log::info;

const N: u32 = 5;

fn main() {
    env_logger::init();

    green_rt::go(|| {
        for i in 0..N {
            info!("hello world ({i})");
            green_rt::sleep(200);
        }
    });

    std::thread::sleep(std::time::Duration::from_millis((N * 200 + 100) as u64));
}
