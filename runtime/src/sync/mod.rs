//! Coroutine-aware synchronization primitives: `Event`, `Mutex`,
//! `WaitGroup`, `Pool`, and the wait-record state machine they share.

pub mod event;
pub mod mutex;
pub mod pool;
pub mod wait;
pub mod wait_group;

pub use event::Event;
pub use mutex::Mutex;
pub use pool::Pool;
pub use wait_group::WaitGroup;
