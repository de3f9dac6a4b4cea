//! Cross-thread inbox for a single scheduler: new tasks waiting to start and
//! coroutines waiting to be resumed. Tasks may be added from any thread, so
//! both vectors live behind one mutex; the owning scheduler drains both in
//! bulk once per loop iteration via `drain_all`.

use std::sync::Mutex;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    new_tasks: Vec<Task>,
    ready_tasks: Vec<u32>,
}

pub struct TaskManager {
    inner: Mutex<Inner>,
}

impl TaskManager {
    pub fn new() -> Self {
        TaskManager { inner: Mutex::new(Inner { new_tasks: Vec::new(), ready_tasks: Vec::new() }) }
    }

    pub fn add_new_task(&self, task: Task) {
        self.inner.lock().unwrap().new_tasks.push(task);
    }

    pub fn add_ready_task(&self, coroutine_id: u32) {
        self.inner.lock().unwrap().ready_tasks.push(coroutine_id);
    }

    /// Swap both queues out at once, leaving them empty. Returns `(new,
    /// ready)` in FIFO order.
    pub fn drain_all(&self) -> (Vec<Task>, Vec<u32>) {
        let mut inner = self.inner.lock().unwrap();
        let new_tasks = std::mem::take(&mut inner.new_tasks);
        let ready_tasks = std::mem::take(&mut inner.ready_tasks);
        (new_tasks, ready_tasks)
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn drain_returns_fifo_order() {
        let mgr = TaskManager::new();
        mgr.add_ready_task(1);
        mgr.add_ready_task(2);
        mgr.add_ready_task(3);
        let (_, ready) = mgr.drain_all();
        assert_eq!(ready, vec![1, 2, 3]);
    }

    #[test]
    fn drain_empties_queues() {
        let mgr = TaskManager::new();
        static RAN: AtomicU32 = AtomicU32::new(0);
        mgr.add_new_task(Box::new(|| {
            RAN.fetch_add(1, Ordering::SeqCst);
        }));
        let (new_tasks, _) = mgr.drain_all();
        assert_eq!(new_tasks.len(), 1);
        let (new_tasks2, ready2) = mgr.drain_all();
        assert!(new_tasks2.is_empty());
        assert!(ready2.is_empty());
        for t in new_tasks {
            t();
        }
        assert_eq!(RAN.load(Ordering::SeqCst), 1);
    }
}
