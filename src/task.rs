//! Cross-Thread Task Queue
//!
//! The rack is owned by the real-time thread. Every other thread changes
//! the graph by enqueueing a task; the rack drains the queue at the start
//! of each tick, before any smoothing or module processing runs.

use crate::rack::Rack;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// A deferred graph mutation executed on the real-time thread
pub type Task = Box<dyn FnOnce(&mut Rack) + Send>;

/// Mutex-protected FIFO of tasks, cheap to clone and share between threads
#[derive(Clone, Default)]
pub struct TaskQueue {
    inner: Arc<Mutex<VecDeque<Task>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task for the next tick
    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce(&mut Rack) + Send + 'static,
    {
        self.inner.lock().push_back(Box::new(task));
    }

    /// Number of tasks waiting
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Run every queued task against `rack`, in FIFO order
    ///
    /// The lock is released before tasks run, so a task may enqueue further
    /// tasks; those run on the following drain. Returns the number of tasks
    /// executed.
    pub fn drain_and_run(&self, rack: &mut Rack) -> usize {
        let pending = {
            let mut queue = self.inner.lock();
            if queue.is_empty() {
                return 0;
            }
            std::mem::take(&mut *queue)
        };
        let count = pending.len();
        for task in pending {
            task(rack);
        }
        count
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::Mixer;

    #[test]
    fn test_tasks_run_in_fifo_order() {
        let queue = TaskQueue::new();
        let mut rack = Rack::new(44100.0);
        queue.enqueue(|rack| {
            rack.add(Mixer::new());
        });
        queue.enqueue(|rack| {
            let first = rack.module_at(0).unwrap();
            rack.core_mut(first).unwrap().set_name("first");
        });

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain_and_run(&mut rack), 2);
        assert!(queue.is_empty());
        assert!(rack.find_module("first").is_some());
    }

    #[test]
    fn test_task_enqueued_during_drain_runs_next_time() {
        let queue = TaskQueue::new();
        let inner = queue.clone();
        let mut rack = Rack::new(44100.0);
        queue.enqueue(move |_| {
            inner.enqueue(|rack| {
                rack.add(Mixer::new());
            });
        });

        assert_eq!(queue.drain_and_run(&mut rack), 1);
        assert_eq!(rack.module_count(), 0);
        assert_eq!(queue.drain_and_run(&mut rack), 1);
        assert_eq!(rack.module_count(), 1);
    }

    #[test]
    fn test_enqueue_from_other_thread() {
        let queue = TaskQueue::new();
        let remote = queue.clone();
        std::thread::spawn(move || {
            remote.enqueue(|rack| {
                rack.add(Mixer::new());
            });
        })
        .join()
        .unwrap();

        let mut rack = Rack::new(44100.0);
        queue.drain_and_run(&mut rack);
        assert_eq!(rack.module_count(), 1);
    }
}
