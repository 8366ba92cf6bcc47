//! Fire-and-forget tasks on a `rayon` thread pool with awaitable completion.

use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::{num::NonZeroUsize, sync::Arc};

/// A pool of worker threads that executes independent one-off tasks.
///
/// Each spawned task gets a [`TaskHandle`] that can be used to block until the
/// task has finished.
#[derive(Debug)]
pub struct TaskPool {
    pool: ThreadPool,
}

/// Handle to a task spawned in a [`TaskPool`] (or executed inline), which can
/// be waited on from any thread.
///
/// Cloned handles refer to the same task.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    completion: Arc<TaskCompletion>,
}

#[derive(Debug)]
struct TaskCompletion {
    done: Mutex<bool>,
    done_condvar: Condvar,
}

/// Marks the associated task as completed when dropped. A panicking task
/// drops it while unwinding, and the pool's panic handler keeps the worker
/// alive.
struct CompletionSignal(Arc<TaskCompletion>);

impl TaskPool {
    /// Creates a new pool with the given number of worker threads.
    ///
    /// # Errors
    /// Returns an error if the worker threads could not be spawned.
    pub fn new(n_workers: NonZeroUsize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(n_workers.get())
            .thread_name(|idx| format!("instance-update-{idx}"))
            .panic_handler(|_| impact_log::error!("Task panicked on task pool worker"))
            .build()
            .context("Failed to build task pool")?;

        impact_log::debug!("Created task pool with {n_workers} workers");

        Ok(Self { pool })
    }

    /// Schedules the given task for execution on one of the worker threads and
    /// returns immediately.
    pub fn spawn(&self, task: impl FnOnce() + Send + 'static) -> TaskHandle {
        let handle = TaskHandle::pending();
        let signal = CompletionSignal(Arc::clone(&handle.completion));
        self.pool.spawn(move || {
            let _signal = signal;
            task();
        });
        handle
    }

    /// Executes the given task on the calling thread and returns a handle that
    /// is already completed.
    pub fn run_inline(task: impl FnOnce()) -> TaskHandle {
        task();
        TaskHandle::completed()
    }
}

impl TaskHandle {
    /// Creates a handle for a task that has already finished.
    pub fn completed() -> Self {
        Self {
            completion: Arc::new(TaskCompletion::new(true)),
        }
    }

    fn pending() -> Self {
        Self {
            completion: Arc::new(TaskCompletion::new(false)),
        }
    }

    /// Whether the task has finished.
    pub fn is_complete(&self) -> bool {
        *self.completion.done.lock()
    }

    /// Blocks the calling thread until the task has finished. Returns
    /// immediately if it already has.
    pub fn wait(&self) {
        let mut done = self.completion.done.lock();
        while !*done {
            self.completion.done_condvar.wait(&mut done);
        }
    }
}

impl TaskCompletion {
    fn new(done: bool) -> Self {
        Self {
            done: Mutex::new(done),
            done_condvar: Condvar::new(),
        }
    }

    fn signal(&self) {
        *self.done.lock() = true;
        self.done_condvar.notify_all();
    }
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        self.0.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool() -> TaskPool {
        TaskPool::new(NonZeroUsize::new(2).unwrap()).unwrap()
    }

    #[test]
    fn completed_handle_does_not_block() {
        let handle = TaskHandle::completed();
        assert!(handle.is_complete());
        handle.wait();
    }

    #[test]
    fn waiting_on_spawned_task_observes_its_effect() {
        let pool = pool();
        let count = Arc::new(AtomicUsize::new(0));

        let handle = {
            let count = Arc::clone(&count);
            pool.spawn(move || {
                count.fetch_add(3, Ordering::SeqCst);
            })
        };
        handle.wait();

        assert!(handle.is_complete());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn inline_task_runs_before_returning() {
        let mut value = 0;
        let handle = TaskPool::run_inline(|| value = 7);
        assert!(handle.is_complete());
        assert_eq!(value, 7);
    }

    #[test]
    fn panicking_task_completes_and_pool_keeps_working() {
        let pool = pool();
        let handle = pool.spawn(|| panic!("Task failure"));
        handle.wait();
        assert!(handle.is_complete());

        let count = Arc::new(AtomicUsize::new(0));
        let handle = {
            let count = Arc::clone(&count);
            pool.spawn(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        handle.wait();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cloned_handles_observe_same_task() {
        let pool = pool();
        let handle = pool.spawn(|| {});
        let clone = handle.clone();
        clone.wait();
        assert!(handle.is_complete());
    }
}
