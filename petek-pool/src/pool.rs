use super::handle::{self, TaskHandle};
use super::{PoolConfig, PoolError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Queue a task is submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Dequeued before any `Normal` task.
    High,
    Normal,
}

struct Queues {
    high: VecDeque<Job>,
    normal: VecDeque<Job>,
    shutdown: bool,
}

impl Queues {
    fn pop(&mut self) -> Option<Job> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }

    fn len(&self) -> usize {
        self.high.len() + self.normal.len()
    }
}

struct Shared {
    queues: Mutex<Queues>,
    /// Signalled once per submission, and for every worker at shutdown.
    available: Condvar,
}

/// Fixed-size pool of worker threads fed by two priority queues.
///
/// Dropping the pool lets the workers drain every queued task, then joins
/// them.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Start `config.threads` workers.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let shared = Arc::new(Shared {
            queues: Mutex::new(Queues {
                high: VecDeque::new(),
                normal: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        });

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(config.threads),
        };
        for index in 0..config.threads.max(1) {
            let shared = Arc::clone(&pool.shared);
            // On error, dropping `pool` shuts down the workers started so far.
            let worker = thread::Builder::new()
                .name(format!("{}-{index}", config.name))
                .spawn(move || work(shared, index))?;
            pool.workers.push(worker);
        }

        debug!(threads = pool.workers.len(), name = %config.name, "thread pool started");
        Ok(pool)
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Number of tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.queues.lock().len()
    }

    /// Queue `task` and wake one idle worker.
    pub fn submit<F, T>(&self, priority: Priority, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (completer, handle) = handle::pair();
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(task)).map_err(|_| {
                let current = thread::current();
                warn!(thread = current.name(), "task panicked");
                PoolError::Panicked
            });
            completer.complete(outcome);
        });

        {
            let mut queues = self.shared.queues.lock();
            match priority {
                Priority::High => queues.high.push_back(job),
                Priority::Normal => queues.normal.push_back(job),
            }
        }
        self.shared.available.notify_one();

        handle
    }

    pub fn submit_priority<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit(Priority::High, task)
    }

    pub fn submit_normal<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit(Priority::Normal, task)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.queues.lock().shutdown = true;
        self.shared.available.notify_all();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("worker thread exited by panic");
            }
        }
    }
}

fn work(shared: Arc<Shared>, index: usize) {
    loop {
        let job = {
            let mut queues = shared.queues.lock();
            loop {
                if let Some(job) = queues.pop() {
                    break job;
                }
                if queues.shutdown {
                    debug!(worker = index, "worker exiting");
                    return;
                }
                shared.available.wait(&mut queues);
            }
        };
        job();
    }
}

#[cfg(test)]
mod tests {
    use super::{Priority, ThreadPool};
    use crate::{PoolConfig, PoolError};
    use std::sync::mpsc;
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_high_priority_runs_first() {
        let pool = ThreadPool::new(PoolConfig::new().threads(1)).unwrap();

        // Park the only worker so the queues fill up behind it.
        let gate = Arc::new(Barrier::new(2));
        let blocker = {
            let gate = gate.clone();
            pool.submit_normal(move || {
                gate.wait();
                gate.wait();
            })
        };
        gate.wait();

        let (tx, rx) = mpsc::channel();
        let mut handles = Vec::new();
        for (priority, label) in [
            (Priority::Normal, "n1"),
            (Priority::High, "h1"),
            (Priority::Normal, "n2"),
            (Priority::High, "h2"),
        ] {
            let tx = tx.clone();
            handles.push(pool.submit(priority, move || tx.send(label).unwrap()));
        }
        assert_eq!(pool.queued(), 4);

        gate.wait();
        blocker.join().unwrap();
        for h in handles {
            h.join().unwrap();
        }
        drop(tx);

        let order: Vec<_> = rx.iter().collect();
        assert_eq!(order, vec!["h1", "h2", "n1", "n2"]);
    }

    #[test]
    fn test_panicking_task_keeps_worker() {
        let pool = ThreadPool::new(PoolConfig::new().threads(1)).unwrap();
        let bad = pool.submit_priority(|| -> u8 { panic!("boom") });
        assert!(matches!(bad.join(), Err(PoolError::Panicked)));

        let good = pool.submit_priority(|| 1u8);
        assert_eq!(good.join().unwrap(), 1);
    }

    #[test]
    fn test_drop_drains_queued_tasks() {
        let pool = ThreadPool::new(PoolConfig::new().threads(2).name("drain")).unwrap();
        assert_eq!(pool.threads(), 2);
        let handles: Vec<_> = (0..64).map(|i| pool.submit_normal(move || i * 2)).collect();
        drop(pool);

        for (i, h) in handles.into_iter().enumerate() {
            assert!(h.is_finished());
            assert_eq!(h.join().unwrap(), i * 2);
        }
    }
}
