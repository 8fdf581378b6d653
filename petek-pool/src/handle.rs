use super::PoolError;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

struct Slot<T> {
    result: Mutex<Option<Result<T, PoolError>>>,
    done: Condvar,
}

/// Handle to the result of a submitted task.
pub struct TaskHandle<T> {
    slot: Arc<Slot<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task has run and take its result.
    pub fn join(self) -> Result<T, PoolError> {
        let mut result = self.slot.result.lock();
        loop {
            if let Some(outcome) = result.take() {
                return outcome;
            }
            self.slot.done.wait(&mut result);
        }
    }

    /// Returns true once the task has run (or can no longer run).
    pub fn is_finished(&self) -> bool {
        self.slot.result.lock().is_some()
    }
}

/// Write side of a [`TaskHandle`], owned by the queued job.
///
/// Dropping it unfulfilled resolves the handle with [`PoolError::Shutdown`].
pub(crate) struct Completer<T> {
    slot: Option<Arc<Slot<T>>>,
}

impl<T> Completer<T> {
    pub(crate) fn complete(mut self, outcome: Result<T, PoolError>) {
        if let Some(slot) = self.slot.take() {
            Self::fill(&slot, outcome);
        }
    }

    fn fill(slot: &Slot<T>, outcome: Result<T, PoolError>) {
        *slot.result.lock() = Some(outcome);
        slot.done.notify_all();
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            Self::fill(&slot, Err(PoolError::Shutdown));
        }
    }
}

pub(crate) fn pair<T>() -> (Completer<T>, TaskHandle<T>) {
    let slot = Arc::new(Slot {
        result: Mutex::new(None),
        done: Condvar::new(),
    });
    (
        Completer {
            slot: Some(Arc::clone(&slot)),
        },
        TaskHandle { slot },
    )
}
