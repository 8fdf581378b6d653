//! TL2 software transactional memory.
//!
//! # Architecture
//!
//! This STM uses a TL2-style (Transactional Locking II) algorithm with a
//! process-wide [`VersionClock`].
//!
//! - **Cells**: every [`TCell`] carries a version word, the clock value of the
//!   last commit that wrote it, with its low bit doubling as a commit lock.
//! - **Reads**: Optimistic. No locks are acquired. The first read of a cell
//!   snapshots it into the transaction and checks that it is not newer than the
//!   transaction's birth timestamp.
//! - **Writes**: Buffered in transaction-local copies. Locks are acquired only
//!   during the commit phase, never waited on.
//! - **Commit**: lock the write-set, re-validate the read-set, take one stamp
//!   from the clock and install every write with it.
//!
//! A conflicting attempt is discarded whole and re-run by [`Stm::atomically`].

extern crate alloc;

mod cell;
mod clock;
mod errors;
mod retry;
mod transaction;

pub use cell::{CellId, Snapshot, TCell};
pub use clock::VersionClock;
pub use errors::StmError;
pub use retry::RetryPolicy;
pub use transaction::{Transaction, TxState};

use crossbeam_utils::Backoff;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Commit and conflict counters of an [`Stm`] engine.
#[derive(Debug)]
pub struct StmStats {
    commits: AtomicU64,
    conflicts: AtomicU64,
}

impl StmStats {
    const fn new() -> Self {
        Self {
            commits: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }

    /// Successful `atomically` runs.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Attempts discarded because of a conflict.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }
}

/// The STM engine: runs transactional closures under a [`RetryPolicy`].
///
/// The version clock itself is process-wide, so cells created by one engine
/// can be used from transactions run by another.
#[derive(Debug)]
pub struct Stm {
    policy: RetryPolicy,
    stats: StmStats,
}

impl Stm {
    /// Create an engine that retries forever without backoff.
    pub const fn new() -> Self {
        Self::with_policy(RetryPolicy::Forever)
    }

    /// Create an engine with the given retry policy.
    pub const fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            policy,
            stats: StmStats::new(),
        }
    }

    /// Retry policy used by [`atomically`](Self::atomically).
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Commit and conflict counters of this engine.
    pub fn stats(&self) -> &StmStats {
        &self.stats
    }

    /// Create a new transactional cell.
    pub fn tcell<T: Send + Sync + 'static>(&self, value: T) -> TCell<T> {
        TCell::new(value)
    }
}

impl Default for Stm {
    fn default() -> Self {
        Self::new()
    }
}

impl Stm {
    /// Execute a closure atomically.
    ///
    /// This function handles transaction retries automatically: the closure is
    /// re-run from scratch, against a freshly begun transaction, until its
    /// attempt commits. It must therefore be free of side effects outside the
    /// cells it touches.
    ///
    /// # Panics
    ///
    /// Panics if the closure returns [`StmError::Exhausted`] or the engine's
    /// bounded policy runs out of attempts. Use
    /// [`try_atomically`](Self::try_atomically) to handle that case.
    ///
    /// # Example
    ///
    /// ```
    /// use petek_stm::Stm;
    /// let stm = Stm::new();
    /// let var = stm.tcell(10);
    ///
    /// stm.atomically(|tx| {
    ///     let val = var.read(tx)?;
    ///     var.write(tx, val + 1);
    ///     Ok(())
    /// });
    /// assert_eq!(var.load(), 11);
    /// ```
    pub fn atomically<F, T>(&self, f: F) -> T
    where
        F: FnMut(&mut Transaction) -> Result<T, StmError>,
    {
        match self.try_atomically(f) {
            Ok(result) => result,
            Err(e) => panic!("Transaction failed with error: {e}"),
        }
    }

    /// Execute a closure atomically, reporting retry exhaustion.
    ///
    /// [`StmError::Conflict`] is never returned: conflicting attempts are
    /// retried according to the engine's [`RetryPolicy`].
    pub fn try_atomically<F, T>(&self, mut f: F) -> Result<T, StmError>
    where
        F: FnMut(&mut Transaction) -> Result<T, StmError>,
    {
        let mut tx = Transaction::new();
        let backoff = Backoff::new();
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);
            tx.begin();

            match f(&mut tx).and_then(|result| tx.commit().map(|()| result)) {
                Ok(result) => {
                    self.stats.commits.fetch_add(1, Ordering::Relaxed);
                    if attempts > 1 {
                        trace!(attempts, "transaction committed after retries");
                    }
                    return Ok(result);
                }
                Err(StmError::Conflict) => {
                    self.stats.conflicts.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => return Err(e),
            }

            if let RetryPolicy::Backoff { max_attempts } = self.policy {
                if max_attempts.is_some_and(|max| attempts >= max) {
                    debug!(attempts, "transaction retries exhausted");
                    return Err(StmError::Exhausted { attempts });
                }
                backoff.snooze();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{RetryPolicy, Stm, StmError};

    #[test]
    fn test_tcell_defined_outside_closure() {
        let stm = Stm::new();
        let var = stm.tcell(10i32);

        let result = stm.atomically(|tx| {
            let val = var.read(tx)?;
            var.write(tx, val + 1);
            Ok(val)
        });

        assert_eq!(result, 10);
        assert_eq!(stm.atomically(|tx| var.read(tx)), 11);
        assert_eq!(stm.stats().commits(), 2);
    }

    #[test]
    fn test_bounded_policy_gives_up() {
        let stm = Stm::with_policy(RetryPolicy::bounded(3));
        let var = stm.tcell(0u8);
        let mut runs = 0;

        let result = stm.try_atomically(|tx| {
            runs += 1;
            var.read(tx)?;
            Err::<(), _>(StmError::Conflict)
        });

        assert_eq!(result, Err(StmError::Exhausted { attempts: 3 }));
        assert_eq!(runs, 3);
        assert_eq!(stm.stats().conflicts(), 3);
        assert_eq!(stm.stats().commits(), 0);
    }

    #[test]
    #[should_panic(expected = "Transaction failed")]
    fn test_atomically_panics_when_exhausted() {
        let stm = Stm::with_policy(RetryPolicy::bounded(1));
        stm.atomically(|_| Err::<(), _>(StmError::Conflict));
    }
}
