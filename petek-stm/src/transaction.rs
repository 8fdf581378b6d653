use super::cell::{CellId, ErasedCell};
use super::{StmError, TCell, VersionClock};
use alloc::boxed::Box;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Lifecycle of a [`Transaction`].
///
/// `Fresh → Active → {Committed | Aborted}`; `begin` moves `Fresh` or
/// `Aborted` back to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Created, `begin` not called yet.
    Fresh,
    /// Reading and writing cells.
    Active,
    /// Writes applied. Terminal.
    Committed,
    /// The attempt hit a conflict and must be restarted with `begin`.
    Aborted,
}

/// Transaction-local copy of a cell.
struct LocalCopy {
    /// Keeps the cell alive and reachable for locking and applying.
    cell: Arc<dyn ErasedCell>,
    /// Private value, seeded from the committed cell on first read.
    value: Box<dyn Any + Send>,
    /// Committed version observed when the copy was taken.
    version: u64,
}

impl LocalCopy {
    fn value<T: 'static>(&self, id: CellId) -> &T {
        match self.value.downcast_ref::<T>() {
            Some(value) => value,
            None => unreachable!("{id} is bound to a single payload type"),
        }
    }
}

/// Representation of a transaction in STM.
///
/// One instance can be reused for any number of attempts: every
/// [`begin`](Self::begin) drops the previous attempt's read-set, write-set and
/// local copies and samples a new birth timestamp from the global clock.
/// Reads are optimistic and never lock. Writes are buffered in local copies
/// and reach the shared cells only in the apply phase of
/// [`commit`](Self::commit).
pub struct Transaction {
    clock: &'static VersionClock,
    /// Global clock value sampled at `begin`.
    birth: u64,
    /// Cells read during the current attempt.
    read_set: BTreeSet<CellId>,
    /// Cells written during the current attempt. Ordered, so every committer
    /// locks in the same order.
    write_set: BTreeSet<CellId>,
    /// A cell has an entry here iff it was read or written in this attempt.
    local: FxHashMap<CellId, LocalCopy>,
    state: TxState,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    /// Create a transaction bound to the process-wide clock.
    pub fn new() -> Self {
        Self {
            clock: VersionClock::global(),
            birth: 0,
            read_set: BTreeSet::new(),
            write_set: BTreeSet::new(),
            local: FxHashMap::default(),
            state: TxState::Fresh,
        }
    }

    /// Start a new attempt.
    ///
    /// Clears everything the previous attempt recorded and re-stamps the
    /// birth timestamp. Calling `begin` on a committed transaction is a logic
    /// error.
    pub fn begin(&mut self) {
        debug_assert_ne!(
            self.state,
            TxState::Committed,
            "begin on a committed transaction"
        );
        self.read_set.clear();
        self.write_set.clear();
        self.local.clear();
        self.birth = self.clock.current();
        self.state = TxState::Active;
    }

    /// Birth timestamp of the current attempt.
    #[inline]
    pub fn birth(&self) -> u64 {
        self.birth
    }

    /// Where the current attempt is in its lifecycle.
    #[inline]
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Returns true once a commit has succeeded. Never goes back to false.
    #[inline]
    pub fn is_committed(&self) -> bool {
        self.state == TxState::Committed
    }

    /// Number of distinct cells read in the current attempt.
    pub fn read_set_len(&self) -> usize {
        self.read_set.len()
    }

    /// Number of distinct cells written in the current attempt.
    pub fn write_set_len(&self) -> usize {
        self.write_set.len()
    }

    /// Read a cell. Same as [`TCell::read`].
    pub fn load<T>(&mut self, cell: &TCell<T>) -> Result<T, StmError>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.read_cell(cell)
    }

    /// Write a cell. Same as [`TCell::write`].
    pub fn store<T>(&mut self, cell: &TCell<T>, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.write_cell(cell, value)
    }

    pub(crate) fn read_cell<T>(&mut self, cell: &TCell<T>) -> Result<T, StmError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let id = cell.id();

        // Repeat reads and read-your-own-writes come from the local copy.
        if let Some(copy) = self.local.get(&id) {
            return Ok(copy.value::<T>(id).clone());
        }

        let snapshot = match cell.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                trace!(cell = %id, birth = self.birth, "read hit a cell being committed");
                self.state = TxState::Aborted;
                return Err(e);
            }
        };

        self.read_set.insert(id);
        self.local.insert(
            id,
            LocalCopy {
                cell: cell.erased(),
                value: Box::new(snapshot.value.clone()),
                version: snapshot.version,
            },
        );

        if snapshot.version > self.birth {
            trace!(
                cell = %id,
                birth = self.birth,
                version = snapshot.version,
                "read newer than birth timestamp"
            );
            return Err(self.abort());
        }

        Ok(snapshot.value)
    }

    pub(crate) fn write_cell<T>(&mut self, cell: &TCell<T>, value: T)
    where
        T: Send + Sync + 'static,
    {
        let id = cell.id();
        match self.local.get_mut(&id) {
            Some(copy) => copy.value = Box::new(value),
            None => {
                self.local.insert(
                    id,
                    LocalCopy {
                        cell: cell.erased(),
                        value: Box::new(value),
                        version: cell.version(),
                    },
                );
            }
        }
        self.write_set.insert(id);
    }

    /// Try to commit the current attempt.
    ///
    /// 1. Lock every write-set cell with a non-blocking `try_lock`.
    /// 2. Validate that no read-set cell was committed after `birth`.
    /// 3. Take one commit stamp and install every local write with it.
    /// 4. Mark committed, then release the locks.
    ///
    /// On [`StmError::Conflict`] all locks taken so far are released, nothing
    /// was applied, and the caller must `begin` a new attempt. A transaction
    /// that wrote nothing validates its reads and leaves the clock alone.
    pub fn commit(&mut self) -> Result<(), StmError> {
        match self.state {
            TxState::Active => {}
            TxState::Committed => return Ok(()),
            TxState::Fresh | TxState::Aborted => return Err(StmError::Conflict),
        }

        // 1. Lock phase
        let contended = self
            .write_set
            .iter()
            .position(|id| !self.local[id].cell.try_lock());
        if let Some(held) = contended {
            trace!(birth = self.birth, held, "write-set cell already locked");
            self.release(held);
            return Err(self.abort());
        }

        // 2. Validate phase
        let stale = self.read_set.iter().any(|id| {
            let copy = &self.local[id];
            let (locked, version) = copy.cell.version_lock();
            let stale = version > self.birth || (locked && !self.write_set.contains(id));
            if stale {
                trace!(
                    cell = %id,
                    birth = self.birth,
                    read_version = copy.version,
                    committed_version = version,
                    locked,
                    "read-set validation failed"
                );
            }
            stale
        });
        if stale {
            self.release(self.write_set.len());
            return Err(self.abort());
        }

        if self.write_set.is_empty() {
            self.state = TxState::Committed;
            return Ok(());
        }

        // 3. Apply phase
        let stamp = self.clock.advance_and_get();
        let mut applied = Vec::with_capacity(self.write_set.len());
        for id in &self.write_set {
            if let Some(copy) = self.local.remove(id) {
                copy.cell.apply(copy.value, stamp);
                applied.push(copy.cell);
            }
        }

        // 4. Publish
        self.state = TxState::Committed;
        for cell in applied {
            cell.unlock();
        }

        trace!(
            birth = self.birth,
            stamp,
            reads = self.read_set.len(),
            writes = self.write_set.len(),
            "transaction committed"
        );
        Ok(())
    }

    /// Unlock the first `held` cells of the write-set.
    fn release(&self, held: usize) {
        for id in self.write_set.iter().take(held) {
            self.local[id].cell.unlock();
        }
    }

    fn abort(&mut self) -> StmError {
        self.state = TxState::Aborted;
        StmError::Conflict
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("birth", &self.birth)
            .field("state", &self.state)
            .field("read_set", &self.read_set)
            .field("write_set", &self.write_set)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::TxState;
    use crate::{StmError, TCell, Transaction};

    #[test]
    fn test_state_machine() {
        let cell = TCell::new(1);
        let mut tx = Transaction::new();
        assert_eq!(tx.state(), TxState::Fresh);
        assert_eq!(tx.commit(), Err(StmError::Conflict));

        tx.begin();
        assert_eq!(tx.state(), TxState::Active);
        let v = cell.read(&mut tx).unwrap();
        cell.write(&mut tx, v + 1);
        tx.commit().unwrap();

        assert!(tx.is_committed());
        assert_eq!(cell.load(), 2);
        // Idempotent once committed.
        assert_eq!(tx.commit(), Ok(()));
        assert!(tx.is_committed());
    }

    #[test]
    fn test_begin_clears_previous_attempt() {
        let a = TCell::new('a');
        let b = TCell::new('b');
        let mut tx = Transaction::new();

        tx.begin();
        a.read(&mut tx).unwrap();
        b.write(&mut tx, 'c');
        assert_eq!(tx.read_set_len(), 1);
        assert_eq!(tx.write_set_len(), 1);

        tx.begin();
        assert_eq!(tx.read_set_len(), 0);
        assert_eq!(tx.write_set_len(), 0);
        // The buffered write of the discarded attempt is gone.
        assert_eq!(b.read(&mut tx), Ok('b'));
    }

    #[test]
    fn test_read_after_foreign_commit_conflicts() {
        let cell = TCell::new(0u32);
        let mut slow = Transaction::new();
        slow.begin();

        let mut fast = Transaction::new();
        fast.begin();
        cell.write(&mut fast, 5);
        fast.commit().unwrap();

        assert!(cell.version() > slow.birth());
        assert_eq!(cell.read(&mut slow), Err(StmError::Conflict));
        assert_eq!(slow.state(), TxState::Aborted);

        slow.begin();
        assert_eq!(cell.read(&mut slow), Ok(5));
    }

    #[test]
    fn test_commit_validation_detects_stale_read() {
        let src = TCell::new(10i64);
        let dst = TCell::new(0i64);

        let mut tx = Transaction::new();
        tx.begin();
        let v = src.read(&mut tx).unwrap();
        dst.write(&mut tx, v);

        let mut other = Transaction::new();
        other.begin();
        src.write(&mut other, 99);
        other.commit().unwrap();

        assert_eq!(tx.commit(), Err(StmError::Conflict));
        assert_eq!(dst.load(), 0);
        assert!(!dst.is_locked());
    }

    #[test]
    fn test_lock_released_when_write_set_contended() {
        let a = TCell::new(1);
        let b = TCell::new(2);
        let c = TCell::new(3);

        let mut tx = Transaction::new();
        tx.begin();
        a.write(&mut tx, 10);
        b.write(&mut tx, 20);
        c.write(&mut tx, 30);

        assert!(b.try_lock());
        assert_eq!(tx.commit(), Err(StmError::Conflict));
        b.unlock();

        for cell in [&a, &b, &c] {
            assert!(cell.try_lock(), "{:?} left locked", cell.id());
            cell.unlock();
        }
        assert_eq!((a.load(), b.load(), c.load()), (1, 2, 3));
    }

    #[test]
    fn test_read_cell_locked_by_other_committer_fails_validation() {
        let a = TCell::new(1);
        let b = TCell::new(2);

        let mut tx = Transaction::new();
        tx.begin();
        let v = a.read(&mut tx).unwrap();
        b.write(&mut tx, v + 1);

        // Another committer owns `a` between our read and our commit.
        assert!(a.try_lock());
        assert_eq!(tx.commit(), Err(StmError::Conflict));
        assert_eq!(tx.state(), TxState::Aborted);
        a.unlock();

        assert!(!b.is_locked());
        assert_eq!(b.load(), 2);
        assert_eq!(b.version(), 0);
    }

    #[test]
    fn test_commit_stamps_every_written_cell_alike() {
        let x = TCell::new(12);
        let y = TCell::new(4);

        let mut tx = Transaction::new();
        tx.begin();
        let vx = x.read(&mut tx).unwrap();
        let vy = y.read(&mut tx).unwrap();
        x.write(&mut tx, vy);
        y.write(&mut tx, vx);
        tx.commit().unwrap();

        assert_eq!((x.load(), y.load()), (4, 12));
        assert_eq!(x.version(), y.version());
        assert!(x.version() > tx.birth());
    }

    #[test]
    fn test_read_only_commit_leaves_versions() {
        let cell = TCell::new("ro");
        let mut tx = Transaction::new();
        tx.begin();
        cell.read(&mut tx).unwrap();
        tx.commit().unwrap();
        assert_eq!(cell.version(), 0);
    }
}
