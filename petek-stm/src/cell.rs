use super::{StmError, Transaction};
use alloc::boxed::Box;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bit 0 of the version-lock word: set while a committer owns the cell.
const LOCK_BIT: u64 = 1;

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a [`TCell`], independent of the value it holds.
///
/// Two cells holding equal values are still two distinct cells. Clones of a
/// `TCell` share the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(u64);

impl CellId {
    fn next() -> Self {
        CellId(NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric form of the identity.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

/// Heap-allocated state shared by every clone of a [`TCell`].
pub(crate) struct CellInner<T> {
    id: CellId,
    /// The version lock word.
    /// Bit 0: commit lock.
    /// Bits 1..63: version of the last commit that wrote the value.
    version_lock: AtomicU64,
    value: RwLock<T>,
}

impl<T> CellInner<T> {
    /// Decompose the lock word into `(is_locked, version)`.
    #[inline]
    fn load_version_lock(&self) -> (bool, u64) {
        let word = self.version_lock.load(Ordering::Acquire);
        (word & LOCK_BIT == LOCK_BIT, word >> 1)
    }

    fn try_lock(&self) -> bool {
        let mut current = self.version_lock.load(Ordering::Acquire);
        loop {
            if current & LOCK_BIT == LOCK_BIT {
                return false;
            }
            match self.version_lock.compare_exchange_weak(
                current,
                current | LOCK_BIT,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn unlock(&self) {
        self.version_lock.fetch_and(!LOCK_BIT, Ordering::Release);
    }
}

/// Type-erased view of a cell, so one transaction can track cells of many
/// payload types in the same read/write sets.
pub(crate) trait ErasedCell: Send + Sync {
    fn version_lock(&self) -> (bool, u64);
    fn try_lock(&self) -> bool;
    fn unlock(&self);
    /// Install `value` and stamp it with `version`. Caller must hold the lock;
    /// the lock stays held afterwards.
    fn apply(&self, value: Box<dyn Any + Send>, version: u64);
}

impl<T: Send + Sync + 'static> ErasedCell for CellInner<T> {
    fn version_lock(&self) -> (bool, u64) {
        self.load_version_lock()
    }

    fn try_lock(&self) -> bool {
        CellInner::try_lock(self)
    }

    fn unlock(&self) {
        CellInner::unlock(self)
    }

    fn apply(&self, value: Box<dyn Any + Send>, version: u64) {
        debug_assert!(self.load_version_lock().0, "apply without holding {}", self.id);
        match value.downcast::<T>() {
            Ok(value) => *self.value.write() = *value,
            Err(_) => unreachable!("{} is bound to a single payload type", self.id),
        }
        // Readers that sampled the old word will see it change and retry.
        self.version_lock
            .store((version << 1) | LOCK_BIT, Ordering::Release);
    }
}

/// Consistent copy of a cell: identity, value and the version it was
/// committed with, taken at the same instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<T> {
    pub id: CellId,
    pub value: T,
    pub version: u64,
}

/// A transactional cell.
///
/// Holds one value of a fixed type together with the version stamp of the
/// commit that last wrote it. Values only change in the apply phase of a
/// successful [`Transaction::commit`], which updates value and version
/// together while holding the cell's lock.
///
/// Cloning a `TCell` yields another handle to the same cell.
pub struct TCell<T> {
    pub(crate) inner: Arc<CellInner<T>>,
}

impl<T> Clone for TCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> TCell<T> {
    /// Create a cell at version `0`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(CellInner {
                id: CellId::next(),
                version_lock: AtomicU64::new(0),
                value: RwLock::new(value),
            }),
        }
    }

    /// Read the cell within `tx`.
    ///
    /// The first read in an attempt snapshots the committed cell into the
    /// transaction and fails with [`StmError::Conflict`] if the snapshot is
    /// newer than the transaction's birth timestamp. Later reads (and reads
    /// after a [`write`](Self::write)) return the transaction-local value.
    pub fn read(&self, tx: &mut Transaction) -> Result<T, StmError>
    where
        T: Clone,
    {
        tx.read_cell(self)
    }

    /// Write `value` into the transaction-local copy of the cell.
    ///
    /// Never fails. The committed value is untouched until `tx` commits.
    pub fn write(&self, tx: &mut Transaction, value: T) {
        tx.write_cell(self, value)
    }

    /// Take a consistent snapshot of the committed value and its version.
    ///
    /// Fails with [`StmError::Conflict`] if a commit is installing a new value
    /// at this moment; the caller never waits for it.
    pub fn snapshot(&self) -> Result<Snapshot<T>, StmError>
    where
        T: Clone,
    {
        let before = self.inner.version_lock.load(Ordering::Acquire);
        if before & LOCK_BIT == LOCK_BIT {
            return Err(StmError::Conflict);
        }

        let value = self.inner.value.read().clone();

        let after = self.inner.version_lock.load(Ordering::Acquire);
        if after != before {
            return Err(StmError::Conflict);
        }

        Ok(Snapshot {
            id: self.inner.id,
            value,
            version: before >> 1,
        })
    }

    /// Current committed value, outside of any transaction.
    pub fn load(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.read().clone()
    }

    pub(crate) fn erased(&self) -> Arc<dyn ErasedCell> {
        let inner: Arc<dyn ErasedCell> = self.inner.clone();
        inner
    }
}

impl<T> TCell<T> {
    /// Identity of this cell.
    #[inline]
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Version of the last commit that wrote this cell, `0` if never written.
    #[inline]
    pub fn version(&self) -> u64 {
        self.inner.load_version_lock().1
    }

    /// Try to take the commit lock without blocking.
    ///
    /// Used by the commit protocol. A caller that gets `true` must release
    /// the lock with [`unlock`](Self::unlock).
    pub fn try_lock(&self) -> bool {
        self.inner.try_lock()
    }

    /// Release the commit lock.
    pub fn unlock(&self) {
        self.inner.unlock()
    }

    /// Returns true while some committer holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.load_version_lock().0
    }

    /// Mutable access to the committed value if this is the only handle to
    /// the cell and no transaction is tracking it.
    ///
    /// Meant for teardown of structures built from cells; the version is left
    /// as it is.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        Arc::get_mut(&mut self.inner).map(|inner| inner.value.get_mut())
    }
}

impl<T: fmt::Debug> fmt::Debug for TCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (locked, version) = self.inner.load_version_lock();
        f.debug_struct("TCell")
            .field("id", &self.inner.id)
            .field("version", &version)
            .field("locked", &locked)
            .field("value", &*self.inner.value.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::TCell;
    use crate::{StmError, Transaction};

    #[test]
    fn test_identity_is_not_value() {
        let a = TCell::new(7);
        let b = TCell::new(7);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.clone().id());
    }

    #[test]
    fn test_snapshot_of_fresh_cell() {
        let cell = TCell::new("x");
        let snap = cell.snapshot().unwrap();
        assert_eq!(snap.id, cell.id());
        assert_eq!(snap.value, "x");
        assert_eq!(snap.version, 0);
    }

    #[test]
    fn test_get_mut_only_for_sole_handle() {
        let mut cell = TCell::new(3);
        let other = cell.clone();
        assert!(cell.get_mut().is_none());

        drop(other);
        *cell.get_mut().unwrap() += 1;
        assert_eq!(cell.load(), 4);
        assert_eq!(cell.version(), 0);
    }

    #[test]
    fn test_snapshot_conflicts_while_locked() {
        let cell = TCell::new(1u8);
        assert!(cell.try_lock());
        assert!(cell.is_locked());
        assert_eq!(cell.snapshot(), Err(StmError::Conflict));
        cell.unlock();
        assert!(cell.snapshot().is_ok());
    }

    #[test]
    fn test_try_lock_is_exclusive() {
        let cell = TCell::new(());
        assert!(cell.try_lock());
        assert!(!cell.try_lock());
        assert!(!cell.clone().try_lock());
        cell.unlock();
        assert!(cell.try_lock());
        cell.unlock();
        assert_eq!(cell.version(), 0);
    }

    #[test]
    fn test_write_does_not_touch_committed_value() {
        let cell = TCell::new(10);
        let mut tx = Transaction::new();
        tx.begin();
        cell.write(&mut tx, 20);
        assert_eq!(cell.read(&mut tx), Ok(20));
        assert_eq!(cell.load(), 10);
        assert_eq!(cell.version(), 0);
    }
}
