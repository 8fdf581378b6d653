use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide logical clock ordering every commit.
static GLOBAL_CLOCK: VersionClock = VersionClock::new();

/// Monotonic counter handing out commit stamps.
///
/// The clock starts at `0`. Every successful write-commit takes exactly one
/// stamp through [`advance_and_get`](Self::advance_and_get), and every
/// transaction samples [`current`](Self::current) as its birth timestamp.
/// Comparing the two is the only conflict test the STM performs.
#[derive(Debug)]
pub struct VersionClock {
    now: AtomicU64,
}

impl VersionClock {
    /// Create a clock at zero.
    pub const fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
        }
    }

    /// The clock shared by every transaction and cell in this process.
    #[inline]
    pub fn global() -> &'static VersionClock {
        &GLOBAL_CLOCK
    }

    /// Latest commit stamp handed out.
    #[inline]
    pub fn current(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }

    /// Increment the clock and return the new stamp.
    #[inline]
    pub fn advance_and_get(&self) -> u64 {
        self.now.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for VersionClock {
    fn default() -> Self {
        Self::new()
    }
}
