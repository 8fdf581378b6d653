use std::num::NonZeroUsize;
use std::thread;

/// Configuration of a [`ThreadPool`](crate::ThreadPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads, at least one.
    pub threads: usize,
    /// Prefix of worker thread names; workers are named `{name}-{index}`.
    pub name: String,
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Default for PoolConfig {
    /// One worker per available CPU.
    fn default() -> Self {
        Self {
            threads: thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            name: "petek-worker".to_owned(),
        }
    }
}
