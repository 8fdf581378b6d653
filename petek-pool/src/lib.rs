//! Two-tier priority thread pool.
//!
//! ## Features
//!
//! - Two FIFO queues, `High` and `Normal`; workers always drain `High` first.
//! - Workers sleep on a single condition variable while both queues are
//!   empty; each submission wakes exactly one of them.
//! - Every submission returns a [`TaskHandle`] for its result. A panicking
//!   task is reported through its handle and does not take the worker down.
//!
//! ## Usage
//!
//! ```rust
//! use petek_pool::{PoolConfig, Priority, ThreadPool};
//!
//! let pool = ThreadPool::new(PoolConfig::new().threads(2)).unwrap();
//! let answer = pool.submit(Priority::High, || 6 * 7);
//! assert_eq!(answer.join().unwrap(), 42);
//! ```

mod config;
mod errors;
mod handle;
mod pool;

pub use config::PoolConfig;
pub use errors::PoolError;
pub use handle::TaskHandle;
pub use pool::{Priority, ThreadPool};
