//! petek: TL2 software transactional memory and the structures built on it.
//!
//! - [`stm`]: version clock, transactional cells and transactions.
//! - [`dict`]: insert-only concurrent string set whose inserts are
//!   transactions over the tree's cells.
//! - [`pool`]: two-tier priority thread pool.
//! - [`crawl`]: crawl driver that deduplicates addresses through a
//!   [`Dictionary`](dict::Dictionary) while fetching pages on a pool.
//!
//! # Example
//!
//! ```rust
//! use petek::stm::Stm;
//! use petek::dict::Dictionary;
//!
//! let stm = Stm::new();
//! let x = stm.tcell(12);
//! let y = stm.tcell(4);
//! stm.atomically(|tx| {
//!     let vx = x.read(tx)?;
//!     let vy = y.read(tx)?;
//!     x.write(tx, vy);
//!     y.write(tx, vx);
//!     Ok(())
//! });
//! assert_eq!((x.load(), y.load()), (4, 12));
//!
//! let seen = Dictionary::new();
//! assert!(seen.add("https://example.org/"));
//! assert!(!seen.add("https://example.org/"));
//! ```

pub mod crawl;

pub use petek_dict as dict;
pub use petek_pool as pool;
pub use petek_stm as stm;
