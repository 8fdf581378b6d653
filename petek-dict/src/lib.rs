//! Insert-only concurrent string set on top of `petek-stm`.
//!
//! The set is a de la Briandais tree: every node holds one character, a link
//! to its first child (`suffix`) and a link to its next sibling (`next`), with
//! sibling chains kept sorted by character. Every mutable field of a node is a
//! [`TCell`], and an insertion is one transaction that walks the tree, splices
//! in the nodes it is missing and flips the terminal node's presence flag.
//! Inserts that race on overlapping paths conflict at commit and are re-run
//! from the root, so no tree-wide lock is ever taken.
//!
//! ## Example
//!
//! ```rust
//! use petek_dict::Dictionary;
//!
//! let dict = Dictionary::new();
//! assert!(dict.add("cat"));
//! assert!(!dict.add("cat"));
//! assert!(dict.add("car"));
//! assert!(dict.contains("car"));
//! assert!(!dict.contains("ca"));
//! ```

mod node;

use node::Node;
use petek_stm::{RetryPolicy, Stm, StmStats, TCell};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Concurrent set of strings supporting insertion and lookup.
pub struct Dictionary {
    stm: Stm,
    /// Sentinel for the smallest one-character string, `"\0"`.
    start: Arc<Node>,
    /// Presence of the empty string, which has no node of its own.
    empty_absent: TCell<bool>,
}

impl Dictionary {
    /// Create an empty dictionary that retries conflicting inserts forever.
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::Forever)
    }

    /// Create an empty dictionary whose transactions follow `policy`.
    ///
    /// A bounded policy makes [`add`](Self::add) and
    /// [`contains`](Self::contains) panic once it is exhausted.
    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            stm: Stm::with_policy(policy),
            start: Node::new('\0', None),
            empty_absent: TCell::new(true),
        }
    }

    /// Adds `s` to the set if it is not already present.
    ///
    /// Returns `true` if `s` was not in the set before this call. When several
    /// threads add the same string concurrently, exactly one of them gets
    /// `true`.
    pub fn add(&self, s: &str) -> bool {
        if s.is_empty() {
            return self.stm.atomically(|tx| {
                let absent = self.empty_absent.read(tx)?;
                self.empty_absent.write(tx, false);
                Ok(absent)
            });
        }

        let chars: Vec<char> = s.chars().collect();
        let inserted = self.stm.atomically(|tx| self.start.insert(&chars, tx));
        trace!(len = chars.len(), inserted, "dictionary add");
        inserted
    }

    /// Returns `true` if `s` has been added.
    pub fn contains(&self, s: &str) -> bool {
        if s.is_empty() {
            return self.stm.atomically(|tx| Ok(!self.empty_absent.read(tx)?));
        }

        let chars: Vec<char> = s.chars().collect();
        self.stm.atomically(|tx| self.start.contains(&chars, tx))
    }

    /// Commit and conflict counters of this dictionary's transactions.
    pub fn stats(&self) -> &StmStats {
        self.stm.stats()
    }
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dictionary")
            .field("policy", &self.stm.policy())
            .field("commits", &self.stats().commits())
            .field("conflicts", &self.stats().conflicts())
            .finish_non_exhaustive()
    }
}
