use petek_stm::{StmError, TCell, Transaction};
use std::sync::Arc;

pub(crate) type Link = Option<Arc<Node>>;

/// One character of the dictionary tree.
///
/// The node reached by following `suffix` links `k` times, interleaved with
/// any number of `next` links, spells a string of length `k + 1`:
///
/// - `suffix` continues the string with its head node's character,
/// - `next` replaces this node's character with a strictly greater one at the
///   same depth.
///
/// A string is in the set iff the node spelling it has `absent == false`.
pub(crate) struct Node {
    pub(crate) character: TCell<char>,
    /// True while the string spelled by this node has not been inserted.
    pub(crate) absent: TCell<bool>,
    /// Head of the child chain, sorted by character.
    pub(crate) suffix: TCell<Link>,
    /// Next sibling, with a strictly greater character.
    pub(crate) next: TCell<Link>,
}

impl Node {
    pub(crate) fn new(character: char, next: Link) -> Arc<Self> {
        Arc::new(Self {
            character: TCell::new(character),
            absent: TCell::new(true),
            suffix: TCell::new(None),
            next: TCell::new(next),
        })
    }

    /// Insert `s[depth..]`, starting at this node, within `tx`.
    ///
    /// Returns the previous value of the terminal node's `absent` flag, so
    /// `true` means the string was newly inserted.
    pub(crate) fn insert(
        self: &Arc<Self>,
        s: &[char],
        tx: &mut Transaction,
    ) -> Result<bool, StmError> {
        let mut node = Arc::clone(self);
        let mut depth = 0;

        loop {
            let character = node.character.read(tx)?;

            // End of the string and this node spells it.
            if depth >= s.len() || (s[depth] == character && depth == s.len() - 1) {
                let absent = node.absent.read(tx)?;
                node.absent.write(tx, false);
                return Ok(absent);
            }

            node = if s[depth] == character {
                // Continue with the next character in the child chain.
                depth += 1;
                link_to(&node.suffix, s[depth], tx)?
            } else {
                // Look for this character further along the sibling chain.
                link_to(&node.next, s[depth], tx)?
            };
        }
    }

    /// Look up `s[depth..]` starting at this node without writing anything.
    pub(crate) fn contains(
        self: &Arc<Self>,
        s: &[char],
        tx: &mut Transaction,
    ) -> Result<bool, StmError> {
        let mut node = Arc::clone(self);
        let mut depth = 0;

        loop {
            let character = node.character.read(tx)?;

            if depth >= s.len() || (s[depth] == character && depth == s.len() - 1) {
                return Ok(!node.absent.read(tx)?);
            }

            let (link, wanted) = if s[depth] == character {
                depth += 1;
                (&node.suffix, s[depth])
            } else {
                (&node.next, s[depth])
            };

            node = match link.read(tx)? {
                Some(head) if head.character.read(tx)? <= wanted => head,
                _ => return Ok(false),
            };
        }
    }
}

// Chains can be as deep as the longest string, so unlink them with a
// work-list instead of letting each `Arc<Node>` drop the next one.
impl Drop for Node {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.detach_links(&mut pending);
        while let Some(node) = pending.pop() {
            // Nodes still shared elsewhere are left to their other owners.
            if let Ok(mut node) = Arc::try_unwrap(node) {
                node.detach_links(&mut pending);
            }
        }
    }
}

impl Node {
    fn detach_links(&mut self, pending: &mut Vec<Arc<Node>>) {
        for link in [&mut self.suffix, &mut self.next] {
            if let Some(slot) = link.get_mut() {
                pending.extend(slot.take());
            }
        }
    }
}

/// Follow `link` towards a node for `wanted`.
///
/// Chains are sorted, so the head is used as-is unless it is missing or
/// already past `wanted`; in that case a new node for `wanted` is spliced in
/// front of it.
fn link_to(
    link: &TCell<Link>,
    wanted: char,
    tx: &mut Transaction,
) -> Result<Arc<Node>, StmError> {
    let head = link.read(tx)?;
    if let Some(head) = &head {
        if head.character.read(tx)? <= wanted {
            return Ok(Arc::clone(head));
        }
    }

    let fresh = Node::new(wanted, head);
    link.write(tx, Some(Arc::clone(&fresh)));
    Ok(fresh)
}
