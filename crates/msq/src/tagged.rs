//! Tagged node references.
//!
//! A `TaggedPtr` pairs an optional arena index with a counter. The pair is
//! the unit of every atomic operation on `head`, `tail` and `next`; the tag is
//! bumped on each successful CAS so that a stale snapshot can never match a
//! slot whose node was recycled in the meantime (ABA).

use std::fmt;

/// Stable index of a node slot in a `NodeArena`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Largest index the arena will hand out.
    pub const MAX: u32 = u32::MAX - 1;

    #[inline]
    pub(crate) fn new(index: u32) -> Self {
        debug_assert!(index <= Self::MAX, "node index {} out of range", index);
        Self(index)
    }

    #[inline]
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// Encoded "no node" in the low half of a packed pointer.
const NIL: u64 = u64::MAX;

/// (node, tag) pair compared and exchanged as one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaggedPtr {
    node: Option<NodeId>,
    tag: u64,
}

impl TaggedPtr {
    /// Empty link with tag zero, the initial value of every `next`.
    pub const NULL: Self = Self { node: None, tag: 0 };

    #[inline]
    #[must_use]
    pub const fn new(node: Option<NodeId>, tag: u64) -> Self {
        Self { node, tag }
    }

    #[inline]
    #[must_use]
    pub fn node(self) -> Option<NodeId> {
        self.node
    }

    #[inline]
    #[must_use]
    pub fn tag(self) -> u64 {
        self.tag
    }

    #[inline]
    #[must_use]
    pub fn is_null(self) -> bool {
        self.node.is_none()
    }

    /// The value a CAS installs in place of `self`: new node, tag + 1.
    #[inline]
    #[must_use]
    pub fn successor(self, node: Option<NodeId>) -> Self {
        Self {
            node,
            tag: self.tag.wrapping_add(1),
        }
    }

    /// Tag in the high 64 bits, node index (or `NIL`) in the low 64 bits.
    #[inline]
    pub(crate) fn pack(self) -> u128 {
        let index = self.node.map_or(NIL, |id| u64::from(id.index()));
        (u128::from(self.tag) << 64) | u128::from(index)
    }

    #[inline]
    pub(crate) fn unpack(raw: u128) -> Self {
        let index = raw as u64;
        let node = if index == NIL {
            None
        } else {
            Some(NodeId::new(index as u32))
        };
        Self {
            node,
            tag: (raw >> 64) as u64,
        }
    }
}

impl Default for TaggedPtr {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for TaggedPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(id) => write!(f, "{}#{}", id, self.tag),
            None => write!(f, "null#{}", self.tag),
        }
    }
}
