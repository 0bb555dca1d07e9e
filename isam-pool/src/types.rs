//! Identifier types for files, keys, tree nodes and rows.
//!
//! Handles and key numbers index the file descriptor table. `TreeId` and
//! `KeyId` reference slots inside a pool and carry the generation the slot
//! had when it was handed out.
//!
//! # Invariants
//!
//! - A `TreeId`/`KeyId` is valid only while its slot is live with the same
//!   generation. Generations are never reused by any pool in the process,
//!   so an ID cannot name a key of another index or of a reopened file.

use std::fmt;

/// Index of an open file in the descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub usize);

/// Index of a key definition within an open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyNumber(pub usize);

/// Number of the on-disk index node a tree node was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeNumber(pub u64);

/// Number of the data row an index key points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RowNumber(pub u64);

/// A generation-checked reference to a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u64,
}

impl SlotId {
    #[must_use]
    pub(crate) const fn new(index: u32, generation: u64) -> Self {
        Self { index, generation }
    }

    /// Position of the slot in its pool.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation the slot had when this reference was handed out.
    #[must_use]
    pub const fn generation(self) -> u64 {
        self.generation
    }

    pub(crate) const fn position(self) -> usize {
        self.index as usize
    }
}

/// Reference to a live B-tree node in the tree pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeId(pub(crate) SlotId);

/// Reference to a live key in a per-index key pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId(pub(crate) SlotId);

impl TreeId {
    /// The underlying slot reference.
    #[must_use]
    pub const fn slot(self) -> SlotId {
        self.0
    }
}

impl KeyId {
    /// The underlying slot reference.
    #[must_use]
    pub const fn slot(self) -> SlotId {
        self.0
    }
}

impl From<SlotId> for TreeId {
    fn from(slot: SlotId) -> Self {
        Self(slot)
    }
}

impl From<SlotId> for KeyId {
    fn from(slot: SlotId) -> Self {
        Self(slot)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for KeyNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RowNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tree {}", self.0)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key {}", self.0)
    }
}
