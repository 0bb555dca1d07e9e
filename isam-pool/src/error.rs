//! Errors surfaced by the index pools.
//!
//! Two classes are fatal and go through the fault reporter before being
//! returned: allocation failure (`Exhausted`) and detected invariant
//! violations (`Corruption`). Everything else is caller misuse that is
//! rejected without touching pool state.

use crate::codes;
use crate::types::{Handle, KeyNumber, TreeId};

/// The kind of pooled object an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// A B-tree node.
    Tree,
    /// An index key.
    Key,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tree => write!(f, "tree node"),
            Self::Key => write!(f, "key"),
        }
    }
}

/// A broken liveness or ownership invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The free list handed out a slot that is still live.
    LiveOnFreeList,
    /// The object is already in its free list (double free or use after free).
    AlreadyPooled,
    /// The object's memory was already returned by a drain.
    Drained,
    /// The reference was issued for an earlier tenant of the slot.
    Stale,
    /// The reference points past the end of the pool.
    OutOfRange,
    /// The free list loops back on itself or holds more entries than the pool.
    FreeListCycle,
    /// A key chain's links disagree with each other or with the node.
    BrokenChain(&'static str),
    /// A child node is reachable from more than one key.
    SharedSubtree,
    /// The subtree is deeper than the configured limit.
    DepthExceeded { limit: usize },
    /// The node's recorded key count differs from its chain length.
    KeyCountMismatch { recorded: usize, walked: usize },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LiveOnFreeList => write!(f, "allocated an object still marked live"),
            Self::AlreadyPooled => write!(f, "object is already free"),
            Self::Drained => write!(f, "object memory was already released"),
            Self::Stale => write!(f, "stale reference to a reused slot"),
            Self::OutOfRange => write!(f, "reference outside the pool"),
            Self::FreeListCycle => write!(f, "free list is cyclic"),
            Self::BrokenChain(detail) => write!(f, "broken key chain: {detail}"),
            Self::SharedSubtree => write!(f, "child subtree owned by more than one key"),
            Self::DepthExceeded { limit } => write!(f, "subtree deeper than {limit} levels"),
            Self::KeyCountMismatch { recorded, walked } => write!(
                f,
                "node records {recorded} keys but its chain holds {walked}"
            ),
        }
    }
}

/// Errors that can occur during pool operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The handle does not name an open file.
    NotOpen { handle: Handle },
    /// The key number is not defined for the file.
    BadKeyNumber { handle: Handle, key_number: KeyNumber },
    /// A key definition was rejected.
    BadKeyDefinition(String),
    /// Keys of this index are still live.
    LiveKeysOutstanding {
        handle: Handle,
        key_number: KeyNumber,
        live: usize,
    },
    /// A node is bound to a different index than the one supplied.
    IndexMismatch {
        tree: TreeId,
        bound_to: (Handle, KeyNumber),
    },
    /// The request would break chain or ownership structure.
    InvalidArgument(String),
    /// The allocator could not satisfy a request.
    Exhausted { object: ObjectKind, bytes: usize },
    /// A liveness or ownership invariant was found broken.
    Corruption {
        object: ObjectKind,
        index: u32,
        violation: Violation,
    },
}

impl PoolError {
    /// Whether this error goes through the fault reporter.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Exhausted { .. } | Self::Corruption { .. })
    }

    /// The numeric ISAM error code recorded for this error.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::NotOpen { .. } => codes::ENOTOPEN,
            Self::BadKeyNumber { .. } | Self::BadKeyDefinition(_) => codes::EBADKEY,
            Self::LiveKeysOutstanding { .. } => codes::ENOTEXCL,
            Self::IndexMismatch { .. } | Self::InvalidArgument(_) => codes::EBADARG,
            Self::Exhausted { .. } => codes::EBADMEM,
            Self::Corruption { .. } => codes::EBADFILE,
        }
    }
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOpen { handle } => write!(f, "file handle {handle} is not open"),
            Self::BadKeyNumber { handle, key_number } => {
                write!(f, "key {key_number} is not defined for handle {handle}")
            }
            Self::BadKeyDefinition(message) => write!(f, "bad key definition: {message}"),
            Self::LiveKeysOutstanding {
                handle,
                key_number,
                live,
            } => write!(
                f,
                "handle {handle} key {key_number} still has {live} live keys"
            ),
            Self::IndexMismatch { tree, bound_to } => write!(
                f,
                "{tree} belongs to handle {} key {}",
                bound_to.0, bound_to.1
            ),
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::Exhausted { object, bytes } => {
                write!(f, "cannot allocate {bytes} bytes for a {object}")
            }
            Self::Corruption {
                object,
                index,
                violation,
            } => write!(f, "{object} slot {index}: {violation}"),
        }
    }
}

impl std::error::Error for PoolError {}
