//! Object pools for the B-tree index layer of an ISAM storage engine.
//!
//! [`IndexPools`] owns three kinds of recycled objects: record lock
//! descriptors, B-tree nodes and index keys. Keys are pooled per
//! (file handle, key number) because their trailer size depends on the
//! key definition. Released objects go back to a free list and come out
//! zeroed on the next acquire; key pools give their memory back to the
//! allocator only when drained at key drop or file close.
//!
//! Whole subtrees are torn down recursively by [`IndexPools::release_all`],
//! [`IndexPools::free_all`] and [`IndexPools::free_one`]. Teardown validates
//! the subtree before releasing anything, so double frees and broken chains
//! are reported with every pool left as it was.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod codes;
pub mod config;
pub mod destroy;
pub mod error;
pub mod fault;
pub mod file;
pub mod key;
pub mod lock;
pub mod pools;
pub mod slab;
pub mod tree;
pub mod types;

#[cfg(test)]
mod simulation;
#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, PoolConfig};
pub use destroy::Teardown;
pub use error::{ObjectKind, PoolError, Violation};
pub use fault::{FaultHandler, FaultPolicy, FaultReporter};
pub use file::KeyDefinition;
pub use key::{KEY_HEADER_SIZE, Key};
pub use lock::Lock;
pub use pools::IndexPools;
pub use slab::Origin;
pub use tree::TreeNode;
pub use types::{Handle, KeyId, KeyNumber, NodeNumber, RowNumber, TreeId};
