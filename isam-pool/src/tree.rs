//! B-tree node descriptors and their process-wide pool.
//!
//! A node holds an ordered, doubly linked chain of keys. The chain's keys
//! live in the key pool of the index the node is bound to; the node only
//! records the first, last and current key of the chain.

use tracing::debug;

use crate::error::{ObjectKind, PoolError};
use crate::slab::{Origin, Recycle, Slab, SlabStats};
use crate::types::{Handle, KeyId, KeyNumber, NodeNumber, TreeId};

/// An in-memory B-tree node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeNode {
    /// On-disk node this was read from.
    pub node_number: NodeNumber,
    /// Distance from the leaf level (0 = leaf).
    pub level: u16,
    pub(crate) parent: Option<TreeId>,
    pub(crate) owner: Option<KeyId>,
    pub(crate) first: Option<KeyId>,
    pub(crate) last: Option<KeyId>,
    pub(crate) current: Option<KeyId>,
    pub(crate) key_count: usize,
    pub(crate) binding: Option<(Handle, KeyNumber)>,
}

impl TreeNode {
    /// First key of the chain.
    #[must_use]
    pub const fn first(&self) -> Option<KeyId> {
        self.first
    }

    /// Last key of the chain.
    #[must_use]
    pub const fn last(&self) -> Option<KeyId> {
        self.last
    }

    /// The key a cursor is positioned on.
    #[must_use]
    pub const fn current(&self) -> Option<KeyId> {
        self.current
    }

    /// Number of live keys in the chain.
    #[must_use]
    pub const fn key_count(&self) -> usize {
        self.key_count
    }

    /// The node whose key owns this node.
    #[must_use]
    pub const fn parent(&self) -> Option<TreeId> {
        self.parent
    }

    /// The key that owns this node as its child subtree.
    #[must_use]
    pub const fn owner(&self) -> Option<KeyId> {
        self.owner
    }

    /// The index this node's keys come from, once a key has been linked.
    #[must_use]
    pub const fn binding(&self) -> Option<(Handle, KeyNumber)> {
        self.binding
    }

    /// Whether no key owns this node.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.owner.is_none()
    }
}

impl Recycle for TreeNode {
    fn recycle(&mut self) {
        *self = Self::default();
    }
}

/// Counters for the tree pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Slot allocation counters.
    pub slots: SlabStats,
    /// Child subtrees destroyed while tearing down an owning key.
    pub subtrees_destroyed: u64,
}

/// The pool of tree nodes shared by every open file.
#[derive(Debug, Default)]
pub struct TreePool {
    slab: Slab<TreeNode>,
    subtrees_destroyed: u64,
}

impl TreePool {
    /// Create an empty pool.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slab: Slab::new(),
            subtrees_destroyed: 0,
        }
    }

    /// Hand out a zeroed node.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if the free list head is still live and
    /// `Exhausted` if the slot table cannot grow.
    pub fn acquire(&mut self, handle: Handle) -> Result<(TreeId, Origin), PoolError> {
        let (slot, origin) = self
            .slab
            .acquire(|| Ok(TreeNode::default()))
            .map_err(|(index, e)| e.into_pool_error(ObjectKind::Tree, index))?;
        debug!(%handle, slot = %slot, ?origin, "acquired tree node");
        Ok((TreeId(slot), origin))
    }

    /// Borrow a live node.
    pub fn get(&self, id: TreeId) -> Result<&TreeNode, PoolError> {
        self.slab
            .get(id.0)
            .map_err(|e| e.into_pool_error(ObjectKind::Tree, id.0.index()))
    }

    /// Mutably borrow a live node.
    pub fn get_mut(&mut self, id: TreeId) -> Result<&mut TreeNode, PoolError> {
        self.slab
            .get_mut(id.0)
            .map_err(|e| e.into_pool_error(ObjectKind::Tree, id.0.index()))
    }

    /// Check that `id` refers to a live node.
    pub fn check(&self, id: TreeId) -> Result<(), PoolError> {
        self.slab
            .check(id.0)
            .map_err(|e| e.into_pool_error(ObjectKind::Tree, id.0.index()))
    }

    /// Put a node back on the free list. The caller has already emptied it.
    pub(crate) fn release(&mut self, id: TreeId) -> Result<(), PoolError> {
        self.slab
            .release(id.0)
            .map_err(|e| e.into_pool_error(ObjectKind::Tree, id.0.index()))
    }

    pub(crate) const fn record_subtree_destroyed(&mut self) {
        self.subtrees_destroyed += 1;
    }

    /// Number of live nodes.
    #[must_use]
    pub const fn live(&self) -> usize {
        self.slab.live()
    }

    /// Number of idle nodes.
    #[must_use]
    pub const fn pooled(&self) -> usize {
        self.slab.pooled()
    }

    /// Allocation and teardown counters.
    #[must_use]
    pub const fn stats(&self) -> TreeStats {
        TreeStats {
            slots: self.slab.stats(),
            subtrees_destroyed: self.subtrees_destroyed,
        }
    }

    /// Iterate over live nodes.
    pub fn iter_live(&self) -> impl Iterator<Item = (TreeId, &TreeNode)> {
        self.slab.iter_live().map(|(slot, node)| (TreeId(slot), node))
    }

    /// Walk the free list and return its length.
    pub fn verify_free_list(&self) -> Result<usize, PoolError> {
        self.slab
            .verify_free_list()
            .map_err(|(index, e)| e.into_pool_error(ObjectKind::Tree, index))
    }
}
