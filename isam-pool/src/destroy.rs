//! Recursive teardown of index subtrees.
//!
//! Teardown runs in two phases. A read-only survey walks the whole subtree
//! and checks every liveness, chain and ownership invariant it depends on.
//! Only a subtree that passes is destroyed, so a detected violation never
//! leaves a half-released tree behind.
//!
//! Destruction cascades: each key's child subtree is destroyed before the
//! key itself goes back to its pool, and a node is pooled only after its
//! whole chain.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{ObjectKind, PoolError, Violation};
use crate::key::KeyPool;
use crate::tree::{TreeNode, TreePool};
use crate::types::{Handle, KeyId, KeyNumber, TreeId};

/// What a teardown released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Teardown {
    /// Keys returned to their pool.
    pub keys_released: usize,
    /// Child subtrees destroyed through an owning key.
    pub subtrees_destroyed: usize,
    /// Nodes returned to the tree pool.
    pub nodes_released: usize,
}

impl Teardown {
    const fn absorb(&mut self, other: Self) {
        self.keys_released += other.keys_released;
        self.subtrees_destroyed += other.subtrees_destroyed;
        self.nodes_released += other.nodes_released;
    }
}

pub(crate) const fn tree_corruption(tree: TreeId, violation: Violation) -> PoolError {
    PoolError::Corruption {
        object: ObjectKind::Tree,
        index: tree.0.index(),
        violation,
    }
}

pub(crate) const fn key_corruption(key: KeyId, violation: Violation) -> PoolError {
    PoolError::Corruption {
        object: ObjectKind::Key,
        index: key.0.index(),
        violation,
    }
}

/// Read-only validation of a subtree.
struct Survey<'a> {
    trees: &'a TreePool,
    keys: &'a KeyPool,
    index: (Handle, KeyNumber),
    max_depth: usize,
    nodes: HashSet<TreeId>,
    chained: HashSet<KeyId>,
}

impl<'a> Survey<'a> {
    fn new(
        trees: &'a TreePool,
        keys: &'a KeyPool,
        index: (Handle, KeyNumber),
        max_depth: usize,
    ) -> Self {
        Self {
            trees,
            keys,
            index,
            max_depth,
            nodes: HashSet::new(),
            chained: HashSet::new(),
        }
    }

    /// Check `tree` and everything below it. `depth` counts from 1.
    fn node(&mut self, tree: TreeId, depth: usize) -> Result<(), PoolError> {
        let trees: &'a TreePool = self.trees;
        let node = trees.get(tree)?;
        if depth > self.max_depth {
            return Err(tree_corruption(
                tree,
                Violation::DepthExceeded {
                    limit: self.max_depth,
                },
            ));
        }
        if !self.nodes.insert(tree) {
            return Err(tree_corruption(tree, Violation::SharedSubtree));
        }
        match node.binding {
            Some(bound_to) if bound_to != self.index => {
                return Err(PoolError::IndexMismatch { tree, bound_to });
            }
            None if node.first.is_some() || node.key_count > 0 => {
                return Err(tree_corruption(
                    tree,
                    Violation::BrokenChain("unbound node holds keys"),
                ));
            }
            _ => {}
        }
        self.chain(tree, node, depth)
    }

    fn chain(&mut self, tree: TreeId, node: &TreeNode, depth: usize) -> Result<(), PoolError> {
        let trees: &'a TreePool = self.trees;
        let keys: &'a KeyPool = self.keys;
        let mut walked = 0usize;
        let mut previous = None;
        let mut cursor = node.first;
        let mut current_seen = node.current.is_none();

        while let Some(key_id) = cursor {
            let key = keys.get(key_id)?;
            if !self.chained.insert(key_id) {
                return Err(key_corruption(key_id, Violation::BrokenChain("chain loops")));
            }
            if key.node != Some(tree) {
                return Err(key_corruption(
                    key_id,
                    Violation::BrokenChain("key is chained under another node"),
                ));
            }
            if key.prev != previous {
                return Err(key_corruption(
                    key_id,
                    Violation::BrokenChain("prev link disagrees with chain order"),
                ));
            }
            current_seen |= node.current == Some(key_id);

            if let Some(child) = key.child {
                let child_node = trees.get(child)?;
                if child_node.owner != Some(key_id) {
                    return Err(tree_corruption(child, Violation::SharedSubtree));
                }
                if child_node.parent != Some(tree) {
                    return Err(tree_corruption(
                        child,
                        Violation::BrokenChain("parent link disagrees with owning key"),
                    ));
                }
                self.node(child, depth + 1)?;
            }

            walked += 1;
            previous = Some(key_id);
            cursor = key.next;
        }

        if node.last != previous {
            return Err(tree_corruption(
                tree,
                Violation::BrokenChain("last reference is not the chain tail"),
            ));
        }
        if !current_seen {
            return Err(tree_corruption(
                tree,
                Violation::BrokenChain("current key is not in the chain"),
            ));
        }
        if walked != node.key_count {
            return Err(tree_corruption(
                tree,
                Violation::KeyCountMismatch {
                    recorded: node.key_count,
                    walked,
                },
            ));
        }
        Ok(())
    }

    /// Check the key that owns `tree`, if any, still points back at it.
    fn owner(&self, tree: TreeId) -> Result<Option<KeyId>, PoolError> {
        let Some(owner) = self.trees.get(tree)?.owner else {
            return Ok(None);
        };
        let key = self.keys.get(owner)?;
        if key.child != Some(tree) {
            return Err(tree_corruption(
                tree,
                Violation::BrokenChain("owning key does not reference this node"),
            ));
        }
        Ok(Some(owner))
    }
}

/// Tears down subtrees of one index.
///
/// Every node reached must be bound to the index the destroyer was built
/// for, and every key must come from its key pool.
pub struct Destroyer<'a> {
    trees: &'a mut TreePool,
    keys: &'a mut KeyPool,
    index: (Handle, KeyNumber),
    max_depth: usize,
}

impl<'a> Destroyer<'a> {
    #[must_use]
    pub const fn new(
        trees: &'a mut TreePool,
        keys: &'a mut KeyPool,
        index: (Handle, KeyNumber),
        max_depth: usize,
    ) -> Self {
        Self {
            trees,
            keys,
            index,
            max_depth,
        }
    }

    fn survey(&self) -> Survey<'_> {
        Survey::new(self.trees, self.keys, self.index, self.max_depth)
    }

    /// Destroy `tree`, every key chained under it and every subtree those
    /// keys own, then pool the node itself.
    ///
    /// A node owned by a key is detached from it first.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if the node is not live (including a double
    /// release) or any invariant of the subtree is broken, and
    /// `IndexMismatch` if a node belongs to another index. Nothing is
    /// released in either case.
    pub fn release_all(&mut self, tree: TreeId) -> Result<Teardown, PoolError> {
        let owner = {
            let mut survey = self.survey();
            survey.node(tree, 1)?;
            survey.owner(tree)?
        };

        if let Some(owner) = owner {
            self.keys.get_mut(owner)?.child = None;
        }
        let teardown = self.destroy_node(tree)?;
        debug!(
            handle = %self.index.0,
            key_number = %self.index.1,
            tree = %tree,
            keys = teardown.keys_released,
            subtrees = teardown.subtrees_destroyed,
            "released tree"
        );
        Ok(teardown)
    }

    /// Destroy every key chained under `tree`, leaving the node live with
    /// an empty chain.
    ///
    /// # Errors
    ///
    /// Same as [`Destroyer::release_all`].
    pub fn free_all(&mut self, tree: TreeId) -> Result<Teardown, PoolError> {
        self.survey().node(tree, 1)?;
        let teardown = self.destroy_chain(tree)?;
        debug!(
            handle = %self.index.0,
            key_number = %self.index.1,
            tree = %tree,
            keys = teardown.keys_released,
            "freed key chain"
        );
        Ok(teardown)
    }

    /// Remove one key from its chain, destroy its subtree and pool it.
    ///
    /// The node's first, last and current references follow the removal;
    /// a current key moves to its successor, else its predecessor.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if the key is not live (including a double
    /// free), its neighbours do not point back at it, or its subtree is
    /// broken. Nothing changes in that case.
    pub fn free_one(&mut self, key_id: KeyId) -> Result<Teardown, PoolError> {
        let (node, prev, next, child) = {
            let key = self.keys.get(key_id)?;
            (key.node, key.prev, key.next, key.child)
        };

        if let Some(tree) = node {
            self.check_links(tree, key_id, prev, next)?;
        }
        if let Some(child) = child {
            let mut survey = self.survey();
            survey.node(child, 1)?;
            if survey.owner(child)? != Some(key_id) {
                return Err(tree_corruption(child, Violation::SharedSubtree));
            }
        }

        if let Some(tree) = node {
            self.unlink(tree, key_id, prev, next)?;
        }
        let mut teardown = Teardown::default();
        if let Some(child) = child {
            teardown.absorb(self.destroy_node(child)?);
            teardown.subtrees_destroyed += 1;
            self.trees.record_subtree_destroyed();
        }
        self.keys.release(key_id)?;
        teardown.keys_released += 1;

        debug!(
            handle = %self.index.0,
            key_number = %self.index.1,
            key = %key_id,
            subtree = child.is_some(),
            "freed key"
        );
        Ok(teardown)
    }

    /// Check that the neighbours of a chained key point back at it.
    fn check_links(
        &self,
        tree: TreeId,
        key_id: KeyId,
        prev: Option<KeyId>,
        next: Option<KeyId>,
    ) -> Result<(), PoolError> {
        let node = self.trees.get(tree)?;
        if let Some(bound_to) = node.binding.filter(|bound_to| *bound_to != self.index) {
            return Err(PoolError::IndexMismatch { tree, bound_to });
        }
        if node.key_count == 0 {
            return Err(tree_corruption(
                tree,
                Violation::KeyCountMismatch {
                    recorded: 0,
                    walked: 1,
                },
            ));
        }

        let front = match prev {
            Some(prev) => self.keys.get(prev)?.next,
            None => node.first,
        };
        let back = match next {
            Some(next) => self.keys.get(next)?.prev,
            None => node.last,
        };
        if front != Some(key_id) || back != Some(key_id) {
            return Err(key_corruption(
                key_id,
                Violation::BrokenChain("neighbours do not point back at key"),
            ));
        }
        Ok(())
    }

    fn unlink(
        &mut self,
        tree: TreeId,
        key_id: KeyId,
        prev: Option<KeyId>,
        next: Option<KeyId>,
    ) -> Result<(), PoolError> {
        match prev {
            Some(prev) => self.keys.get_mut(prev)?.next = next,
            None => self.trees.get_mut(tree)?.first = next,
        }
        match next {
            Some(next) => self.keys.get_mut(next)?.prev = prev,
            None => self.trees.get_mut(tree)?.last = prev,
        }

        let node = self.trees.get_mut(tree)?;
        if node.current == Some(key_id) {
            node.current = next.or(prev);
        }
        node.key_count -= 1;

        let key = self.keys.get_mut(key_id)?;
        key.node = None;
        key.prev = None;
        key.next = None;
        Ok(())
    }

    fn destroy_node(&mut self, tree: TreeId) -> Result<Teardown, PoolError> {
        let mut teardown = self.destroy_chain(tree)?;
        self.trees.release(tree)?;
        teardown.nodes_released += 1;
        Ok(teardown)
    }

    fn destroy_chain(&mut self, tree: TreeId) -> Result<Teardown, PoolError> {
        let mut cursor = {
            let node = self.trees.get_mut(tree)?;
            node.last = None;
            node.current = None;
            node.key_count = 0;
            node.first.take()
        };

        let mut teardown = Teardown::default();
        while let Some(key_id) = cursor {
            let (next, child) = {
                let key = self.keys.get(key_id)?;
                (key.next, key.child)
            };
            if let Some(child) = child {
                teardown.absorb(self.destroy_node(child)?);
                teardown.subtrees_destroyed += 1;
                self.trees.record_subtree_destroyed();
            }
            self.keys.release(key_id)?;
            teardown.keys_released += 1;
            cursor = next;
        }
        Ok(teardown)
    }
}
