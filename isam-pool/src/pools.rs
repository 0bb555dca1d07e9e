//! The engine-owned pool set.
//!
//! `IndexPools` bundles the lock pool, the tree pool, the descriptor table
//! with its per-index key pools, the fault reporter and the diagnostic
//! state. Every operation that acquires, releases or relinks records
//! itself in the diagnostics, and every failure records its code and, if
//! fatal, goes through the fault reporter before it is returned. Plain
//! borrows (`tree`, `key`, `chain` and friends) leave the diagnostics
//! alone.
//!
//! # Invariants
//!
//! - A rejected operation leaves every pool unchanged.
//! - Keys chained under a node all come from the key pool of the index
//!   the node is bound to.

use tracing::{debug, warn};

use crate::codes::{Diagnostics, Operation};
use crate::config::PoolConfig;
use crate::destroy::{Destroyer, Teardown};
use crate::error::PoolError;
use crate::fault::FaultReporter;
use crate::file::{FileTable, KeyDefinition};
use crate::key::{Key, KeyPool};
use crate::lock::{Lock, LockPool, LockStats};
use crate::slab::Origin;
use crate::tree::{TreeNode, TreePool};
use crate::types::{Handle, KeyId, KeyNumber, TreeId};

/// Lock, tree and key pools for one storage engine instance.
#[derive(Debug)]
pub struct IndexPools {
    locks: LockPool,
    trees: TreePool,
    files: FileTable,
    reporter: FaultReporter,
    diagnostics: Diagnostics,
    max_tree_depth: usize,
}

impl Default for IndexPools {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl IndexPools {
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            locks: LockPool::new(),
            trees: TreePool::new(),
            files: FileTable::new(config.max_key_length),
            reporter: FaultReporter::new(config.fault_policy),
            diagnostics: Diagnostics::default(),
            max_tree_depth: config.max_tree_depth,
        }
    }

    /// Record a failure and route it through the fault reporter.
    fn fail(&mut self, error: PoolError) -> PoolError {
        self.diagnostics.fail(error.code());
        if error.is_fatal() {
            self.reporter.report(&error);
        } else {
            warn!(
                operation = ?self.diagnostics.last_call,
                code = error.code(),
                error = %error,
                "rejected pool operation"
            );
        }
        error
    }

    fn finish<T>(&mut self, result: Result<T, PoolError>) -> Result<T, PoolError> {
        result.map_err(|error| self.fail(error))
    }

    /// Register an open file with its key definitions.
    pub fn open_file(&mut self, definitions: &[KeyDefinition]) -> Result<Handle, PoolError> {
        self.diagnostics.begin(Operation::FileOpen);
        let result = self.files.open(definitions);
        self.finish(result)
    }

    /// Close a file, draining every key pool it owns.
    pub fn close_file(&mut self, handle: Handle) -> Result<usize, PoolError> {
        self.diagnostics.begin(Operation::FileClose);
        let result = self.files.close(handle);
        self.finish(result)
    }

    /// Hand out a zeroed lock descriptor.
    pub fn acquire_lock(&mut self, handle: Handle) -> Box<Lock> {
        self.diagnostics.begin(Operation::LockAcquire);
        self.locks.acquire(handle)
    }

    /// Return a lock descriptor to the pool.
    pub fn release_lock(&mut self, lock: Box<Lock>) {
        self.diagnostics.begin(Operation::LockRelease);
        self.locks.release(lock);
    }

    /// Idle lock descriptors.
    #[must_use]
    pub fn idle_locks(&self) -> usize {
        self.locks.available()
    }

    #[must_use]
    pub const fn lock_stats(&self) -> LockStats {
        self.locks.stats()
    }

    /// Hand out a zeroed tree node.
    pub fn acquire_tree(&mut self, handle: Handle) -> Result<(TreeId, Origin), PoolError> {
        self.diagnostics.begin(Operation::TreeAcquire);
        let result = self.trees.acquire(handle);
        self.finish(result)
    }

    /// Destroy a node and its whole subtree. `None` is a no-op.
    pub fn release_all(
        &mut self,
        handle: Handle,
        key_number: KeyNumber,
        tree: Option<TreeId>,
    ) -> Result<Teardown, PoolError> {
        self.diagnostics.begin(Operation::TreeReleaseAll);
        let Some(tree) = tree else {
            return Ok(Teardown::default());
        };
        let result = self
            .destroyer(handle, key_number)
            .and_then(|mut destroyer| destroyer.release_all(tree));
        self.finish(result)
    }

    /// Hand out a zeroed key sized for the index.
    pub fn acquire_key(
        &mut self,
        handle: Handle,
        key_number: KeyNumber,
    ) -> Result<(KeyId, Origin), PoolError> {
        self.diagnostics.begin(Operation::KeyAcquire);
        let result = self
            .files
            .key_pool_mut(handle, key_number)
            .and_then(|pool| pool.acquire(handle, key_number));
        self.finish(result)
    }

    /// Destroy every key chained under `tree`; the node stays live.
    pub fn free_all(
        &mut self,
        handle: Handle,
        key_number: KeyNumber,
        tree: TreeId,
    ) -> Result<Teardown, PoolError> {
        self.diagnostics.begin(Operation::KeyFreeAll);
        let result = self
            .destroyer(handle, key_number)
            .and_then(|mut destroyer| destroyer.free_all(tree));
        self.finish(result)
    }

    /// Unlink one key, destroy its subtree and pool it.
    pub fn free_one(
        &mut self,
        handle: Handle,
        key_number: KeyNumber,
        key: KeyId,
    ) -> Result<Teardown, PoolError> {
        self.diagnostics.begin(Operation::KeyFreeOne);
        let result = self
            .destroyer(handle, key_number)
            .and_then(|mut destroyer| destroyer.free_one(key));
        self.finish(result)
    }

    /// Return the memory of every idle key of the index to the allocator.
    pub fn drain(&mut self, handle: Handle, key_number: KeyNumber) -> Result<usize, PoolError> {
        self.diagnostics.begin(Operation::KeyDrain);
        let result = self
            .files
            .key_pool_mut(handle, key_number)
            .and_then(|pool| pool.drain(handle, key_number));
        self.finish(result)
    }

    fn destroyer(
        &mut self,
        handle: Handle,
        key_number: KeyNumber,
    ) -> Result<Destroyer<'_>, PoolError> {
        let keys = self.files.key_pool_mut(handle, key_number)?;
        Ok(Destroyer::new(
            &mut self.trees,
            keys,
            (handle, key_number),
            self.max_tree_depth,
        ))
    }

    /// Chain `key` into `tree` right after `anchor`, or at the front when
    /// `anchor` is `None`. Binds the node to the index on first use.
    pub fn link_key_after(
        &mut self,
        handle: Handle,
        key_number: KeyNumber,
        tree: TreeId,
        anchor: Option<KeyId>,
        key: KeyId,
    ) -> Result<(), PoolError> {
        self.diagnostics.begin(Operation::KeyLink);
        let result = self.link(handle, key_number, tree, anchor, key);
        self.finish(result)
    }

    /// Chain `key` at the end of `tree`.
    pub fn link_key_last(
        &mut self,
        handle: Handle,
        key_number: KeyNumber,
        tree: TreeId,
        key: KeyId,
    ) -> Result<(), PoolError> {
        self.diagnostics.begin(Operation::KeyLink);
        let last = self.trees.get(tree).map(TreeNode::last);
        let result = last.and_then(|last| self.link(handle, key_number, tree, last, key));
        self.finish(result)
    }

    fn link(
        &mut self,
        handle: Handle,
        key_number: KeyNumber,
        tree: TreeId,
        anchor: Option<KeyId>,
        key_id: KeyId,
    ) -> Result<(), PoolError> {
        let index = (handle, key_number);
        let keys = self.files.key_pool_mut(handle, key_number)?;
        let node = self.trees.get_mut(tree)?;
        if let Some(bound_to) = node.binding.filter(|bound_to| *bound_to != index) {
            return Err(PoolError::IndexMismatch { tree, bound_to });
        }
        if keys.get(key_id)?.is_linked() {
            return Err(PoolError::InvalidArgument(format!(
                "{key_id} is already chained"
            )));
        }

        let next = match anchor {
            Some(anchor) => {
                let anchor_key = keys.get(anchor)?;
                if anchor_key.node != Some(tree) {
                    return Err(PoolError::InvalidArgument(format!(
                        "{anchor} is not chained under {tree}"
                    )));
                }
                anchor_key.next
            }
            None => node.first,
        };
        if let Some(next) = next {
            keys.check(next)?;
        }

        match anchor {
            Some(anchor) => keys.get_mut(anchor)?.next = Some(key_id),
            None => node.first = Some(key_id),
        }
        match next {
            Some(next) => keys.get_mut(next)?.prev = Some(key_id),
            None => node.last = Some(key_id),
        }
        node.key_count += 1;
        node.binding = Some(index);

        let key = keys.get_mut(key_id)?;
        key.node = Some(tree);
        key.prev = anchor;
        key.next = next;
        debug!(%handle, %key_number, %tree, key = %key_id, "linked key");
        Ok(())
    }

    /// Make `child` the subtree owned by `key`.
    ///
    /// The key must be chained and own no subtree yet. The child must be
    /// an unowned node of the same index (or not bound to any) and must
    /// not be an ancestor of the key's node.
    pub fn attach_child(
        &mut self,
        handle: Handle,
        key_number: KeyNumber,
        key: KeyId,
        child: TreeId,
    ) -> Result<(), PoolError> {
        self.diagnostics.begin(Operation::ChildAttach);
        let result = self.attach(handle, key_number, key, child);
        self.finish(result)
    }

    fn attach(
        &mut self,
        handle: Handle,
        key_number: KeyNumber,
        key_id: KeyId,
        child: TreeId,
    ) -> Result<(), PoolError> {
        let index = (handle, key_number);
        let keys = self.files.key_pool_mut(handle, key_number)?;
        let key = keys.get(key_id)?;
        let Some(parent) = key.node else {
            return Err(PoolError::InvalidArgument(format!(
                "{key_id} is not chained"
            )));
        };
        if key.child.is_some() {
            return Err(PoolError::InvalidArgument(format!(
                "{key_id} already owns a subtree"
            )));
        }

        let child_node = self.trees.get(child)?;
        if let Some(bound_to) = child_node.binding.filter(|bound_to| *bound_to != index) {
            return Err(PoolError::IndexMismatch {
                tree: child,
                bound_to,
            });
        }
        if child_node.owner.is_some() {
            return Err(PoolError::InvalidArgument(format!(
                "{child} already has an owner"
            )));
        }

        // Walk up from the key's node; meeting the child means a cycle.
        let mut ancestor = Some(parent);
        let mut steps = 0usize;
        while let Some(tree) = ancestor {
            if tree == child {
                return Err(PoolError::InvalidArgument(format!(
                    "{child} is an ancestor of {key_id}"
                )));
            }
            steps += 1;
            if steps > self.max_tree_depth {
                return Err(crate::destroy::tree_corruption(
                    tree,
                    crate::error::Violation::DepthExceeded {
                        limit: self.max_tree_depth,
                    },
                ));
            }
            ancestor = self.trees.get(tree)?.parent;
        }

        keys.get_mut(key_id)?.child = Some(child);
        let child_node = self.trees.get_mut(child)?;
        child_node.owner = Some(key_id);
        child_node.parent = Some(parent);
        debug!(%handle, %key_number, key = %key_id, %child, "attached subtree");
        Ok(())
    }

    /// Position the node's cursor on `key`, or clear it.
    pub fn set_current(
        &mut self,
        handle: Handle,
        key_number: KeyNumber,
        tree: TreeId,
        key: Option<KeyId>,
    ) -> Result<(), PoolError> {
        self.diagnostics.begin(Operation::CursorSet);
        let result = self.position(handle, key_number, tree, key);
        self.finish(result)
    }

    fn position(
        &mut self,
        handle: Handle,
        key_number: KeyNumber,
        tree: TreeId,
        key: Option<KeyId>,
    ) -> Result<(), PoolError> {
        if let Some(key_id) = key {
            let keys = self.files.key_pool(handle, key_number)?;
            if keys.get(key_id)?.node != Some(tree) {
                return Err(PoolError::InvalidArgument(format!(
                    "{key_id} is not chained under {tree}"
                )));
            }
        }
        self.trees.get_mut(tree)?.current = key;
        Ok(())
    }

    /// Borrow a live tree node.
    pub fn tree(&self, tree: TreeId) -> Result<&TreeNode, PoolError> {
        self.trees.get(tree)
    }

    /// Mutably borrow a live tree node. Chain links stay read-only.
    pub fn tree_mut(&mut self, tree: TreeId) -> Result<&mut TreeNode, PoolError> {
        self.trees.get_mut(tree)
    }

    /// Borrow a live key.
    pub fn key(&self, handle: Handle, key_number: KeyNumber, key: KeyId) -> Result<&Key, PoolError> {
        self.files.key_pool(handle, key_number)?.get(key)
    }

    /// Mutably borrow a live key. Chain links stay read-only.
    pub fn key_mut(
        &mut self,
        handle: Handle,
        key_number: KeyNumber,
        key: KeyId,
    ) -> Result<&mut Key, PoolError> {
        self.files.key_pool_mut(handle, key_number)?.get_mut(key)
    }

    /// The keys chained under `tree`, front to back.
    pub fn chain(
        &self,
        handle: Handle,
        key_number: KeyNumber,
        tree: TreeId,
    ) -> Result<Vec<KeyId>, PoolError> {
        let keys = self.files.key_pool(handle, key_number)?;
        let node = self.trees.get(tree)?;
        let mut chain = Vec::with_capacity(node.key_count);
        let mut cursor = node.first;
        while let Some(key_id) = cursor {
            if chain.len() > node.key_count {
                return Err(crate::destroy::tree_corruption(
                    tree,
                    crate::error::Violation::BrokenChain("chain loops"),
                ));
            }
            chain.push(key_id);
            cursor = keys.get(key_id)?.next;
        }
        Ok(chain)
    }

    /// The process tree pool.
    #[must_use]
    pub const fn trees(&self) -> &TreePool {
        &self.trees
    }

    /// The key pool of an index.
    pub fn key_pool(&self, handle: Handle, key_number: KeyNumber) -> Result<&KeyPool, PoolError> {
        self.files.key_pool(handle, key_number)
    }

    /// The descriptor table.
    #[must_use]
    pub const fn files(&self) -> &FileTable {
        &self.files
    }

    /// Handles of every open file.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.files.handles()
    }

    #[must_use]
    pub const fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Diagnostics, for the engine's row bookkeeping.
    pub const fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    /// Fatal errors reported so far.
    #[must_use]
    pub const fn faults_reported(&self) -> u64 {
        self.reporter.reported()
    }
}
