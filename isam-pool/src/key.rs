//! Index keys and their per-index pools.
//!
//! A key is a fixed header plus a trailer holding the indexed field bytes.
//! The trailer length is fixed per key definition, so every (handle, key
//! number) pair gets its own pool and pooled keys are never shared between
//! indexes of different sizes.
//!
//! # Invariants
//!
//! - Every key in a pool has a trailer of exactly `field_length` bytes.
//! - A pooled key keeps its trailer allocation until the pool is drained.

use tracing::{debug, info};

use crate::error::{ObjectKind, PoolError};
use crate::slab::{Origin, Recycle, Slab, SlabStats, SlotError};
use crate::types::{Handle, KeyId, KeyNumber, RowNumber, TreeId};

/// Size of the fixed part of a key, excluding the trailer bytes.
pub const KEY_HEADER_SIZE: usize = std::mem::size_of::<Key>();

/// One entry of a B-tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    /// Row this key points at.
    pub row_number: RowNumber,
    /// Disambiguates duplicate field values.
    pub dup_number: u64,
    pub(crate) node: Option<TreeId>,
    pub(crate) prev: Option<KeyId>,
    pub(crate) next: Option<KeyId>,
    pub(crate) child: Option<TreeId>,
    fields: Box<[u8]>,
}

impl Key {
    /// Allocate a zeroed key with a trailer of `field_length` bytes.
    fn zeroed(field_length: usize) -> Result<Self, SlotError> {
        let mut fields = Vec::new();
        fields
            .try_reserve_exact(field_length)
            .map_err(|_| SlotError::Exhausted {
                bytes: KEY_HEADER_SIZE + field_length,
            })?;
        fields.resize(field_length, 0);
        Ok(Self {
            row_number: RowNumber::default(),
            dup_number: 0,
            node: None,
            prev: None,
            next: None,
            child: None,
            fields: fields.into_boxed_slice(),
        })
    }

    /// The indexed field bytes.
    #[must_use]
    pub fn fields(&self) -> &[u8] {
        &self.fields
    }

    /// The indexed field bytes, for writing.
    pub fn fields_mut(&mut self) -> &mut [u8] {
        &mut self.fields
    }

    /// Length of the trailer.
    #[must_use]
    pub fn field_length(&self) -> usize {
        self.fields.len()
    }

    /// Header plus trailer size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        KEY_HEADER_SIZE + self.fields.len()
    }

    /// The node whose chain holds this key.
    #[must_use]
    pub const fn node(&self) -> Option<TreeId> {
        self.node
    }

    /// Previous key in the chain.
    #[must_use]
    pub const fn prev(&self) -> Option<KeyId> {
        self.prev
    }

    /// Next key in the chain.
    #[must_use]
    pub const fn next(&self) -> Option<KeyId> {
        self.next
    }

    /// Root of the subtree below this key.
    #[must_use]
    pub const fn child(&self) -> Option<TreeId> {
        self.child
    }

    /// Whether the key sits in a node's chain.
    #[must_use]
    pub const fn is_linked(&self) -> bool {
        self.node.is_some()
    }
}

impl Recycle for Key {
    fn recycle(&mut self) {
        self.row_number = RowNumber::default();
        self.dup_number = 0;
        self.node = None;
        self.prev = None;
        self.next = None;
        self.child = None;
        self.fields.fill(0);
    }
}

/// The pool of keys for one (handle, key number) index.
#[derive(Debug)]
pub struct KeyPool {
    field_length: usize,
    slab: Slab<Key>,
}

impl KeyPool {
    /// Create an empty pool for keys with `field_length` trailer bytes.
    #[must_use]
    pub const fn new(field_length: usize) -> Self {
        Self {
            field_length,
            slab: Slab::new(),
        }
    }

    /// Trailer length of every key in this pool.
    #[must_use]
    pub const fn field_length(&self) -> usize {
        self.field_length
    }

    /// Size of every key in this pool, header included.
    #[must_use]
    pub const fn key_size(&self) -> usize {
        KEY_HEADER_SIZE + self.field_length
    }

    /// Hand out a zeroed key.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if the free list head is still live and
    /// `Exhausted` if a fresh key cannot be allocated.
    pub fn acquire(
        &mut self,
        handle: Handle,
        key_number: KeyNumber,
    ) -> Result<(KeyId, Origin), PoolError> {
        let field_length = self.field_length;
        let (slot, origin) = self
            .slab
            .acquire(|| Key::zeroed(field_length))
            .map_err(|(index, e)| e.into_pool_error(ObjectKind::Key, index))?;
        debug!(%handle, %key_number, slot = %slot, ?origin, "acquired key");
        Ok((KeyId(slot), origin))
    }

    /// Borrow a live key.
    pub fn get(&self, id: KeyId) -> Result<&Key, PoolError> {
        self.slab
            .get(id.0)
            .map_err(|e| e.into_pool_error(ObjectKind::Key, id.0.index()))
    }

    /// Mutably borrow a live key.
    pub fn get_mut(&mut self, id: KeyId) -> Result<&mut Key, PoolError> {
        self.slab
            .get_mut(id.0)
            .map_err(|e| e.into_pool_error(ObjectKind::Key, id.0.index()))
    }

    /// Check that `id` refers to a live key.
    pub fn check(&self, id: KeyId) -> Result<(), PoolError> {
        self.slab
            .check(id.0)
            .map_err(|e| e.into_pool_error(ObjectKind::Key, id.0.index()))
    }

    /// Put a key back on the free list. The caller has already unlinked it.
    pub(crate) fn release(&mut self, id: KeyId) -> Result<(), PoolError> {
        self.slab
            .release(id.0)
            .map_err(|e| e.into_pool_error(ObjectKind::Key, id.0.index()))
    }

    /// Return every pooled key's memory to the allocator.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if the free list is damaged; nothing is drained
    /// in that case.
    pub fn drain(&mut self, handle: Handle, key_number: KeyNumber) -> Result<usize, PoolError> {
        let drained = self
            .slab
            .drain()
            .map_err(|(index, e)| e.into_pool_error(ObjectKind::Key, index))?;
        if drained > 0 {
            info!(
                %handle,
                %key_number,
                drained,
                bytes = drained * self.key_size(),
                "drained key pool"
            );
        }
        Ok(drained)
    }

    /// Number of live keys.
    #[must_use]
    pub const fn live(&self) -> usize {
        self.slab.live()
    }

    /// Number of idle keys.
    #[must_use]
    pub const fn pooled(&self) -> usize {
        self.slab.pooled()
    }

    /// Allocation counters.
    #[must_use]
    pub const fn stats(&self) -> SlabStats {
        self.slab.stats()
    }

    /// Iterate over live keys.
    pub fn iter_live(&self) -> impl Iterator<Item = (KeyId, &Key)> {
        self.slab.iter_live().map(|(slot, key)| (KeyId(slot), key))
    }

    /// Walk the free list and return its length.
    pub fn verify_free_list(&self) -> Result<usize, PoolError> {
        self.slab
            .verify_free_list()
            .map_err(|(index, e)| e.into_pool_error(ObjectKind::Key, index))
    }
}
