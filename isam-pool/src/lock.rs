//! Free list of record lock descriptors.
//!
//! Lock descriptors carry no liveness tag. Ownership of an acquired lock
//! moves to the caller and comes back on release, so a lock cannot be
//! released twice.
//!
//! # Invariants
//!
//! - Every lock handed out is zeroed.
//! - `free_list.len()` == released - reused

use tracing::debug;

use crate::types::{Handle, RowNumber};

/// A record lock held by a file handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lock {
    /// The file holding the lock, once assigned.
    pub handle: Option<Handle>,
    /// The locked row.
    pub row_number: RowNumber,
}

impl Lock {
    /// Point this lock at a row of a file.
    pub const fn assign(&mut self, handle: Handle, row_number: RowNumber) {
        self.handle = Some(handle);
        self.row_number = row_number;
    }
}

/// Counters for the lock pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    /// Locks served by new allocations.
    pub fresh: u64,
    /// Locks served from the free list.
    pub reused: u64,
    /// Locks returned to the free list.
    pub released: u64,
}

/// A pool of idle lock descriptors.
#[derive(Debug, Default)]
pub struct LockPool {
    /// Idle locks, most recently released last.
    free_list: Vec<Box<Lock>>,
    stats: LockStats,
}

impl LockPool {
    /// Create an empty pool.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            free_list: Vec::new(),
            stats: LockStats {
                fresh: 0,
                reused: 0,
                released: 0,
            },
        }
    }

    /// Hand out a zeroed lock for `handle`.
    ///
    /// Reuses an idle lock when one is available. Allocation failure aborts
    /// the process through the global allocator.
    ///
    /// # Post-conditions
    /// - The returned lock equals `Lock::default()`
    pub fn acquire(&mut self, handle: Handle) -> Box<Lock> {
        if let Some(mut lock) = self.free_list.pop() {
            *lock = Lock::default();
            self.stats.reused += 1;
            debug!(%handle, "reused pooled lock");
            lock
        } else {
            self.stats.fresh += 1;
            debug!(%handle, "allocated fresh lock");
            Box::default()
        }
    }

    /// Return a lock to the pool.
    pub fn release(&mut self, lock: Box<Lock>) {
        self.free_list.push(lock);
        self.stats.released += 1;
    }

    /// Number of idle locks.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free_list.len()
    }

    /// Allocation counters.
    #[must_use]
    pub const fn stats(&self) -> LockStats {
        self.stats
    }
}
