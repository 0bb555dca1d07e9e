//! Slot arena with an intrusive free list.
//!
//! Every slot is in exactly one of three states:
//!
//! - `Live`: handed out to a caller.
//! - `Pooled`: idle, memory retained, linked into the free list.
//! - `Vacant`: memory returned to the allocator by [`Slab::drain`].
//!
//! # Invariants
//!
//! - The free list contains exactly the `Pooled` slots.
//! - The vacant list contains exactly the `Vacant` slots.
//! - `live + pooled + vacant == slots.len()`
//! - Every acquire hands out a generation never handed out before by any
//!   slab in the process, so a reference that outlives its tenant, or that
//!   belongs to another slab, is reported as stale.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ObjectKind, PoolError, Violation};
use crate::types::SlotId;

/// Source of slot generations, shared by every slab.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Values that can be reset to their zeroed state in place.
pub trait Recycle {
    /// Zero every field, keeping owned allocations for reuse.
    fn recycle(&mut self);
}

/// Where an acquired slot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Newly allocated memory.
    Fresh,
    /// Memory taken from the free list.
    Reused,
}

/// Reasons a slot reference or free-list entry was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    /// Index past the end of the pool.
    OutOfRange,
    /// The slot now belongs to a later tenant.
    Stale,
    /// The slot is in the free list.
    Pooled,
    /// The slot's memory was drained.
    Vacant,
    /// The free list head is a live slot.
    LiveOnFreeList,
    /// The free list does not terminate.
    FreeListCycle,
    /// The allocator refused the request.
    Exhausted { bytes: usize },
}

impl SlotError {
    /// Attach the object kind and slot index this error was found at.
    #[must_use]
    pub const fn into_pool_error(self, object: ObjectKind, index: u32) -> PoolError {
        let violation = match self {
            Self::Exhausted { bytes } => return PoolError::Exhausted { object, bytes },
            Self::OutOfRange => Violation::OutOfRange,
            Self::Stale => Violation::Stale,
            Self::Pooled => Violation::AlreadyPooled,
            Self::Vacant => Violation::Drained,
            Self::LiveOnFreeList => Violation::LiveOnFreeList,
            Self::FreeListCycle => Violation::FreeListCycle,
        };
        PoolError::Corruption {
            object,
            index,
            violation,
        }
    }
}

/// Allocation counters for one slab.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlabStats {
    /// Acquires served by new memory.
    pub fresh: u64,
    /// Acquires served from the free list.
    pub reused: u64,
    /// Releases into the free list.
    pub released: u64,
    /// Pooled slots whose memory was returned by a drain.
    pub drained: u64,
}

#[derive(Debug)]
enum Slot<T> {
    Live {
        generation: u64,
        value: T,
    },
    Pooled {
        generation: u64,
        next: Option<u32>,
        value: T,
    },
    Vacant {
        generation: u64,
        next: Option<u32>,
    },
}

impl<T> Slot<T> {
    const fn generation(&self) -> u64 {
        match self {
            Self::Live { generation, .. }
            | Self::Pooled { generation, .. }
            | Self::Vacant { generation, .. } => *generation,
        }
    }

    /// Check that this slot is live for a reference carrying `generation`.
    const fn check_live(&self, generation: u64) -> Result<(), SlotError> {
        if self.generation() != generation {
            return Err(SlotError::Stale);
        }
        match self {
            Self::Live { .. } => Ok(()),
            Self::Pooled { .. } => Err(SlotError::Pooled),
            Self::Vacant { .. } => Err(SlotError::Vacant),
        }
    }
}

/// A pool of `T` values addressed by [`SlotId`].
#[derive(Debug)]
pub struct Slab<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    vacant_head: Option<u32>,
    live: usize,
    pooled: usize,
    stats: SlabStats,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slab<T> {
    /// Create an empty slab. Nothing is allocated until the first acquire.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            vacant_head: None,
            live: 0,
            pooled: 0,
            stats: SlabStats {
                fresh: 0,
                reused: 0,
                released: 0,
                drained: 0,
            },
        }
    }

    /// Number of live slots.
    #[must_use]
    pub const fn live(&self) -> usize {
        self.live
    }

    /// Number of slots in the free list.
    #[must_use]
    pub const fn pooled(&self) -> usize {
        self.pooled
    }

    /// Total number of slots, in any state.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Allocation counters.
    #[must_use]
    pub const fn stats(&self) -> SlabStats {
        self.stats
    }

    /// Borrow a live value.
    pub fn get(&self, id: SlotId) -> Result<&T, SlotError> {
        match self.slots.get(id.position()) {
            None => Err(SlotError::OutOfRange),
            Some(slot) => {
                slot.check_live(id.generation())?;
                match slot {
                    Slot::Live { value, .. } => Ok(value),
                    _ => Err(SlotError::Stale),
                }
            }
        }
    }

    /// Mutably borrow a live value.
    pub fn get_mut(&mut self, id: SlotId) -> Result<&mut T, SlotError> {
        match self.slots.get_mut(id.position()) {
            None => Err(SlotError::OutOfRange),
            Some(slot) => {
                slot.check_live(id.generation())?;
                match slot {
                    Slot::Live { value, .. } => Ok(value),
                    _ => Err(SlotError::Stale),
                }
            }
        }
    }

    /// Check that `id` refers to a live slot.
    pub fn check(&self, id: SlotId) -> Result<(), SlotError> {
        self.slots
            .get(id.position())
            .ok_or(SlotError::OutOfRange)?
            .check_live(id.generation())
    }

    /// Iterate over every live slot.
    pub fn iter_live(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.slots.iter().zip(0u32..).filter_map(|(slot, index)| match slot {
            Slot::Live { generation, value } => Some((SlotId::new(index, *generation), value)),
            _ => None,
        })
    }

    /// Walk the free list and return its length.
    ///
    /// Fails if an entry is not pooled or the list does not terminate
    /// within the pooled count.
    pub fn verify_free_list(&self) -> Result<usize, (u32, SlotError)> {
        let mut walked = 0usize;
        let mut cursor = self.free_head;
        while let Some(index) = cursor {
            if walked >= self.pooled {
                return Err((index, SlotError::FreeListCycle));
            }
            cursor = match self.slots.get(index as usize) {
                Some(Slot::Pooled { next, .. }) => *next,
                Some(Slot::Live { .. }) => return Err((index, SlotError::LiveOnFreeList)),
                Some(Slot::Vacant { .. }) => return Err((index, SlotError::Vacant)),
                None => return Err((index, SlotError::OutOfRange)),
            };
            walked += 1;
        }
        Ok(walked)
    }

    /// Release a live slot into the free list.
    ///
    /// The slot is validated before anything changes; a rejected release
    /// leaves the slab untouched.
    pub fn release(&mut self, id: SlotId) -> Result<(), SlotError> {
        let free_head = self.free_head;
        let slot = self
            .slots
            .get_mut(id.position())
            .ok_or(SlotError::OutOfRange)?;
        slot.check_live(id.generation())?;

        let taken = std::mem::replace(
            slot,
            Slot::Vacant {
                generation: id.generation(),
                next: None,
            },
        );
        if let Slot::Live { generation, value } = taken {
            *slot = Slot::Pooled {
                generation,
                next: free_head,
                value,
            };
        }
        self.free_head = Some(id.index());
        self.live -= 1;
        self.pooled += 1;
        self.stats.released += 1;
        Ok(())
    }

    /// Return the memory of every pooled slot to the allocator.
    ///
    /// Returns the number of slots drained. Once nothing is live the slot
    /// table itself is released.
    pub fn drain(&mut self) -> Result<usize, (u32, SlotError)> {
        self.verify_free_list()?;

        let mut drained = 0usize;
        let mut cursor = self.free_head.take();
        while let Some(index) = cursor {
            let Some(slot) = self.slots.get_mut(index as usize) else {
                break;
            };
            let (generation, next) = match slot {
                Slot::Pooled {
                    generation, next, ..
                } => (*generation, *next),
                _ => break,
            };
            *slot = Slot::Vacant {
                generation,
                next: self.vacant_head,
            };
            self.vacant_head = Some(index);
            cursor = next;
            drained += 1;
        }

        self.pooled = 0;
        self.stats.drained += drained as u64;
        if self.live == 0 {
            self.slots = Vec::new();
            self.vacant_head = None;
        }
        Ok(drained)
    }
}

impl<T: Recycle> Slab<T> {
    /// Hand out a zeroed value.
    ///
    /// Pops the free list when possible, resetting the pooled value in
    /// place. Otherwise `make` supplies fresh memory for a vacant or new
    /// slot. A failure leaves the slab untouched.
    pub fn acquire<F>(&mut self, make: F) -> Result<(SlotId, Origin), (u32, SlotError)>
    where
        F: FnOnce() -> Result<T, SlotError>,
    {
        if let Some(index) = self.free_head {
            return self.acquire_pooled(index).map(|id| (id, Origin::Reused));
        }
        if let Some(index) = self.vacant_head {
            return self
                .acquire_vacant(index, make)
                .map(|id| (id, Origin::Fresh));
        }

        let index = u32::try_from(self.slots.len()).map_err(|_| {
            (
                u32::MAX,
                SlotError::Exhausted {
                    bytes: std::mem::size_of::<Slot<T>>(),
                },
            )
        })?;
        self.slots.try_reserve(1).map_err(|_| {
            (
                index,
                SlotError::Exhausted {
                    bytes: std::mem::size_of::<Slot<T>>(),
                },
            )
        })?;
        let value = make().map_err(|e| (index, e))?;
        let generation = next_generation();
        self.slots.push(Slot::Live { generation, value });
        self.live += 1;
        self.stats.fresh += 1;
        Ok((SlotId::new(index, generation), Origin::Fresh))
    }

    fn acquire_pooled(&mut self, index: u32) -> Result<SlotId, (u32, SlotError)> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or((index, SlotError::OutOfRange))?;
        match slot {
            Slot::Pooled { .. } => {}
            Slot::Live { .. } => return Err((index, SlotError::LiveOnFreeList)),
            Slot::Vacant { .. } => return Err((index, SlotError::Vacant)),
        }

        let generation = next_generation();
        let taken = std::mem::replace(
            slot,
            Slot::Vacant {
                generation,
                next: None,
            },
        );
        let mut next_free = None;
        if let Slot::Pooled {
            next, mut value, ..
        } = taken
        {
            value.recycle();
            next_free = next;
            *slot = Slot::Live { generation, value };
        }
        self.free_head = next_free;
        self.pooled -= 1;
        self.live += 1;
        self.stats.reused += 1;
        Ok(SlotId::new(index, generation))
    }

    fn acquire_vacant<F>(&mut self, index: u32, make: F) -> Result<SlotId, (u32, SlotError)>
    where
        F: FnOnce() -> Result<T, SlotError>,
    {
        let next_vacant = match self.slots.get(index as usize) {
            Some(Slot::Vacant { next, .. }) => *next,
            Some(_) => return Err((index, SlotError::Stale)),
            None => return Err((index, SlotError::OutOfRange)),
        };
        let value = make().map_err(|e| (index, e))?;
        let generation = next_generation();
        if let Some(slot) = self.slots.get_mut(index as usize) {
            *slot = Slot::Live { generation, value };
        }
        self.vacant_head = next_vacant;
        self.live += 1;
        self.stats.fresh += 1;
        Ok(SlotId::new(index, generation))
    }
}
