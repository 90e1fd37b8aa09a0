// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Handle table
//!
//! A fixed pool of slots mapping an opaque, positive 32-bit [`Handle`] to the
//! [`ArenaKey`] of the object it denotes, tagged with the owning partition
//! and an optional friend partition.
//!
//! # Concurrency
//!
//! Slots are claimed with a compare-and-swap on the null handle, so any
//! number of partitions may create handles without a shared lock. Lookup
//! and destroy scan without locking: after creation only the owner (or the
//! friend, for lookup) touches a slot, and the ownership check enforces it.
//!
//! # Failure model
//!
//! Running out of slots at creation is expected under load and reported as
//! `Error::ResourceExhausted`. Every failure after a handle was issued
//! (null, unknown, foreign, corrupt) is a protocol violation, returned as a
//! [`FatalError`] for the caller to log and halt on.

use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use q_common::constants::HANDLE_MAX;
use q_common::{Error, Handle, PartitionId, Result};

use crate::arena::ArenaKey;
use crate::fatal::{Checked, FatalError};

/// Stored in owner/friend when the slot has none
const NO_PARTITION: i32 = i32::MIN;

struct HandleSlot {
    handle: AtomicI32,
    mem: AtomicU32,
    owner: AtomicI32,
    friend: AtomicI32,
}

impl HandleSlot {
    const fn new() -> Self {
        Self {
            handle: AtomicI32::new(Handle::NULL.0),
            mem: AtomicU32::new(0),
            owner: AtomicI32::new(NO_PARTITION),
            friend: AtomicI32::new(NO_PARTITION),
        }
    }

    fn release(&self) {
        self.mem.store(0, Ordering::Relaxed);
        self.owner.store(NO_PARTITION, Ordering::Relaxed);
        self.friend.store(NO_PARTITION, Ordering::Relaxed);
        // Publishing null last makes the slot claimable only once it is clean
        self.handle.store(Handle::NULL.0, Ordering::Release);
    }
}

/// Handle table with `N` slots
pub struct HandleManager<const N: usize> {
    slots: [HandleSlot; N],
    generator: AtomicI32,
}

impl<const N: usize> HandleManager<N> {
    /// Create an empty table with the generator at the null sentinel
    #[must_use]
    pub const fn new() -> Self {
        const EMPTY: HandleSlot = HandleSlot::new();
        Self {
            slots: [EMPTY; N],
            generator: AtomicI32::new(Handle::NULL.0),
        }
    }

    /// Clear every slot and rewind the generator
    ///
    /// Only valid while no other context uses the table (boot, tests).
    pub fn reset(&self) {
        for slot in &self.slots {
            slot.release();
        }
        self.generator.store(Handle::NULL.0, Ordering::Release);
    }

    /// Number of slots
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of live handles
    #[must_use]
    pub fn live(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.handle.load(Ordering::Acquire) != Handle::NULL.0)
            .count()
    }

    /// Issue a handle for `mem`, owned by `owner`
    ///
    /// # Errors
    /// Returns `Error::ResourceExhausted` if every slot is live. Existing
    /// slots are left untouched.
    pub fn create(
        &self,
        mem: ArenaKey,
        owner: PartitionId,
        friend: Option<PartitionId>,
    ) -> Result<Handle> {
        let value = self.fresh_value();

        for slot in &self.slots {
            if slot
                .handle
                .compare_exchange(Handle::NULL.0, value, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.mem.store(mem.to_raw(), Ordering::Release);
                slot.owner.store(owner.raw(), Ordering::Release);
                slot.friend
                    .store(friend.map_or(NO_PARTITION, |f| f.raw()), Ordering::Release);
                return Ok(Handle(value));
            }
        }

        Err(Error::ResourceExhausted)
    }

    /// Retire `handle`; only the owner may do so
    pub fn destroy(&self, handle: Handle, caller: PartitionId) -> Checked<()> {
        let slot = self.find(handle)?;
        if slot.owner.load(Ordering::Acquire) != caller.raw() {
            return Err(FatalError::HandleNotOwned { handle, caller });
        }
        slot.release();
        Ok(())
    }

    /// Resolve `handle` to its object; owner or friend only
    pub fn get_mem(&self, handle: Handle, caller: PartitionId) -> Checked<ArenaKey> {
        let slot = self.find(handle)?;
        let owner = slot.owner.load(Ordering::Acquire);
        let friend = slot.friend.load(Ordering::Acquire);
        if caller.raw() != owner && caller.raw() != friend {
            return Err(FatalError::HandleAccessDenied { handle, caller });
        }

        ArenaKey::from_raw(slot.mem.load(Ordering::Acquire))
            .ok_or(FatalError::CorruptHandleSlot(handle))
    }

    /// Owner of a live handle
    pub fn owner_of(&self, handle: Handle) -> Checked<PartitionId> {
        Ok(PartitionId(self.find(handle)?.owner.load(Ordering::Acquire)))
    }

    fn find(&self, handle: Handle) -> Checked<&HandleSlot> {
        if handle.is_null() {
            return Err(FatalError::NullHandle);
        }
        self.slots
            .iter()
            .find(|slot| slot.handle.load(Ordering::Acquire) == handle.0)
            .ok_or(FatalError::HandleNotFound(handle))
    }

    fn is_live(&self, value: i32) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.handle.load(Ordering::Acquire) == value)
    }

    /// Next generator value that is neither null nor currently live
    fn fresh_value(&self) -> i32 {
        loop {
            let prev = match self.generator.fetch_update(
                Ordering::AcqRel,
                Ordering::Acquire,
                |current| Some(Self::advance(current)),
            ) {
                Ok(prev) | Err(prev) => prev,
            };
            let value = Self::advance(prev);
            if value != Handle::NULL.0 && !self.is_live(value) {
                return value;
            }
        }
    }

    /// Generator step: wraps to zero instead of entering the negative half
    const fn advance(current: i32) -> i32 {
        if current >= HANDLE_MAX || current < 0 {
            0
        } else {
            current + 1
        }
    }
}

impl<const N: usize> Default for HandleManager<N> {
    fn default() -> Self {
        Self::new()
    }
}
