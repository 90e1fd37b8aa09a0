// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Generation-counted arena
//!
//! Handles never couple to raw pointers. The object a handle denotes lives
//! in an [`Arena`] and the handle table stores its [`ArenaKey`]. Removing an
//! object bumps the slot generation, so a key that outlived its object
//! misses instead of aliasing whatever reuses the slot.
//!
//! Services use the same arena to keep per-connection state behind an
//! `rhandle`.

use heapless::Vec;
use q_common::{Error, Result};

/// Index plus generation of an arena slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaKey {
    index: u16,
    generation: u16,
}

impl ArenaKey {
    pub(crate) const fn new(index: u16, generation: u16) -> Self {
        Self { index, generation }
    }

    /// Slot index
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index as usize
    }

    /// Slot generation (never zero)
    #[must_use]
    pub const fn generation(&self) -> u16 {
        self.generation
    }

    /// Pack into a non-zero `u32`
    #[must_use]
    pub const fn to_raw(self) -> u32 {
        ((self.generation as u32) << 16) | self.index as u32
    }

    /// Unpack a value produced by [`ArenaKey::to_raw`]
    ///
    /// Returns `None` for zero, which no live key packs to.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        let generation = (raw >> 16) as u16;
        if generation == 0 {
            return None;
        }
        Some(Self {
            index: (raw & 0xFFFF) as u16,
            generation,
        })
    }
}

/// Next generation after `g`, skipping zero
pub(crate) const fn next_generation(g: u16) -> u16 {
    match g.wrapping_add(1) {
        0 => 1,
        n => n,
    }
}

enum Slot<T> {
    Vacant { generation: u16 },
    Occupied { generation: u16, value: T },
}

/// Fixed-capacity arena of `N` slots
pub struct Arena<T, const N: usize> {
    slots: Vec<Slot<T>, N>,
    len: usize,
}

impl<T, const N: usize> Arena<T, N> {
    /// Create an empty arena
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
        }
    }

    /// Store `value`, returning its key
    ///
    /// # Errors
    /// Returns `Error::ResourceExhausted` if all `N` slots are occupied.
    pub fn insert(&mut self, value: T) -> Result<ArenaKey> {
        let vacant = self
            .slots
            .iter()
            .position(|slot| matches!(slot, Slot::Vacant { .. }));

        let key = match vacant {
            Some(index) => {
                let generation = match self.slots[index] {
                    Slot::Vacant { generation } => generation,
                    Slot::Occupied { .. } => return Err(Error::InternalError),
                };
                self.slots[index] = Slot::Occupied { generation, value };
                ArenaKey::new(index as u16, generation)
            }
            None => {
                let index = self.slots.len();
                if index >= N || index > usize::from(u16::MAX) {
                    return Err(Error::ResourceExhausted);
                }
                if self.slots.push(Slot::Occupied { generation: 1, value }).is_err() {
                    return Err(Error::ResourceExhausted);
                }
                ArenaKey::new(index as u16, 1)
            }
        };

        self.len += 1;
        Ok(key)
    }

    /// Look up a live object
    #[must_use]
    pub fn get(&self, key: ArenaKey) -> Option<&T> {
        match self.slots.get(key.index()) {
            Some(Slot::Occupied { generation, value }) if *generation == key.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    /// Look up a live object mutably
    pub fn get_mut(&mut self, key: ArenaKey) -> Option<&mut T> {
        match self.slots.get_mut(key.index()) {
            Some(Slot::Occupied { generation, value }) if *generation == key.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    /// Remove and return a live object
    pub fn remove(&mut self, key: ArenaKey) -> Option<T> {
        if self.get(key).is_none() {
            return None;
        }
        let vacant = Slot::Vacant {
            generation: next_generation(key.generation),
        };
        let slot = self.slots.get_mut(key.index())?;
        match core::mem::replace(slot, vacant) {
            Slot::Occupied { value, .. } => {
                self.len -= 1;
                Some(value)
            }
            Slot::Vacant { .. } => None,
        }
    }

    /// Check if a key names a live object
    #[must_use]
    pub fn contains(&self, key: ArenaKey) -> bool {
        self.get(key).is_some()
    }

    /// Number of live objects
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check if the arena is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of live objects
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T, const N: usize> Default for Arena<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
