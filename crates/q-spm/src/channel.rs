// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Channel state guard and connection records
//!
//! Every open connection owns one channel slot. The slot's processing state
//! only moves through [`StateCell::switch`], an atomic compare-and-swap from
//! the state the caller requires to the next one. Observing anything else
//! means a partition raced past the protocol (a double reply, a call on a
//! refused connection) and is returned as a [`FatalError`].
//!
//! ```text
//! INVALID --open--> IDLE --queue--> DISPATCHED --reply--> REPLIED --collect--> IDLE
//!                                        |                    |
//!                                        +--refuse--> DROPPED  +--close--> INVALID
//!                                                        |
//!                                                        +--collect--> INVALID
//! ```

use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};

use q_common::constants::{status, MAX_IOVEC};
use q_common::{Error, PartitionId, Result, Status};
use spin::Mutex;

use crate::arena::{next_generation, ArenaKey};
use crate::fatal::{Checked, FatalError};
use crate::message::{InVec, OutVec, RHandle};
use crate::partition::ServiceRef;
use crate::rtos::ThreadId;

/// Channel processing state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    /// Slot not in use
    Invalid = 0,
    /// Open, no message outstanding
    Idle = 1,
    /// Message queued or being processed by the server
    Dispatched = 2,
    /// Server replied, client has not collected yet
    Replied = 3,
    /// Server refused the connection
    Dropped = 4,
}

impl ChannelState {
    /// Decode a raw state byte
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Invalid),
            1 => Some(Self::Idle),
            2 => Some(Self::Dispatched),
            3 => Some(Self::Replied),
            4 => Some(Self::Dropped),
            _ => None,
        }
    }

    /// State name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Invalid => "INVALID",
            Self::Idle => "IDLE",
            Self::Dispatched => "DISPATCHED",
            Self::Replied => "REPLIED",
            Self::Dropped => "DROPPED",
        }
    }
}

/// Name of a raw state byte, for diagnostics
#[must_use]
pub const fn state_name(raw: u8) -> &'static str {
    match ChannelState::from_raw(raw) {
        Some(state) => state.as_str(),
        None => "CORRUPT",
    }
}

/// Atomic channel state byte
pub struct StateCell(AtomicU8);

impl StateCell {
    /// Create a cell holding `state`
    #[must_use]
    pub const fn new(state: ChannelState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Move from `expected` to `new`, failing if the cell holds anything else
    pub fn switch(&self, expected: ChannelState, new: ChannelState) -> Checked<()> {
        self.0
            .compare_exchange(expected as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| FatalError::ChannelState {
                expected: expected as u8,
                actual,
            })
    }

    /// Fail unless the cell holds `expected`
    pub fn assert(&self, expected: ChannelState) -> Checked<()> {
        let actual = self.0.load(Ordering::Acquire);
        if actual == expected as u8 {
            Ok(())
        } else {
            Err(FatalError::ChannelState {
                expected: expected as u8,
                actual,
            })
        }
    }

    /// Current state, `None` if the byte is corrupt
    #[must_use]
    pub fn get(&self) -> Option<ChannelState> {
        ChannelState::from_raw(self.0.load(Ordering::Acquire))
    }
}

// ============================================================================
// Connection Records
// ============================================================================

/// Per-connection data shared between client and server paths
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChannelData {
    pub service: ServiceRef,
    pub client: PartitionId,
    pub client_thread: ThreadId,
    pub rhandle: RHandle,
    /// Raw message type of the outstanding message
    pub msg_type: u32,
    pub invec: [InVec; MAX_IOVEC],
    pub outvec: [OutVec; MAX_IOVEC],
    /// Bytes written per output vector by the last reply
    pub written: [u32; MAX_IOVEC],
    pub status: Status,
}

impl ChannelData {
    pub(crate) const EMPTY: Self = Self::new(ServiceRef::NONE, PartitionId::NON_SECURE, ThreadId::NONE);

    pub(crate) const fn new(service: ServiceRef, client: PartitionId, client_thread: ThreadId) -> Self {
        Self {
            service,
            client,
            client_thread,
            rhandle: RHandle::NONE,
            msg_type: 0,
            invec: [InVec::EMPTY; MAX_IOVEC],
            outvec: [OutVec::EMPTY; MAX_IOVEC],
            written: [0; MAX_IOVEC],
            status: status::SUCCESS,
        }
    }
}

/// One connection slot
pub(crate) struct ChannelSlot {
    in_use: AtomicBool,
    generation: AtomicU16,
    pub state: StateCell,
    pub data: Mutex<ChannelData>,
}

impl ChannelSlot {
    const fn new() -> Self {
        Self {
            in_use: AtomicBool::new(false),
            generation: AtomicU16::new(0),
            state: StateCell::new(ChannelState::Invalid),
            data: Mutex::new(ChannelData::EMPTY),
        }
    }
}

/// Fixed table of `N` connection slots
pub(crate) struct ChannelTable<const N: usize> {
    slots: [ChannelSlot; N],
}

impl<const N: usize> ChannelTable<N> {
    pub(crate) const fn new() -> Self {
        const EMPTY: ChannelSlot = ChannelSlot::new();
        Self { slots: [EMPTY; N] }
    }

    /// Claim a free slot for a new connection, leaving it `Idle`
    pub(crate) fn open(&self, data: ChannelData) -> Result<ArenaKey> {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot
                .in_use
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let generation = next_generation(slot.generation.load(Ordering::Acquire));
                slot.generation.store(generation, Ordering::Release);
                *slot.data.lock() = data;
                // A free slot is always INVALID, release checks it
                slot.state.0.store(ChannelState::Idle as u8, Ordering::Release);
                return Ok(ArenaKey::new(index as u16, generation));
            }
        }
        Err(Error::ResourceExhausted)
    }

    /// Resolve a key, failing if it is stale
    pub(crate) fn get(&self, key: ArenaKey) -> Checked<&ChannelSlot> {
        self.slots
            .get(key.index())
            .filter(|slot| {
                slot.in_use.load(Ordering::Acquire)
                    && slot.generation.load(Ordering::Acquire) == key.generation()
            })
            .ok_or(FatalError::StaleKey("channel"))
    }

    /// Return a slot whose state already moved to `Invalid`
    pub(crate) fn release(&self, key: ArenaKey) -> Checked<()> {
        let slot = self.get(key)?;
        slot.state.assert(ChannelState::Invalid)?;
        *slot.data.lock() = ChannelData::EMPTY;
        slot.in_use.store(false, Ordering::Release);
        Ok(())
    }

    /// Slots currently open
    pub(crate) fn open_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.in_use.load(Ordering::Acquire))
            .count()
    }
}
