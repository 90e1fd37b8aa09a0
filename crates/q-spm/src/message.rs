// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Message types
//!
//! A [`Message`] is what a server partition receives from `get`: the message
//! type, the message handle used for all further operations, the attached
//! `rhandle`, the declared iovec sizes and the resolved client identity.

use q_common::constants::{msg_type, MAX_IOVEC};
use q_common::{Addr, Handle, PartitionId};

use crate::arena::ArenaKey;

/// Kind of message delivered to a RoT service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    /// New connection request
    Connect = msg_type::CONNECT,
    /// Request on an open connection
    Call = msg_type::CALL,
    /// Connection closed by the client
    Disconnect = msg_type::DISCONNECT,
}

impl MessageType {
    /// Decode a raw message type
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            msg_type::CONNECT => Some(Self::Connect),
            msg_type::CALL => Some(Self::Call),
            msg_type::DISCONNECT => Some(Self::Disconnect),
            _ => None,
        }
    }

    /// Raw value
    #[must_use]
    pub const fn raw(self) -> u32 {
        self as u32
    }
}

/// Client input vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InVec {
    /// Start address in the client's domain
    pub base: Addr,
    /// Length in bytes
    pub len: u32,
}

impl InVec {
    /// Empty vector
    pub const EMPTY: Self = Self { base: 0, len: 0 };

    /// Create an input vector
    #[must_use]
    pub const fn new(base: Addr, len: u32) -> Self {
        Self { base, len }
    }
}

/// Client output vector
///
/// After `call` returns, `len` holds the number of bytes the server wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutVec {
    /// Start address in the client's domain
    pub base: Addr,
    /// Capacity on entry, bytes written on return
    pub len: u32,
}

impl OutVec {
    /// Empty vector
    pub const EMPTY: Self = Self { base: 0, len: 0 };

    /// Create an output vector
    #[must_use]
    pub const fn new(base: Addr, len: u32) -> Self {
        Self { base, len }
    }
}

/// Opaque server state attached to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RHandle(pub u32);

impl RHandle {
    /// Nothing attached
    pub const NONE: Self = Self(0);

    /// Check if nothing is attached
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// Arena key packed by `From<ArenaKey>`
    #[must_use]
    pub const fn key(&self) -> Option<ArenaKey> {
        ArenaKey::from_raw(self.0)
    }
}

impl From<ArenaKey> for RHandle {
    fn from(key: ArenaKey) -> Self {
        Self(key.to_raw())
    }
}

/// Message as seen by a server partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    /// Message type
    pub msg_type: MessageType,
    /// Message handle, valid until reply
    pub handle: Handle,
    /// Server state attached to the connection
    pub rhandle: RHandle,
    /// Declared input vector lengths
    pub in_size: [u32; MAX_IOVEC],
    /// Declared output vector capacities
    pub out_size: [u32; MAX_IOVEC],
    /// Resolved client identity
    pub client: PartitionId,
}

/// Book-keeping for a fetched but unreplied message
#[derive(Debug, Clone, Copy)]
pub(crate) struct ActiveMessage {
    pub channel: ArenaKey,
    pub msg_type: MessageType,
    /// Bytes consumed by read/skip per input vector
    pub consumed: [u32; MAX_IOVEC],
    /// Bytes produced by write per output vector
    pub written: [u32; MAX_IOVEC],
}

impl ActiveMessage {
    pub(crate) const fn new(channel: ArenaKey, msg_type: MessageType) -> Self {
        Self {
            channel,
            msg_type,
            consumed: [0; MAX_IOVEC],
            written: [0; MAX_IOVEC],
        }
    }
}
