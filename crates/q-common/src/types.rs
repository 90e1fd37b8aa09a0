// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Common types for the secure partition manager
//!
//! This module defines the identifiers that cross every IPC boundary:
//! partition ids, service ids, handles, addresses and status codes.

use core::fmt;

/// 32-bit address in the target's address space
pub type Addr = u32;

/// PSA status code (negative values are errors)
pub type Status = i32;

/// Bit mask of partition signals
pub type SignalMask = u32;

/// Partition identifier
///
/// Secure partitions have non-negative ids. The reserved
/// [`PartitionId::NON_SECURE`] value names every caller that is not a
/// registered partition thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId(pub i32);

impl PartitionId {
    /// Identity of the non-secure processing environment
    pub const NON_SECURE: Self = Self(-1);

    /// Create a partition id
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Raw id value
    #[must_use]
    pub const fn raw(&self) -> i32 {
        self.0
    }

    /// Check if this id names a secure partition
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_secure() {
            write!(f, "P{}", self.0)
        } else {
            write!(f, "NSPE")
        }
    }
}

/// RoT service identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sid(pub u32);

impl Sid {
    /// Create a service id
    #[must_use]
    pub const fn new(sid: u32) -> Self {
        Self(sid)
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SID 0x{:08X}", self.0)
    }
}

/// Opaque connection or message handle
///
/// Live handles are strictly positive; zero is the null handle and negative
/// values are reserved for status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub i32);

impl Handle {
    /// The null handle
    pub const NULL: Self = Self(0);

    /// Raw handle value
    #[must_use]
    pub const fn raw(&self) -> i32 {
        self.0
    }

    /// Check if this is the null handle
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Check that a signal mask has exactly one bit set
#[must_use]
pub const fn is_single_signal(mask: SignalMask) -> bool {
    mask.is_power_of_two()
}
