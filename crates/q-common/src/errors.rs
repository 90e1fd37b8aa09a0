// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Error types for the Qbitel secure partition manager
//!
//! This module defines the recoverable error type shared by the SPM crates.
//! Protocol violations that must stop the image are not represented here;
//! they go through the SPM's fatal error sink instead.
//!
//! Every error maps onto a PSA status code through [`Error::status`], so a
//! recoverable failure can always be surfaced to a client through the normal
//! reply path.

use core::fmt;

use crate::constants::status;
use crate::types::Status;

/// Result type alias for SPM operations
pub type Result<T> = core::result::Result<T, Error>;

/// Unified recoverable error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // IPC Errors (0x01xx)
    // =========================================================================
    /// Connection refused by policy or by the service
    ConnectionRefused,
    /// No connection slot available right now
    ConnectionBusy,
    /// Fixed-capacity pool is exhausted
    ResourceExhausted,
    /// Operation would block
    WouldBlock,

    // =========================================================================
    // Partition Errors (0x02xx)
    // =========================================================================
    /// No partition with the requested id
    PartitionNotFound,
    /// No RoT service with the requested SID
    ServiceNotFound,
    /// Partition id registered twice
    DuplicatePartition,
    /// SID registered twice
    DuplicateService,
    /// Signal is not a single free, non-reserved bit
    InvalidSignal,
    /// Partition thread could not be created
    TaskCreationFailed,
    /// Partition mutex could not be created
    MutexCreationFailed,
    /// Partition thread already started
    PartitionAlreadyStarted,

    // =========================================================================
    // Memory Errors (0x03xx)
    // =========================================================================
    /// Memory allocation failed
    MemoryAllocationFailed,
    /// Memory layout windows are empty, overflow or overlap
    InvalidMemoryLayout,
    /// Region would break the grouping of the region table by partition
    RegionOrdering,
    /// Address range is not backed by any memory bank
    MemoryAccessViolation,

    // =========================================================================
    // General Errors (0xFFxx)
    // =========================================================================
    /// Buffer is too small for operation
    BufferTooSmall,
    /// Invalid parameter provided
    InvalidParameter,
    /// Operation timed out
    Timeout,
    /// Operation not permitted
    NotPermitted,
    /// Feature not supported
    NotSupported,
    /// Internal error (should not occur)
    InternalError,
    /// Invalid state for the operation
    InvalidState,
    /// Requested item not found
    NotFound,
}

impl Error {
    /// Get the error code for this error
    ///
    /// Error codes are organized by category:
    /// - 0x01xx: IPC errors
    /// - 0x02xx: Partition errors
    /// - 0x03xx: Memory errors
    /// - 0xFFxx: General errors
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            // IPC errors (0x01xx)
            Self::ConnectionRefused => 0x0101,
            Self::ConnectionBusy => 0x0102,
            Self::ResourceExhausted => 0x0103,
            Self::WouldBlock => 0x0104,

            // Partition errors (0x02xx)
            Self::PartitionNotFound => 0x0201,
            Self::ServiceNotFound => 0x0202,
            Self::DuplicatePartition => 0x0203,
            Self::DuplicateService => 0x0204,
            Self::InvalidSignal => 0x0205,
            Self::TaskCreationFailed => 0x0206,
            Self::MutexCreationFailed => 0x0207,
            Self::PartitionAlreadyStarted => 0x0208,

            // Memory errors (0x03xx)
            Self::MemoryAllocationFailed => 0x0301,
            Self::InvalidMemoryLayout => 0x0302,
            Self::RegionOrdering => 0x0303,
            Self::MemoryAccessViolation => 0x0304,

            // General errors (0xFFxx)
            Self::BufferTooSmall => 0xFF01,
            Self::InvalidParameter => 0xFF02,
            Self::Timeout => 0xFF03,
            Self::NotPermitted => 0xFF04,
            Self::NotSupported => 0xFF05,
            Self::InternalError => 0xFFFF,
            Self::InvalidState => 0xFF06,
            Self::NotFound => 0xFF07,
        }
    }

    /// PSA status code reported to a client for this error
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::ConnectionRefused | Self::ServiceNotFound => status::CONNECTION_REFUSED,
            Self::ConnectionBusy | Self::WouldBlock => status::CONNECTION_BUSY,
            Self::ResourceExhausted | Self::MemoryAllocationFailed => {
                status::ERROR_INSUFFICIENT_MEMORY
            }
            Self::BufferTooSmall => status::ERROR_BUFFER_TOO_SMALL,
            Self::InvalidParameter | Self::InvalidSignal | Self::RegionOrdering => {
                status::ERROR_INVALID_ARGUMENT
            }
            Self::NotPermitted | Self::MemoryAccessViolation => status::ERROR_NOT_PERMITTED,
            Self::NotSupported => status::ERROR_NOT_SUPPORTED,
            _ => status::ERROR_GENERIC,
        }
    }

    /// Check if this error is a connection-time refusal
    #[must_use]
    pub const fn is_refusal(&self) -> bool {
        matches!(self, Self::ConnectionRefused | Self::ConnectionBusy)
    }

    /// Get a short description of the error
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::ConnectionRefused => "connection refused",
            Self::ConnectionBusy => "connection busy",
            Self::ResourceExhausted => "resource exhausted",
            Self::WouldBlock => "would block",
            Self::PartitionNotFound => "partition not found",
            Self::ServiceNotFound => "service not found",
            Self::DuplicatePartition => "duplicate partition id",
            Self::DuplicateService => "duplicate SID",
            Self::InvalidSignal => "invalid signal",
            Self::TaskCreationFailed => "task creation failed",
            Self::MutexCreationFailed => "mutex creation failed",
            Self::PartitionAlreadyStarted => "partition already started",
            Self::MemoryAllocationFailed => "memory allocation failed",
            Self::InvalidMemoryLayout => "invalid memory layout",
            Self::RegionOrdering => "region table not grouped by partition",
            Self::MemoryAccessViolation => "memory access violation",
            Self::BufferTooSmall => "buffer too small",
            Self::InvalidParameter => "invalid parameter",
            Self::Timeout => "timeout",
            Self::NotPermitted => "not permitted",
            Self::NotSupported => "not supported",
            Self::InternalError => "internal error",
            Self::InvalidState => "invalid state",
            Self::NotFound => "not found",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:04X}] {}", self.code(), self.description())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "[0x{:04X}] {}", self.code(), self.description());
    }
}
