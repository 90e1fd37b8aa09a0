// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! System-wide constants for the secure partition manager
//!
//! This module defines compile-time limits, reserved signal bits and the
//! PSA status and message type values used across the IPC core. Every table
//! in the SPM is statically sized from these limits.

// =============================================================================
// IPC Limits
// =============================================================================

/// Maximum number of iovecs (input plus output) in a single call
pub const MAX_IOVEC: usize = 4;

/// Default upper bound for the summed length of all iovecs in one call
pub const DEFAULT_IOVEC_BUDGET: u32 = 64 * 1024;

/// Maximum number of secure partitions in one image
pub const MAX_PARTITIONS: usize = 8;

/// Maximum number of RoT services hosted by one partition
pub const MAX_SERVICES_PER_PARTITION: usize = 8;

/// Maximum number of external SIDs one partition may call
pub const MAX_EXTERN_SIDS: usize = 8;

/// Maximum number of interrupt lines mapped to one partition
pub const MAX_IRQS_PER_PARTITION: usize = 4;

/// Maximum number of declared memory regions across all partitions
pub const MAX_MEM_REGIONS: usize = 16;

/// Maximum number of simultaneously open connections
pub const MAX_CHANNELS: usize = 32;

/// Maximum number of messages fetched but not yet replied
pub const MAX_MESSAGES: usize = 32;

/// Largest handle value the generator emits before wrapping
pub const HANDLE_MAX: i32 = i32::MAX;

/// Minor version reported for SIDs the caller cannot see
pub const VERSION_NONE: u32 = 0;

// =============================================================================
// Signals
// =============================================================================

/// Asserted once a partition thread has been registered and may run
pub const START_SIGNAL: u32 = 0x0000_0001;

/// Asserted on a client thread when its pending message was replied
pub const REPLY_SIGNAL: u32 = 0x0000_0004;

/// Asynchronous notification from a peer partition
pub const DOORBELL_SIGNAL: u32 = 0x0000_0008;

/// Bits a partition may never assign to a service or IRQ
pub const RESERVED_SIGNALS: u32 = 0x0000_000F;

// =============================================================================
// Message Types
// =============================================================================

/// Raw message type values carried in a channel record
pub mod msg_type {
    /// Client requests a new connection
    pub const CONNECT: u32 = 1;
    /// Client issues a request on an open connection
    pub const CALL: u32 = 2;
    /// Client closes a connection
    pub const DISCONNECT: u32 = 3;
}

// =============================================================================
// PSA Status Codes
// =============================================================================

/// PSA status codes returned to clients
pub mod status {
    use crate::types::Status;

    /// Operation completed successfully
    pub const SUCCESS: Status = 0;
    /// Caller broke the programming model
    pub const ERROR_PROGRAMMER_ERROR: Status = -129;
    /// Connection refused by policy or by the service
    pub const CONNECTION_REFUSED: Status = -130;
    /// Connection could not be established right now
    pub const CONNECTION_BUSY: Status = -131;
    /// Unspecified failure
    pub const ERROR_GENERIC: Status = -132;
    /// Caller not permitted to perform the operation
    pub const ERROR_NOT_PERMITTED: Status = -133;
    /// Operation not supported by the service
    pub const ERROR_NOT_SUPPORTED: Status = -134;
    /// Argument rejected by the service
    pub const ERROR_INVALID_ARGUMENT: Status = -135;
    /// Output buffer too small
    pub const ERROR_BUFFER_TOO_SMALL: Status = -138;
    /// Service ran out of memory
    pub const ERROR_INSUFFICIENT_MEMORY: Status = -141;
}
