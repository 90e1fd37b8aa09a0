// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Fatal protocol violations
//!
//! A fatal error means a partition broke the IPC contract: it used a handle
//! it does not own, replied twice, passed a pointer outside its domain, and
//! so on. Once that happens the shared handle and channel tables can no
//! longer be trusted, so there is no recovery path. [`halt`] never returns.
//!
//! On target images the panic reaches the image's panic handler, which
//! records fault state and resets. On the host it unwinds the offending
//! thread, which is what the `should_panic` tests rely on.

use core::fmt;

use q_common::{Addr, Handle, PartitionId, Sid, Status};

use crate::channel::state_name;

/// Every violation that halts the SPM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// Operation on the null handle
    NullHandle,
    /// Handle does not name a live slot
    HandleNotFound(Handle),
    /// Destroy attempted by a partition other than the owner
    HandleNotOwned {
        /// Offending handle
        handle: Handle,
        /// Resolved caller
        caller: PartitionId,
    },
    /// Lookup by a partition that is neither owner nor friend
    HandleAccessDenied {
        /// Offending handle
        handle: Handle,
        /// Resolved caller
        caller: PartitionId,
    },
    /// Live handle coupled to no memory object
    CorruptHandleSlot(Handle),
    /// Channel state compare-and-swap observed an unexpected state
    ChannelState {
        /// State the caller required
        expected: u8,
        /// State actually found
        actual: u8,
    },
    /// Channel record carries an unknown message type
    UnknownMessageType(u32),
    /// Iovec range lies outside the caller's security domain
    BufferOutOfDomain {
        /// Start of the range
        base: Addr,
        /// Length of the range
        len: u32,
        /// Domain the range was checked against
        caller: PartitionId,
    },
    /// Summed iovec lengths exceed the configured budget
    IovecBudget {
        /// Summed length of all vectors
        total: u64,
        /// Configured budget
        budget: u32,
    },
    /// More vectors than `MAX_IOVEC`
    TooManyIovecs {
        /// Input vector count
        inputs: usize,
        /// Output vector count
        outputs: usize,
    },
    /// Iovec index out of range
    IovecIndex(usize),
    /// Iovec access on a message that is not a CALL
    NotACall(u32),
    /// Signal not owned by the calling partition
    UnknownSignal(u32),
    /// Mask passed where exactly one signal is required
    SignalNotSingleBit(u32),
    /// Fetch on a signal with no queued message
    NoPendingMessage(u32),
    /// CONNECT replied with neither success nor refusal
    InvalidConnectStatus(Status),
    /// Partition connected to a SID outside its external list
    SidNotPermitted {
        /// Requested service
        sid: Sid,
        /// Resolved caller
        caller: PartitionId,
    },
    /// Partition id not registered
    UnknownPartition(PartitionId),
    /// Target partition has no thread yet
    PartitionNotRunning(PartitionId),
    /// Bound SID is not hosted by the serving partition
    ServiceNotHosted(Sid),
    /// Handler could not be bound to the serving partition's dispatcher
    BindingRejected(Sid),
    /// Server API called from a thread that is not a partition
    NotAPartition,
    /// Doorbell cleared while not asserted
    DoorbellNotAsserted(PartitionId),
    /// End of interrupt for a signal the partition does not own
    IrqNotOwned(u32),
    /// End of interrupt for a signal that is not asserted
    IrqNotAsserted(u32),
    /// Pool ran out where the sizing guarantees it cannot
    PoolExhausted(&'static str),
    /// Validated range has no backing memory
    UnmappedMemory {
        /// Start of the range
        addr: Addr,
        /// Length of the range
        len: u32,
    },
    /// Arena key no longer names a live object
    StaleKey(&'static str),
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullHandle => write!(f, "operation on null handle"),
            Self::HandleNotFound(h) => write!(f, "handle {h} not found"),
            Self::HandleNotOwned { handle, caller } => {
                write!(f, "handle {handle} not owned by {caller}")
            }
            Self::HandleAccessDenied { handle, caller } => {
                write!(f, "handle {handle} not accessible to {caller}")
            }
            Self::CorruptHandleSlot(h) => write!(f, "handle {h} has no memory object"),
            Self::ChannelState { expected, actual } => write!(
                f,
                "channel state {} (expected {})",
                state_name(*actual),
                state_name(*expected)
            ),
            Self::UnknownMessageType(t) => write!(f, "unknown message type {t}"),
            Self::BufferOutOfDomain { base, len, caller } => write!(
                f,
                "buffer 0x{base:08X}+{len} outside the caller's domain ({caller})"
            ),
            Self::IovecBudget { total, budget } => {
                write!(f, "iovec total {total} exceeds budget {budget}")
            }
            Self::TooManyIovecs { inputs, outputs } => {
                write!(f, "too many iovecs ({inputs} in, {outputs} out)")
            }
            Self::IovecIndex(i) => write!(f, "iovec index {i} out of range"),
            Self::NotACall(t) => write!(f, "iovec access on message type {t}"),
            Self::UnknownSignal(s) => write!(f, "signal 0x{s:08X} not owned by partition"),
            Self::SignalNotSingleBit(s) => write!(f, "signal mask 0x{s:08X} is not a single bit"),
            Self::NoPendingMessage(s) => write!(f, "no message pending on signal 0x{s:08X}"),
            Self::InvalidConnectStatus(s) => write!(f, "invalid connect reply status {s}"),
            Self::SidNotPermitted { sid, caller } => {
                write!(f, "{sid} not permitted for {caller}")
            }
            Self::UnknownPartition(p) => write!(f, "unknown partition {p}"),
            Self::PartitionNotRunning(p) => write!(f, "partition {p} not running"),
            Self::ServiceNotHosted(sid) => write!(f, "{sid} not hosted by serving partition"),
            Self::BindingRejected(sid) => write!(f, "handler for {sid} could not be bound"),
            Self::NotAPartition => write!(f, "caller is not a partition"),
            Self::DoorbellNotAsserted(p) => write!(f, "doorbell of {p} not asserted"),
            Self::IrqNotOwned(s) => write!(f, "irq signal 0x{s:08X} not owned"),
            Self::IrqNotAsserted(s) => write!(f, "irq signal 0x{s:08X} not asserted"),
            Self::PoolExhausted(pool) => write!(f, "{pool} pool exhausted"),
            Self::UnmappedMemory { addr, len } => {
                write!(f, "no memory behind 0x{addr:08X}+{len}")
            }
            Self::StaleKey(kind) => write!(f, "stale {kind} key"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for FatalError {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}", defmt::Debug2Format(self));
    }
}

/// Outcome of a table operation that fails only on a protocol violation
///
/// The SPM context turns an `Err` into a logged halt.
pub type Checked<T> = core::result::Result<T, FatalError>;

/// Snapshot of a fatal error for post-mortem inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatalRecord {
    /// The violation
    pub error: FatalError,
    /// Partition that was running
    pub partition: PartitionId,
    /// Tick count when it was detected
    pub ticks: u64,
}

/// Stop execution on a fatal protocol violation
#[cold]
#[track_caller]
pub fn halt(error: FatalError) -> ! {
    panic!("SPM fatal error: {error}")
}
