// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! RTOS collaborator interface
//!
//! The SPM does not schedule anything itself. It needs the surrounding RTOS
//! for exactly these primitives:
//!
//! - thread creation and the identity of the running thread
//! - mutex creation (one per partition, for the partition's own state)
//! - per-thread event flags with a blocking "wait for any" primitive
//! - a monotonic tick counter for log timestamps

use q_common::Result;

/// RTOS thread identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u32);

impl ThreadId {
    /// No thread (used for "not started")
    pub const NONE: ThreadId = ThreadId(0);

    /// Check if this is a valid thread ID
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

/// RTOS mutex identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexId(pub u32);

impl MutexId {
    /// No mutex
    pub const NONE: MutexId = MutexId(0);
}

/// Thread priority levels (lower number = higher priority)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum ThreadPriority {
    /// Highest priority - real-time critical
    RealTime = 0,
    /// High priority - system services
    High = 1,
    /// Normal priority - most partitions
    #[default]
    Normal = 2,
    /// Low priority - background partitions
    Low = 3,
    /// Idle priority - only runs when nothing else can
    Idle = 4,
}

impl From<u8> for ThreadPriority {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::RealTime,
            1 => Self::High,
            2 => Self::Normal,
            3 => Self::Low,
            _ => Self::Idle,
        }
    }
}

/// Attributes of a thread to create
#[derive(Debug, Clone, Copy)]
pub struct ThreadAttrs {
    /// Thread name
    pub name: &'static str,
    /// Stack size in bytes
    pub stack_size: usize,
    /// Scheduling priority
    pub priority: ThreadPriority,
}

/// Attributes of a mutex to create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexAttrs {
    /// Owner may lock recursively
    pub recursive: bool,
    /// Owner inherits the priority of blocked waiters
    pub priority_inherit: bool,
    /// Released automatically if the owner terminates
    pub robust: bool,
}

impl MutexAttrs {
    /// Attributes used for every partition mutex
    pub const PARTITION: Self = Self {
        recursive: true,
        priority_inherit: true,
        robust: true,
    };
}

/// How long a wait may block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Return immediately
    Poll,
    /// Block until a flag is set
    Block,
    /// Block for at most this many ticks
    Ticks(u32),
}

/// Primitives the SPM consumes from the RTOS
///
/// Event flags are per thread and persist until cleared. `wait_any` never
/// clears flags; the SPM clears them explicitly so that a flag can only
/// drop while the state it reports is locked.
pub trait Rtos: Send + Sync {
    /// Create a thread running `entry`
    ///
    /// # Errors
    /// Returns `Error::TaskCreationFailed` if the thread cannot be created.
    fn spawn<F>(&self, attrs: &ThreadAttrs, entry: F) -> Result<ThreadId>
    where
        F: FnOnce() + Send + 'static;

    /// Identity of the calling thread
    fn current_thread(&self) -> ThreadId;

    /// Create a mutex
    ///
    /// # Errors
    /// Returns `Error::MutexCreationFailed` if the mutex cannot be created.
    fn create_mutex(&self, attrs: &MutexAttrs) -> Result<MutexId>;

    /// Set flags on a thread, waking it if it waits on any of them
    fn set_flags(&self, thread: ThreadId, flags: u32);

    /// Clear flags of the calling thread, returning the flags before clearing
    fn clear_flags(&self, flags: u32) -> u32;

    /// Current flags of the calling thread
    fn flags(&self) -> u32;

    /// Wait until any flag in `mask` is set on the calling thread
    ///
    /// Returns the set flags within `mask`, which is zero on timeout.
    fn wait_any(&self, mask: u32, timeout: Timeout) -> u32;

    /// Monotonic tick counter
    fn ticks(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_from_u8() {
        assert_eq!(ThreadPriority::from(0), ThreadPriority::RealTime);
        assert_eq!(ThreadPriority::from(2), ThreadPriority::Normal);
        assert_eq!(ThreadPriority::from(200), ThreadPriority::Idle);
        assert!(ThreadPriority::High < ThreadPriority::Low);
    }

    #[test]
    fn test_thread_id_validity() {
        assert!(!ThreadId::NONE.is_valid());
        assert!(ThreadId(3).is_valid());
    }
}
