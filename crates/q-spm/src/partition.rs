// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Partition registry
//!
//! Partitions and their RoT services are described by static tables and
//! registered once at boot. After boot the registry is read-only except for
//! the thread and mutex ids recorded when a partition starts, and the
//! service queues, which have their own locks.
//!
//! Identity resolution is a linear scan comparing thread ids: O(number of
//! partitions), no allocation, never blocks.

use core::sync::atomic::{AtomicU32, Ordering};

use heapless::{Deque, Vec};
use q_common::constants::{
    DOORBELL_SIGNAL, MAX_CHANNELS, MAX_EXTERN_SIDS, MAX_IRQS_PER_PARTITION,
    MAX_SERVICES_PER_PARTITION, RESERVED_SIGNALS,
};
use q_common::{is_single_signal, Error, MinorVersionPolicy, PartitionId, Result, Sid, SignalMask};
use spin::Mutex;

use crate::arena::ArenaKey;
use crate::rtos::{MutexId, ThreadId, ThreadPriority};

/// RoT service descriptor
pub struct RotService {
    /// Service identifier
    pub sid: Sid,
    /// Signal asserted on the hosting partition while messages are queued
    pub signal: SignalMask,
    /// Minor version the service implements
    pub minor_version: u32,
    /// Version matching policy
    pub policy: MinorVersionPolicy,
    /// Whether non-secure callers may connect
    pub allow_nspe: bool,
    queue: Mutex<Deque<ArenaKey, MAX_CHANNELS>>,
}

impl RotService {
    /// Create a descriptor
    #[must_use]
    pub const fn new(
        sid: Sid,
        signal: SignalMask,
        minor_version: u32,
        policy: MinorVersionPolicy,
        allow_nspe: bool,
    ) -> Self {
        Self {
            sid,
            signal,
            minor_version,
            policy,
            allow_nspe,
            queue: Mutex::new(Deque::new()),
        }
    }

    /// Number of queued messages
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Queue a channel and run `signal` while the queue is still locked
    pub(crate) fn enqueue(&self, channel: ArenaKey, signal: impl FnOnce()) -> Result<()> {
        let mut queue = self.queue.lock();
        queue
            .push_back(channel)
            .map_err(|_| Error::ResourceExhausted)?;
        signal();
        Ok(())
    }

    /// Pop the oldest channel; `drained` runs under the lock if the queue
    /// became empty
    pub(crate) fn dequeue(&self, drained: impl FnOnce()) -> Option<ArenaKey> {
        let mut queue = self.queue.lock();
        let head = queue.pop_front();
        if queue.is_empty() {
            drained();
        }
        head
    }
}

impl core::fmt::Debug for RotService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RotService")
            .field("sid", &self.sid)
            .field("signal", &self.signal)
            .field("minor_version", &self.minor_version)
            .field("policy", &self.policy)
            .field("allow_nspe", &self.allow_nspe)
            .finish_non_exhaustive()
    }
}

/// Interrupt line routed to a partition signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqMapping {
    /// Interrupt line number
    pub line: u32,
    /// Signal asserted when the line fires
    pub signal: SignalMask,
}

/// Index of a service within the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceRef {
    partition: u8,
    service: u8,
}

impl ServiceRef {
    pub(crate) const NONE: Self = Self {
        partition: u8::MAX,
        service: u8::MAX,
    };
}

/// A secure partition
#[derive(Debug)]
pub struct Partition {
    /// Partition id
    pub id: PartitionId,
    /// Name, also used for the thread
    pub name: &'static str,
    /// Thread priority
    pub priority: ThreadPriority,
    services: Vec<RotService, MAX_SERVICES_PER_PARTITION>,
    extern_sids: Vec<Sid, MAX_EXTERN_SIDS>,
    irqs: Vec<IrqMapping, MAX_IRQS_PER_PARTITION>,
    thread: AtomicU32,
    mutex: AtomicU32,
}

impl Partition {
    /// Create a partition with no services
    #[must_use]
    pub const fn new(id: PartitionId, name: &'static str, priority: ThreadPriority) -> Self {
        Self {
            id,
            name,
            priority,
            services: Vec::new(),
            extern_sids: Vec::new(),
            irqs: Vec::new(),
            thread: AtomicU32::new(ThreadId::NONE.0),
            mutex: AtomicU32::new(MutexId::NONE.0),
        }
    }

    /// Host a RoT service
    ///
    /// # Errors
    /// - `Error::InvalidSignal` if the signal is not a single free bit
    /// - `Error::DuplicateService` if the SID is already hosted here
    /// - `Error::ResourceExhausted` if the service table is full
    pub fn add_service(&mut self, service: RotService) -> Result<()> {
        self.claim_signal(service.signal)?;
        if self.find_service(service.sid).is_some() {
            return Err(Error::DuplicateService);
        }
        self.services
            .push(service)
            .map_err(|_| Error::ResourceExhausted)
    }

    /// Permit calls to an external SID
    ///
    /// # Errors
    /// Returns `Error::ResourceExhausted` if the list is full.
    pub fn allow_sid(&mut self, sid: Sid) -> Result<()> {
        if self.extern_sids.contains(&sid) {
            return Ok(());
        }
        self.extern_sids
            .push(sid)
            .map_err(|_| Error::ResourceExhausted)
    }

    /// Route an interrupt line to a signal
    ///
    /// # Errors
    /// - `Error::InvalidSignal` if the signal is not a single free bit
    /// - `Error::InvalidParameter` if the line is already mapped here
    /// - `Error::ResourceExhausted` if the IRQ table is full
    pub fn add_irq(&mut self, line: u32, signal: SignalMask) -> Result<()> {
        self.claim_signal(signal)?;
        if self.irqs.iter().any(|irq| irq.line == line) {
            return Err(Error::InvalidParameter);
        }
        self.irqs
            .push(IrqMapping { line, signal })
            .map_err(|_| Error::ResourceExhausted)
    }

    fn claim_signal(&self, signal: SignalMask) -> Result<()> {
        if !is_single_signal(signal) || signal & RESERVED_SIGNALS != 0 {
            return Err(Error::InvalidSignal);
        }
        if self.signal_mask() & signal != 0 {
            return Err(Error::InvalidSignal);
        }
        Ok(())
    }

    /// Hosted services
    #[must_use]
    pub fn services(&self) -> &[RotService] {
        &self.services
    }

    /// External SIDs this partition may call
    #[must_use]
    pub fn extern_sids(&self) -> &[Sid] {
        &self.extern_sids
    }

    /// Interrupt mappings
    #[must_use]
    pub fn irqs(&self) -> &[IrqMapping] {
        &self.irqs
    }

    /// Find a hosted service by SID
    #[must_use]
    pub fn find_service(&self, sid: Sid) -> Option<&RotService> {
        self.services.iter().find(|s| s.sid == sid)
    }

    /// Find a hosted service by its signal
    #[must_use]
    pub fn service_for_signal(&self, signal: SignalMask) -> Option<&RotService> {
        self.services.iter().find(|s| s.signal == signal)
    }

    /// Find an interrupt mapping by its signal
    #[must_use]
    pub fn irq_for_signal(&self, signal: SignalMask) -> Option<&IrqMapping> {
        self.irqs.iter().find(|irq| irq.signal == signal)
    }

    /// Signals of all hosted services
    #[must_use]
    pub fn service_mask(&self) -> SignalMask {
        self.services.iter().fold(0, |mask, s| mask | s.signal)
    }

    /// Signals of all interrupt mappings
    #[must_use]
    pub fn irq_mask(&self) -> SignalMask {
        self.irqs.iter().fold(0, |mask, irq| mask | irq.signal)
    }

    /// Every signal this partition may wait on
    #[must_use]
    pub fn signal_mask(&self) -> SignalMask {
        self.service_mask() | self.irq_mask() | DOORBELL_SIGNAL
    }

    /// Check if the partition may connect to `sid`
    #[must_use]
    pub fn may_call(&self, sid: Sid) -> bool {
        self.extern_sids.contains(&sid)
    }

    /// Thread running this partition, `NONE` before start
    #[must_use]
    pub fn thread(&self) -> ThreadId {
        ThreadId(self.thread.load(Ordering::Acquire))
    }

    /// Mutex owned by this partition, `NONE` before start
    #[must_use]
    pub fn mutex(&self) -> MutexId {
        MutexId(self.mutex.load(Ordering::Acquire))
    }

    /// Check if the partition thread was started
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread().is_valid()
    }

    /// Record the thread and mutex created at start
    pub(crate) fn attach(&self, thread: ThreadId, mutex: MutexId) -> Result<()> {
        if !thread.is_valid() {
            return Err(Error::InvalidParameter);
        }
        self.thread
            .compare_exchange(ThreadId::NONE.0, thread.0, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::PartitionAlreadyStarted)?;
        self.mutex.store(mutex.0, Ordering::Release);
        Ok(())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Table of registered partitions
pub struct PartitionRegistry<const N: usize> {
    partitions: Vec<Partition, N>,
}

impl<const N: usize> PartitionRegistry<N> {
    /// Create an empty registry
    #[must_use]
    pub const fn new() -> Self {
        Self {
            partitions: Vec::new(),
        }
    }

    /// Register a partition at boot
    ///
    /// # Errors
    /// - `Error::InvalidParameter` for a negative id
    /// - `Error::DuplicatePartition` if the id is taken
    /// - `Error::DuplicateService` if a hosted SID is already registered
    /// - `Error::ResourceExhausted` if the registry is full
    pub fn register(&mut self, partition: Partition) -> Result<()> {
        if !partition.id.is_secure() {
            return Err(Error::InvalidParameter);
        }
        if self.get(partition.id).is_some() {
            return Err(Error::DuplicatePartition);
        }
        if partition
            .services()
            .iter()
            .any(|s| self.find_service(s.sid).is_some())
        {
            return Err(Error::DuplicateService);
        }
        self.partitions
            .push(partition)
            .map_err(|_| Error::ResourceExhausted)
    }

    /// Look up a partition by id
    #[must_use]
    pub fn get(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.id == id)
    }

    /// Partition whose thread is `thread`
    #[must_use]
    pub fn by_thread(&self, thread: ThreadId) -> Option<&Partition> {
        if !thread.is_valid() {
            return None;
        }
        self.partitions.iter().find(|p| p.thread() == thread)
    }

    /// Find the partition hosting `sid`
    #[must_use]
    pub fn find_service(&self, sid: Sid) -> Option<(&Partition, &RotService)> {
        self.partitions
            .iter()
            .find_map(|p| p.find_service(sid).map(|s| (p, s)))
    }

    /// Registry index of the service hosting `sid`
    #[must_use]
    pub fn service_ref(&self, sid: Sid) -> Option<ServiceRef> {
        self.partitions.iter().enumerate().find_map(|(pi, p)| {
            p.services()
                .iter()
                .position(|s| s.sid == sid)
                .map(|si| ServiceRef {
                    partition: pi as u8,
                    service: si as u8,
                })
        })
    }

    /// Resolve a [`ServiceRef`]
    #[must_use]
    pub fn service(&self, service: ServiceRef) -> Option<(&Partition, &RotService)> {
        let partition = self.partitions.get(usize::from(service.partition))?;
        let rot = partition.services().get(usize::from(service.service))?;
        Some((partition, rot))
    }

    /// Partition with an interrupt mapping for `line`
    #[must_use]
    pub fn by_irq_line(&self, line: u32) -> Option<(&Partition, &IrqMapping)> {
        self.partitions
            .iter()
            .find_map(|p| p.irqs().iter().find(|irq| irq.line == line).map(|irq| (p, irq)))
    }

    /// Iterate over partitions
    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter()
    }

    /// Number of partitions
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// Check if no partition is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

impl<const N: usize> Default for PartitionRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}
