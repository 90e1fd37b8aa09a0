// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! SPM context
//!
//! [`Spm`] owns every table the IPC core needs: the partition registry, the
//! declared memory regions, the channel records, the in-flight messages and
//! the two handle tables that expose channels to clients and messages to
//! servers. It is built and populated once at boot, then shared (typically in
//! an `Arc`) by every partition thread and the non-secure caller.
//!
//! The client API lives in `client.rs`, the server API in `server.rs` and the
//! dispatch loop in [`crate::engine`]; all of them are `impl` blocks on this
//! type.

use q_common::constants::{MAX_CHANNELS, MAX_MEM_REGIONS, MAX_MESSAGES, MAX_PARTITIONS};
use q_common::log::LogBuffer;
use q_common::{log_error, log_info};
use q_common::{Addr, Error, PartitionId, Result, SpmConfig};
use spin::Mutex;

use crate::arena::{Arena, ArenaKey};
use crate::channel::{ChannelSlot, ChannelTable};
use crate::fatal::{halt, Checked, FatalError, FatalRecord};
use crate::handles::HandleManager;
use crate::memory::Memory;
use crate::message::ActiveMessage;
use crate::partition::{Partition, PartitionRegistry};
use crate::regions::{AccessContext, MemoryRegion, RegionQuery, RegionTable, RegionValidator};
use crate::rtos::{MutexId, Rtos, ThreadId};

/// Secure Partition Manager context
pub struct Spm<R: Rtos, M: Memory> {
    pub(crate) config: SpmConfig,
    pub(crate) rtos: R,
    pub(crate) memory: M,
    pub(crate) validator: RegionValidator,
    pub(crate) regions: RegionTable<MAX_MEM_REGIONS>,
    pub(crate) partitions: PartitionRegistry<MAX_PARTITIONS>,
    pub(crate) channels: ChannelTable<MAX_CHANNELS>,
    /// Client-facing handles, one per open connection
    pub(crate) channel_handles: HandleManager<MAX_CHANNELS>,
    pub(crate) messages: Mutex<Arena<ActiveMessage, MAX_MESSAGES>>,
    /// Server-facing handles, one per fetched message
    pub(crate) message_handles: HandleManager<MAX_MESSAGES>,
    log: Mutex<LogBuffer>,
}

impl<R: Rtos, M: Memory> Spm<R, M> {
    /// Create an SPM context with empty tables
    ///
    /// # Errors
    /// Returns the error of [`SpmConfig::validate`] if the configuration is
    /// unusable.
    pub fn new(config: SpmConfig, rtos: R, memory: M) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            validator: RegionValidator::new(config.layout),
            log: Mutex::new(LogBuffer::with_level(config.log_level)),
            config,
            rtos,
            memory,
            regions: RegionTable::new(),
            partitions: PartitionRegistry::new(),
            channels: ChannelTable::new(),
            channel_handles: HandleManager::new(),
            messages: Mutex::new(Arena::new()),
            message_handles: HandleManager::new(),
        })
    }

    // ========================================================================
    // Boot
    // ========================================================================

    /// Register a partition
    ///
    /// # Errors
    /// See [`PartitionRegistry::register`].
    pub fn register_partition(&mut self, partition: Partition) -> Result<()> {
        let id = partition.id;
        let name = partition.name;
        let services = partition.services().len();
        self.partitions.register(partition)?;

        let ticks = self.rtos.ticks();
        let log = self.log.get_mut();
        log_info!(log, ticks, id, "spm", "registered {} ({} services)", name, services);
        Ok(())
    }

    /// Declare a memory region of a registered partition
    ///
    /// # Errors
    /// - `Error::PartitionNotFound` if the partition is not registered
    /// - See [`RegionTable::add`] for the rest
    pub fn add_region(&mut self, region: MemoryRegion) -> Result<()> {
        if self.partitions.get(region.partition).is_none() {
            return Err(Error::PartitionNotFound);
        }
        self.regions.add(region)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Active configuration
    pub fn config(&self) -> &SpmConfig {
        &self.config
    }

    /// RTOS collaborator
    pub fn rtos(&self) -> &R {
        &self.rtos
    }

    /// Memory collaborator
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Two-domain buffer validator
    pub fn validator(&self) -> &RegionValidator {
        &self.validator
    }

    /// Declared memory regions
    pub fn regions(&self) -> &RegionTable<MAX_MEM_REGIONS> {
        &self.regions
    }

    /// Partition registry
    pub fn partitions(&self) -> &PartitionRegistry<MAX_PARTITIONS> {
        &self.partitions
    }

    /// Partition running on the calling thread, `None` for non-secure callers
    pub fn active_partition(&self) -> Option<&Partition> {
        self.partitions.by_thread(self.rtos.current_thread())
    }

    /// Identity of the calling thread
    pub fn current_partition_id(&self) -> PartitionId {
        self.active_partition()
            .map_or(PartitionId::NON_SECURE, |p| p.id)
    }

    /// Number of open connections
    pub fn live_connections(&self) -> usize {
        self.channels.open_count()
    }

    /// Inspect the SPM log
    pub fn with_log<T>(&self, f: impl FnOnce(&LogBuffer) -> T) -> T {
        f(&self.log.lock())
    }

    // ========================================================================
    // Internal
    // ========================================================================

    /// Run `f` on the log with the current tick count and caller identity
    pub(crate) fn emit(&self, f: impl FnOnce(&mut LogBuffer, u64, PartitionId)) {
        let ticks = self.rtos.ticks();
        let caller = self.current_partition_id();
        f(&mut self.log.lock(), ticks, caller);
    }

    /// Log a violation and halt
    #[cold]
    pub(crate) fn fatal(&self, error: FatalError) -> ! {
        let record = FatalRecord {
            error,
            partition: self.current_partition_id(),
            ticks: self.rtos.ticks(),
        };
        {
            let mut log = self.log.lock();
            log_error!(log, record.ticks, record.partition, "fatal", "{}", record.error);
        }
        halt(record.error)
    }

    /// Unwrap a table outcome, logging and halting on a violation
    pub(crate) fn enforce<T>(&self, checked: Checked<T>) -> T {
        match checked {
            Ok(value) => value,
            Err(error) => self.fatal(error),
        }
    }

    /// Channel slot behind a live key
    pub(crate) fn channel(&self, key: ArenaKey) -> &ChannelSlot {
        self.enforce(self.channels.get(key))
    }

    /// Partition running on the calling thread, halting for other callers
    pub(crate) fn require_partition(&self) -> &Partition {
        match self.active_partition() {
            Some(partition) => partition,
            None => self.fatal(FatalError::NotAPartition),
        }
    }

    /// Record the thread of a starting partition
    pub(crate) fn attach_partition(
        &self,
        id: PartitionId,
        thread: ThreadId,
        mutex: MutexId,
    ) -> Result<()> {
        let partition = self.partitions.get(id).ok_or(Error::PartitionNotFound)?;
        partition.attach(thread, mutex)?;

        let ticks = self.rtos.ticks();
        let mut log = self.log.lock();
        log_info!(log, ticks, id, "spm", "{} started on thread {}", partition.name, thread.0);
        Ok(())
    }

    /// Check that `caller` may name `[base, base + len)`
    ///
    /// The two-domain validator always applies. A partition that declared
    /// regions is further restricted to them.
    pub(crate) fn buffer_accessible(&self, base: Addr, len: u32, caller: PartitionId) -> bool {
        if !self
            .validator
            .is_accessible(base, len, AccessContext::from(caller))
        {
            return false;
        }
        if len == 0 || !caller.is_secure() {
            return true;
        }
        let declared = self.regions.get(RegionQuery::Partition(caller));
        declared.is_empty() || declared.iter().any(|r| r.covers(base, len))
    }

    /// Halt unless `caller` may name `[base, base + len)`
    pub(crate) fn check_buffer(&self, base: Addr, len: u32, caller: PartitionId) {
        if !self.buffer_accessible(base, len, caller) {
            self.fatal(FatalError::BufferOutOfDomain { base, len, caller });
        }
    }
}
