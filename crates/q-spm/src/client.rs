// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Client side of the rendezvous
//!
//! Every client operation follows the same shape: resolve the channel,
//! record the message in the channel, move it `Idle -> Dispatched`, queue it
//! on the RoT service and raise the service signal, then block on
//! `REPLY_SIGNAL` until the server has moved the channel on.

use q_common::constants::{status, MAX_IOVEC, REPLY_SIGNAL, VERSION_NONE};
use q_common::{log_warn, Error, Handle, PartitionId, Result, Sid, Status};

use crate::arena::ArenaKey;
use crate::channel::{ChannelData, ChannelState};
use crate::fatal::FatalError;
use crate::memory::Memory;
use crate::message::{InVec, MessageType, OutVec};
use crate::rtos::{Rtos, Timeout};
use crate::spm::Spm;

impl<R: Rtos, M: Memory> Spm<R, M> {
    /// Minor version of the service `sid`
    ///
    /// Returns `VERSION_NONE` if the service does not exist or the caller
    /// is not allowed to connect to it.
    pub fn version(&self, sid: Sid) -> u32 {
        let Some((_, service)) = self.partitions.find_service(sid) else {
            return VERSION_NONE;
        };
        let visible = match self.active_partition() {
            Some(partition) => partition.may_call(sid),
            None => service.allow_nspe,
        };
        if visible {
            service.minor_version
        } else {
            VERSION_NONE
        }
    }

    /// Open a connection to the service `sid`
    ///
    /// # Errors
    /// - `Error::ConnectionRefused` if the SID is unknown, hidden from a
    ///   non-secure caller, the version is rejected, or the service refuses
    /// - `Error::ConnectionBusy` if no channel or handle is free
    ///
    /// # Panics
    /// Halts if a partition connects to a SID outside its external list.
    pub fn connect(&self, sid: Sid, minor_version: u32) -> Result<Handle> {
        let caller = self.current_partition_id();
        if let Some(partition) = self.active_partition() {
            if !partition.may_call(sid) {
                self.fatal(FatalError::SidNotPermitted { sid, caller });
            }
        }

        let Some(service_ref) = self.partitions.service_ref(sid) else {
            return self.refuse(sid, "unknown service");
        };
        let Some((host, service)) = self.partitions.service(service_ref) else {
            return self.refuse(sid, "unknown service");
        };
        if !caller.is_secure() && !service.allow_nspe {
            return self.refuse(sid, "not exposed to NSPE");
        }
        if !service.policy.accepts(service.minor_version, minor_version) {
            self.emit(|log, ticks, caller| {
                log_warn!(
                    log, ticks, caller, "client",
                    "{} v{} rejected ({}, service v{})",
                    sid, minor_version, service.policy, service.minor_version
                );
            });
            return Err(Error::ConnectionRefused);
        }
        if !host.is_running() {
            self.fatal(FatalError::PartitionNotRunning(host.id));
        }

        let data = ChannelData::new(service_ref, caller, self.rtos.current_thread());
        let Ok(key) = self.channels.open(data) else {
            return self.busy(sid, "channel");
        };
        let handle = match self.channel_handles.create(key, caller, None) {
            Ok(handle) => handle,
            Err(_) => {
                let slot = self.channel(key);
                self.enforce(slot.state.switch(ChannelState::Idle, ChannelState::Invalid));
                self.enforce(self.channels.release(key));
                return self.busy(sid, "handle");
            }
        };

        let slot = self.channel(key);
        match self.transact(key, MessageType::Connect, &[], &[]) {
            ChannelState::Replied => {
                self.enforce(slot.state.switch(ChannelState::Replied, ChannelState::Idle));
                Ok(handle)
            }
            ChannelState::Dropped => {
                self.enforce(slot.state.switch(ChannelState::Dropped, ChannelState::Invalid));
                self.enforce(self.channel_handles.destroy(handle, caller));
                self.enforce(self.channels.release(key));
                self.refuse(sid, "refused by service")
            }
            other => self.fatal(FatalError::ChannelState {
                expected: ChannelState::Replied as u8,
                actual: other as u8,
            }),
        }
    }

    /// Send a request on an open connection
    ///
    /// Returns the status the service replied with. On return each output
    /// vector's `len` holds the number of bytes the service wrote.
    ///
    /// # Panics
    /// Halts on a handle the caller does not own, more than `MAX_IOVEC`
    /// vectors, vectors exceeding the configured budget, or a non-empty vector
    /// outside the caller's domain.
    pub fn call(&self, handle: Handle, inputs: &[InVec], outputs: &mut [OutVec]) -> Status {
        let caller = self.current_partition_id();
        let key = self.enforce(self.channel_handles.get_mem(handle, caller));

        if inputs.len() + outputs.len() > MAX_IOVEC {
            self.fatal(FatalError::TooManyIovecs {
                inputs: inputs.len(),
                outputs: outputs.len(),
            });
        }

        let total: u64 = inputs
            .iter()
            .map(|v| u64::from(v.len))
            .chain(outputs.iter().map(|v| u64::from(v.len)))
            .sum();
        if total > u64::from(self.config.iovec_budget) {
            self.fatal(FatalError::IovecBudget {
                total,
                budget: self.config.iovec_budget,
            });
        }

        for (base, len) in inputs
            .iter()
            .map(|v| (v.base, v.len))
            .chain(outputs.iter().map(|v| (v.base, v.len)))
            .filter(|&(_, len)| len != 0)
        {
            self.check_buffer(base, len, caller);
        }

        let slot = self.channel(key);
        match self.transact(key, MessageType::Call, inputs, outputs) {
            ChannelState::Replied => {}
            other => self.fatal(FatalError::ChannelState {
                expected: ChannelState::Replied as u8,
                actual: other as u8,
            }),
        }

        let (status, written) = {
            let data = slot.data.lock();
            (data.status, data.written)
        };
        self.enforce(slot.state.switch(ChannelState::Replied, ChannelState::Idle));

        for (out, written) in outputs.iter_mut().zip(written) {
            out.len = written;
        }
        status
    }

    /// Close a connection
    ///
    /// Closing the null handle does nothing.
    pub fn close(&self, handle: Handle) {
        if handle.is_null() {
            return;
        }
        let caller = self.current_partition_id();
        let key = self.enforce(self.channel_handles.get_mem(handle, caller));

        let slot = self.channel(key);
        match self.transact(key, MessageType::Disconnect, &[], &[]) {
            ChannelState::Replied => {}
            other => self.fatal(FatalError::ChannelState {
                expected: ChannelState::Replied as u8,
                actual: other as u8,
            }),
        }
        self.enforce(slot.state.switch(ChannelState::Replied, ChannelState::Invalid));
        self.enforce(self.channel_handles.destroy(handle, caller));
        self.enforce(self.channels.release(key));
    }

    /// Queue one message on the channel `key` and wait for the reply
    ///
    /// Returns the state the server left the channel in.
    fn transact(
        &self,
        key: ArenaKey,
        msg_type: MessageType,
        inputs: &[InVec],
        outputs: &[OutVec],
    ) -> ChannelState {
        let slot = self.channel(key);
        let service_ref = {
            let mut data = slot.data.lock();
            data.msg_type = msg_type.raw();
            data.client_thread = self.rtos.current_thread();
            data.invec = [InVec::EMPTY; MAX_IOVEC];
            data.outvec = [OutVec::EMPTY; MAX_IOVEC];
            data.invec[..inputs.len()].copy_from_slice(inputs);
            data.outvec[..outputs.len()].copy_from_slice(outputs);
            data.written = [0; MAX_IOVEC];
            data.status = status::SUCCESS;
            data.service
        };
        let Some((host, service)) = self.partitions.service(service_ref) else {
            self.fatal(FatalError::StaleKey("service"));
        };

        // Reply is tracked by channel state, a leftover flag must not count
        self.rtos.clear_flags(REPLY_SIGNAL);
        self.enforce(slot.state.switch(ChannelState::Idle, ChannelState::Dispatched));

        let server = host.thread();
        if service
            .enqueue(key, || self.rtos.set_flags(server, service.signal))
            .is_err()
        {
            self.fatal(FatalError::PoolExhausted("service queue"));
        }

        loop {
            match slot.state.get() {
                Some(ChannelState::Dispatched) => {
                    self.rtos.wait_any(REPLY_SIGNAL, Timeout::Block);
                    self.rtos.clear_flags(REPLY_SIGNAL);
                }
                Some(state) => return state,
                None => self.fatal(FatalError::ChannelState {
                    expected: ChannelState::Dispatched as u8,
                    actual: u8::MAX,
                }),
            }
        }
    }

    fn refuse(&self, sid: Sid, reason: &str) -> Result<Handle> {
        self.emit(|log, ticks, caller: PartitionId| {
            log_warn!(log, ticks, caller, "client", "connect to {} refused: {}", sid, reason);
        });
        Err(Error::ConnectionRefused)
    }

    fn busy(&self, sid: Sid, pool: &str) -> Result<Handle> {
        self.emit(|log, ticks, caller: PartitionId| {
            log_warn!(log, ticks, caller, "client", "connect to {}: {} pool exhausted", sid, pool);
        });
        Err(Error::ConnectionBusy)
    }
}
