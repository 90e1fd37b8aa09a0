// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Server side of the rendezvous
//!
//! Called from partition threads only. A partition waits on its signals,
//! fetches the message behind a service signal, accesses the client's
//! vectors through the message handle and replies exactly once, which
//! invalidates the handle and wakes the client.
//!
//! Doorbell and interrupt signals are part of the same wait set; they carry
//! no message and are deasserted with [`Spm::clear`] and [`Spm::eoi`].

use q_common::constants::{status, DOORBELL_SIGNAL, MAX_IOVEC, REPLY_SIGNAL};
use q_common::{is_single_signal, log_debug, Error, Handle, PartitionId, Result, SignalMask, Status};

use crate::arena::ArenaKey;
use crate::channel::ChannelState;
use crate::fatal::FatalError;
use crate::memory::Memory;
use crate::message::{ActiveMessage, Message, MessageType, RHandle};
use crate::rtos::{Rtos, Timeout};
use crate::spm::Spm;

impl<R: Rtos, M: Memory> Spm<R, M> {
    /// Wait for any signal in `mask`
    ///
    /// Returns the asserted signals within `mask`, zero on timeout. Signals
    /// stay asserted until the message queue drains, [`Spm::clear`] or
    /// [`Spm::eoi`].
    pub fn wait(&self, mask: SignalMask, timeout: Timeout) -> SignalMask {
        let partition = self.require_partition();
        let foreign = mask & !partition.signal_mask();
        if mask == 0 || foreign != 0 {
            self.fatal(FatalError::UnknownSignal(if mask == 0 { 0 } else { foreign }));
        }
        self.rtos.wait_any(mask, timeout)
    }

    /// Fetch the oldest message queued behind a service signal
    ///
    /// The signal is deasserted when this empties the queue.
    pub fn get(&self, signal: SignalMask) -> Message {
        let partition = self.require_partition();
        if !is_single_signal(signal) {
            self.fatal(FatalError::SignalNotSingleBit(signal));
        }
        let Some(service) = partition.service_for_signal(signal) else {
            self.fatal(FatalError::UnknownSignal(signal));
        };
        let Some(channel) = service.dequeue(|| {
            self.rtos.clear_flags(signal);
        }) else {
            self.fatal(FatalError::NoPendingMessage(signal));
        };

        let slot = self.channel(channel);
        self.enforce(slot.state.assert(ChannelState::Dispatched));
        let data = *slot.data.lock();
        let Some(msg_type) = MessageType::from_raw(data.msg_type) else {
            self.fatal(FatalError::UnknownMessageType(data.msg_type));
        };

        let inserted = self.messages.lock().insert(ActiveMessage::new(channel, msg_type));
        let Ok(key) = inserted else {
            self.fatal(FatalError::PoolExhausted("message"));
        };
        let Ok(handle) = self.message_handles.create(key, partition.id, None) else {
            self.messages.lock().remove(key);
            self.fatal(FatalError::PoolExhausted("message handle"));
        };

        self.emit(|log, ticks, caller| {
            log_debug!(
                log, ticks, caller, "server",
                "{:?} from {} on {} as {}",
                msg_type, data.client, service.sid, handle
            );
        });

        Message {
            msg_type,
            handle,
            rhandle: data.rhandle,
            in_size: data.invec.map(|v| v.len),
            out_size: data.outvec.map(|v| v.len),
            client: data.client,
        }
    }

    /// Copy from input vector `index` into `dst`
    ///
    /// Returns the bytes copied, which is less than `dst.len()` once the
    /// vector runs out.
    pub fn read(&self, handle: Handle, index: usize, dst: &mut [u8]) -> usize {
        let (key, active) = self.call_message(handle, index);
        let (vec, client) = {
            let data = self.channel(active.channel).data.lock();
            (data.invec[index], data.client)
        };

        let consumed = active.consumed[index];
        let n = clamp(vec.len - consumed, dst.len());
        if n == 0 {
            return 0;
        }
        let addr = vec.base + consumed;
        self.check_buffer(addr, n, client);
        if self.memory.load(addr, &mut dst[..n as usize]).is_err() {
            self.fatal(FatalError::UnmappedMemory { addr, len: n });
        }

        self.update_message(key, |m| m.consumed[index] += n);
        n as usize
    }

    /// Advance input vector `index` by up to `count` bytes without copying
    ///
    /// Returns the bytes skipped.
    pub fn skip(&self, handle: Handle, index: usize, count: usize) -> usize {
        let (key, active) = self.call_message(handle, index);
        let len = self.channel(active.channel).data.lock().invec[index].len;

        let n = clamp(len - active.consumed[index], count);
        self.update_message(key, |m| m.consumed[index] += n);
        n as usize
    }

    /// Append `src` to output vector `index`
    ///
    /// Returns the bytes written, which is less than `src.len()` once the
    /// vector is full.
    pub fn write(&self, handle: Handle, index: usize, src: &[u8]) -> usize {
        let (key, active) = self.call_message(handle, index);
        let (vec, client) = {
            let data = self.channel(active.channel).data.lock();
            (data.outvec[index], data.client)
        };

        let written = active.written[index];
        let n = clamp(vec.len - written, src.len());
        if n == 0 {
            return 0;
        }
        let addr = vec.base + written;
        self.check_buffer(addr, n, client);
        if self.memory.store(addr, &src[..n as usize]).is_err() {
            self.fatal(FatalError::UnmappedMemory { addr, len: n });
        }

        self.update_message(key, |m| m.written[index] += n);
        n as usize
    }

    /// Complete a message and wake its client
    ///
    /// A CONNECT accepts with `SUCCESS` and refuses with
    /// `CONNECTION_REFUSED`; any other status is a violation. The message
    /// handle is invalid afterwards.
    pub fn reply(&self, handle: Handle, status: Status) {
        let partition = self.require_partition();
        let key = self.enforce(self.message_handles.get_mem(handle, partition.id));
        let active = self.active_message(key);

        let next = match active.msg_type {
            MessageType::Connect => match status {
                status::SUCCESS => ChannelState::Replied,
                status::CONNECTION_REFUSED => ChannelState::Dropped,
                other => self.fatal(FatalError::InvalidConnectStatus(other)),
            },
            MessageType::Call | MessageType::Disconnect => ChannelState::Replied,
        };

        let slot = self.channel(active.channel);
        let client = {
            let mut data = slot.data.lock();
            data.written = active.written;
            data.status = status;
            data.client_thread
        };

        self.enforce(self.message_handles.destroy(handle, partition.id));
        self.messages.lock().remove(key);
        // The client may free the channel as soon as it observes the switch
        self.enforce(slot.state.switch(ChannelState::Dispatched, next));
        self.rtos.set_flags(client, REPLY_SIGNAL);
    }

    /// Attach server state to the connection of message `handle`
    ///
    /// Every later message on the connection carries it.
    pub fn set_rhandle(&self, handle: Handle, rhandle: RHandle) {
        let channel = self.message(handle).channel;
        self.channel(channel).data.lock().rhandle = rhandle;
    }

    /// Client identity of message `handle`
    pub fn identity(&self, handle: Handle) -> PartitionId {
        let channel = self.message(handle).channel;
        self.channel(channel).data.lock().client
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    /// Assert the doorbell of partition `target`
    pub fn notify(&self, target: PartitionId) {
        let Some(partition) = self.partitions.get(target) else {
            self.fatal(FatalError::UnknownPartition(target));
        };
        if !partition.is_running() {
            self.fatal(FatalError::PartitionNotRunning(target));
        }
        self.rtos.set_flags(partition.thread(), DOORBELL_SIGNAL);
    }

    /// Deassert the caller's doorbell
    pub fn clear(&self) {
        let partition = self.require_partition();
        if self.rtos.flags() & DOORBELL_SIGNAL == 0 {
            self.fatal(FatalError::DoorbellNotAsserted(partition.id));
        }
        self.rtos.clear_flags(DOORBELL_SIGNAL);
    }

    /// Signal end of interrupt handling for `signal`
    pub fn eoi(&self, signal: SignalMask) {
        let partition = self.require_partition();
        if !is_single_signal(signal) {
            self.fatal(FatalError::SignalNotSingleBit(signal));
        }
        if partition.irq_for_signal(signal).is_none() {
            self.fatal(FatalError::IrqNotOwned(signal));
        }
        if self.rtos.flags() & signal == 0 {
            self.fatal(FatalError::IrqNotAsserted(signal));
        }
        self.rtos.clear_flags(signal);
    }

    /// Assert the signal mapped to interrupt `line`
    ///
    /// # Errors
    /// - `Error::NotFound` if no partition maps the line
    /// - `Error::InvalidState` if the partition has not started
    pub fn raise_irq(&self, line: u32) -> Result<()> {
        let (partition, irq) = self.partitions.by_irq_line(line).ok_or(Error::NotFound)?;
        if !partition.is_running() {
            return Err(Error::InvalidState);
        }
        self.rtos.set_flags(partition.thread(), irq.signal);
        Ok(())
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn active_message(&self, key: ArenaKey) -> ActiveMessage {
        let active = self.messages.lock().get(key).copied();
        match active {
            Some(active) => active,
            None => self.fatal(FatalError::StaleKey("message")),
        }
    }

    /// Resolve a message handle owned by the calling partition
    fn message(&self, handle: Handle) -> ActiveMessage {
        let partition = self.require_partition();
        let key = self.enforce(self.message_handles.get_mem(handle, partition.id));
        self.active_message(key)
    }

    /// Resolve a CALL message for iovec access at `index`
    fn call_message(&self, handle: Handle, index: usize) -> (ArenaKey, ActiveMessage) {
        let partition = self.require_partition();
        let key = self.enforce(self.message_handles.get_mem(handle, partition.id));
        let active = self.active_message(key);
        if active.msg_type != MessageType::Call {
            self.fatal(FatalError::NotACall(active.msg_type.raw()));
        }
        if index >= MAX_IOVEC {
            self.fatal(FatalError::IovecIndex(index));
        }
        (key, active)
    }

    fn update_message(&self, key: ArenaKey, f: impl FnOnce(&mut ActiveMessage)) {
        let updated = self.messages.lock().get_mut(key).map(f);
        if updated.is_none() {
            self.fatal(FatalError::StaleKey("message"));
        }
    }
}

/// Bytes left in a vector, capped at what the caller asked for
fn clamp(remaining: u32, requested: usize) -> u32 {
    u32::try_from(requested).map_or(remaining, |requested| remaining.min(requested))
}
