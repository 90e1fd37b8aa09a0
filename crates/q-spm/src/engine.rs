// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Partition server loop
//!
//! A partition binds [`Service`] handlers to the SIDs it hosts and hands
//! them to [`Spm::serve`]. The loop waits on every signal the partition
//! owns, fetches one message per asserted service signal and replies on the
//! handler's behalf, so each CONNECT, CALL and DISCONNECT receives exactly
//! one reply. A hosted service with no handler refuses connections.
//!
//! Handlers see the message through [`MessageIo`] and never touch handles or
//! channel state directly.

use heapless::Vec;
use q_common::constants::{status, DOORBELL_SIGNAL, MAX_SERVICES_PER_PARTITION};
use q_common::{log_info, log_warn, Error, Result, Sid, SignalMask, Status};

use crate::fatal::FatalError;
use crate::memory::Memory;
use crate::message::{Message, MessageType, RHandle};
use crate::rtos::{Rtos, Timeout};
use crate::spm::Spm;

/// Access to the message being handled
pub trait MessageIo {
    /// The message
    fn message(&self) -> &Message;

    /// Copy from input vector `index`, returning the bytes copied
    fn read(&mut self, index: usize, dst: &mut [u8]) -> usize;

    /// Skip bytes of input vector `index`, returning the bytes skipped
    fn skip(&mut self, index: usize, count: usize) -> usize;

    /// Append to output vector `index`, returning the bytes written
    fn write(&mut self, index: usize, src: &[u8]) -> usize;

    /// Attach server state to the connection
    fn set_rhandle(&mut self, rhandle: RHandle);

    /// Server state attached to the connection
    fn rhandle(&self) -> RHandle {
        self.message().rhandle
    }
}

/// RoT service handler
pub trait Service: Send {
    /// Accept or refuse a connection
    ///
    /// # Errors
    /// Any error refuses the connection.
    fn on_connect(&mut self, msg: &mut dyn MessageIo) -> Result<()> {
        let _ = msg;
        Ok(())
    }

    /// Handle a request, returning the status for the client
    ///
    /// # Errors
    /// An error is replied as its PSA status.
    fn on_call(&mut self, msg: &mut dyn MessageIo) -> Result<Status>;

    /// Release state of a closing connection
    fn on_disconnect(&mut self, msg: &mut dyn MessageIo) {
        let _ = msg;
    }
}

/// Doorbell and interrupt handler
pub trait Notifications: Send {
    /// Doorbell was asserted; it is cleared before this runs
    fn on_doorbell(&mut self) {}

    /// Interrupt `signal` fired; end of interrupt follows this
    fn on_interrupt(&mut self, signal: SignalMask) {
        let _ = signal;
    }
}

/// Handlers bound by one partition
pub struct Dispatcher<'a> {
    bindings: Vec<(Sid, &'a mut dyn Service), MAX_SERVICES_PER_PARTITION>,
    notifications: Option<&'a mut dyn Notifications>,
}

impl<'a> Dispatcher<'a> {
    /// Create a dispatcher with no bindings
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bindings: Vec::new(),
            notifications: None,
        }
    }

    /// Bind a handler to `sid`
    ///
    /// # Errors
    /// - `Error::DuplicateService` if `sid` is already bound
    /// - `Error::ResourceExhausted` if the binding table is full
    pub fn bind(&mut self, sid: Sid, service: &'a mut dyn Service) -> Result<()> {
        if self.bindings.iter().any(|(bound, _)| *bound == sid) {
            return Err(Error::DuplicateService);
        }
        self.bindings
            .push((sid, service))
            .map_err(|_| Error::ResourceExhausted)
    }

    /// Handle doorbell and interrupt signals with `notifications`
    #[must_use]
    pub fn with_notifications(mut self, notifications: &'a mut dyn Notifications) -> Self {
        self.notifications = Some(notifications);
        self
    }

    /// Bound SIDs
    #[must_use]
    pub fn sids(&self) -> Vec<Sid, MAX_SERVICES_PER_PARTITION> {
        self.bindings.iter().map(|(sid, _)| *sid).collect()
    }

    fn service_mut(&mut self, sid: Sid) -> Option<&mut (dyn Service + 'a)> {
        self.bindings
            .iter_mut()
            .find(|(bound, _)| *bound == sid)
            .map(|(_, service)| &mut **service)
    }
}

impl Default for Dispatcher<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// [`MessageIo`] over one fetched message
struct Exchange<'s, R: Rtos, M: Memory> {
    spm: &'s Spm<R, M>,
    message: Message,
}

impl<R: Rtos, M: Memory> MessageIo for Exchange<'_, R, M> {
    fn message(&self) -> &Message {
        &self.message
    }

    fn read(&mut self, index: usize, dst: &mut [u8]) -> usize {
        self.spm.read(self.message.handle, index, dst)
    }

    fn skip(&mut self, index: usize, count: usize) -> usize {
        self.spm.skip(self.message.handle, index, count)
    }

    fn write(&mut self, index: usize, src: &[u8]) -> usize {
        self.spm.write(self.message.handle, index, src)
    }

    fn set_rhandle(&mut self, rhandle: RHandle) {
        self.spm.set_rhandle(self.message.handle, rhandle);
        self.message.rhandle = rhandle;
    }
}

impl<R: Rtos, M: Memory> Spm<R, M> {
    /// Wait once and handle every asserted signal
    ///
    /// The wait covers every signal the partition owns, bound or not, so the
    /// doorbell is always part of it. Signals are handled lowest bit first,
    /// one message per service signal. Returns the number of signals
    /// handled, zero on timeout.
    pub fn serve_once(&self, dispatcher: &mut Dispatcher<'_>, timeout: Timeout) -> usize {
        let partition = self.require_partition();
        for (sid, _) in &dispatcher.bindings {
            if partition.find_service(*sid).is_none() {
                self.fatal(FatalError::ServiceNotHosted(*sid));
            }
        }

        let mut pending = self.wait(partition.signal_mask(), timeout);
        let mut handled = 0;
        while pending != 0 {
            let signal = pending & pending.wrapping_neg();
            pending &= !signal;

            if signal == DOORBELL_SIGNAL {
                self.clear();
                if let Some(notifications) = dispatcher.notifications.as_deref_mut() {
                    notifications.on_doorbell();
                }
            } else if partition.irq_for_signal(signal).is_some() {
                if let Some(notifications) = dispatcher.notifications.as_deref_mut() {
                    notifications.on_interrupt(signal);
                }
                self.eoi(signal);
            } else if let Some(service) = partition.service_for_signal(signal) {
                match dispatcher.service_mut(service.sid) {
                    Some(handler) => self.dispatch(handler, signal),
                    None => self.decline(signal),
                }
            }
            handled += 1;
        }
        handled
    }

    /// Serve forever
    pub fn serve(&self, dispatcher: &mut Dispatcher<'_>) -> ! {
        let name = self.require_partition().name;
        self.emit(|log, ticks, caller| {
            log_info!(log, ticks, caller, "engine", "{} serving {} services", name, dispatcher.bindings.len());
        });
        loop {
            self.serve_once(dispatcher, Timeout::Block);
        }
    }

    /// Fetch one message, run the handler and reply with its status
    fn dispatch(&self, service: &mut dyn Service, signal: SignalMask) {
        let message = self.get(signal);
        let mut exchange = Exchange { spm: self, message };

        let status = match message.msg_type {
            MessageType::Connect => match service.on_connect(&mut exchange) {
                Ok(()) => status::SUCCESS,
                Err(err) => {
                    self.emit(|log, ticks, caller| {
                        log_warn!(log, ticks, caller, "engine", "connect from {} refused: {}", message.client, err);
                    });
                    status::CONNECTION_REFUSED
                }
            },
            MessageType::Call => match service.on_call(&mut exchange) {
                Ok(status) => status,
                Err(err) => {
                    self.emit(|log, ticks, caller| {
                        log_warn!(log, ticks, caller, "engine", "call from {} failed: {}", message.client, err);
                    });
                    err.status()
                }
            },
            MessageType::Disconnect => {
                service.on_disconnect(&mut exchange);
                status::SUCCESS
            }
        };

        self.reply(message.handle, status);
    }

    /// Answer a message for a hosted service nobody bound
    fn decline(&self, signal: SignalMask) {
        let message = self.get(signal);
        let status = match message.msg_type {
            MessageType::Connect => {
                self.emit(|log, ticks, caller| {
                    log_warn!(log, ticks, caller, "engine", "connect from {} refused: no handler", message.client);
                });
                status::CONNECTION_REFUSED
            }
            MessageType::Call => status::ERROR_NOT_SUPPORTED,
            MessageType::Disconnect => status::SUCCESS,
        };
        self.reply(message.handle, status);
    }
}
