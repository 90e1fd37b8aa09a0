// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Partition start-up
//!
//! Each partition gets its own thread and mutex. The thread blocks on
//! `START_SIGNAL` until its id has been recorded in the registry, so the
//! partition body can rely on identity resolution from its first call.

use std::sync::Arc;

use q_common::constants::{MAX_SERVICES_PER_PARTITION, START_SIGNAL};
use q_common::{Error, PartitionId, Result, Sid};

use crate::engine::{Dispatcher, Notifications, Service};
use crate::fatal::FatalError;
use crate::memory::Memory;
use crate::rtos::{MutexAttrs, Rtos, ThreadAttrs, ThreadId, Timeout};
use crate::spm::Spm;

/// Handlers a partition serves with
#[derive(Default)]
pub struct PartitionServer {
    services: Vec<(Sid, Box<dyn Service>)>,
    notifications: Option<Box<dyn Notifications>>,
}

impl PartitionServer {
    /// Create a server with no handlers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `sid` with `service`
    #[must_use]
    pub fn with_service(mut self, sid: Sid, service: impl Service + 'static) -> Self {
        self.services.push((sid, Box::new(service)));
        self
    }

    /// Handle doorbell and interrupt signals with `notifications`
    #[must_use]
    pub fn with_notifications(mut self, notifications: impl Notifications + 'static) -> Self {
        self.notifications = Some(Box::new(notifications));
        self
    }

    fn run<R: Rtos, M: Memory>(mut self, spm: &Spm<R, M>) -> ! {
        let mut dispatcher = Dispatcher::new();
        for (sid, service) in &mut self.services {
            if dispatcher.bind(*sid, &mut **service).is_err() {
                spm.fatal(FatalError::BindingRejected(*sid));
            }
        }
        if let Some(notifications) = self.notifications.as_deref_mut() {
            dispatcher = dispatcher.with_notifications(notifications);
        }
        spm.serve(&mut dispatcher)
    }
}

/// Start partition `id` running `body`
///
/// # Errors
/// - `Error::PartitionNotFound` if `id` is not registered
/// - `Error::PartitionAlreadyStarted` if it already runs
/// - `Error::MutexCreationFailed` / `Error::TaskCreationFailed` from the RTOS
pub fn spawn_partition<R, M, F>(spm: &Arc<Spm<R, M>>, id: PartitionId, body: F) -> Result<ThreadId>
where
    R: Rtos + 'static,
    M: Memory + 'static,
    F: FnOnce(Arc<Spm<R, M>>) + Send + 'static,
{
    let partition = spm.partitions().get(id).ok_or(Error::PartitionNotFound)?;
    if partition.is_running() {
        return Err(Error::PartitionAlreadyStarted);
    }

    let mutex = spm.rtos().create_mutex(&MutexAttrs::PARTITION)?;
    let attrs = ThreadAttrs {
        name: partition.name,
        stack_size: spm.config().partition_stack_size,
        priority: partition.priority,
    };

    let worker = Arc::clone(spm);
    let thread = spm.rtos().spawn(&attrs, move || {
        worker.rtos().wait_any(START_SIGNAL, Timeout::Block);
        worker.rtos().clear_flags(START_SIGNAL);
        body(worker);
    })?;

    spm.attach_partition(id, thread, mutex)?;
    spm.rtos().set_flags(thread, START_SIGNAL);
    Ok(thread)
}

/// Start partition `id` serving with `server`
///
/// # Errors
/// - `Error::ServiceNotFound` if a bound SID is not hosted by the partition
/// - `Error::DuplicateService` if a SID is bound twice
/// - `Error::ResourceExhausted` if more SIDs are bound than a partition hosts
/// - See [`spawn_partition`] for the rest
pub fn start_partition<R, M>(spm: &Arc<Spm<R, M>>, id: PartitionId, server: PartitionServer) -> Result<ThreadId>
where
    R: Rtos + 'static,
    M: Memory + 'static,
{
    let partition = spm.partitions().get(id).ok_or(Error::PartitionNotFound)?;
    if server.services.len() > MAX_SERVICES_PER_PARTITION {
        return Err(Error::ResourceExhausted);
    }
    for (i, (sid, _)) in server.services.iter().enumerate() {
        if partition.find_service(*sid).is_none() {
            return Err(Error::ServiceNotFound);
        }
        if server.services[..i].iter().any(|(other, _)| other == sid) {
            return Err(Error::DuplicateService);
        }
    }

    spawn_partition(spm, id, move |spm| server.run(&spm))
}
