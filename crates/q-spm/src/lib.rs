// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Qbitel Secure Partition Manager
//!
//! The IPC core that sits between the non-secure world and the secure
//! partitions:
//!
//! - **Handles**: capability-style handle table with ownership checks
//! - **Regions**: two-domain buffer validation and per-partition regions
//! - **Channels**: atomic per-connection state machine
//! - **Partitions**: registry of partitions, RoT services and signals
//! - **Engine**: client/server rendezvous, iovec access and the serve loop
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use q_spm::{host::{HostMemory, HostRtos}, runtime, Spm, Partition, RotService};
//!
//! let config = SpmConfig::SIMULATOR;
//! let mut spm = Spm::new(config, HostRtos::new(), HostMemory::new(&config.layout))?;
//! spm.register_partition(crypto_partition)?;
//! let spm = Arc::new(spm);
//! runtime::start_partition(&spm, CRYPTO_ID, PartitionServer::new().with_service(SID, Hasher))?;
//!
//! let handle = spm.connect(SID, 1)?;
//! let status = spm.call(handle, &inputs, &mut outputs);
//! spm.close(handle);
//! ```
//!
//! # Features
//!
//! - `std` (default): host RTOS and memory collaborators, partition runtime
//! - `defmt`: defmt formatting of errors

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod arena;
pub mod channel;
pub mod engine;
pub mod fatal;
pub mod handles;
pub mod memory;
pub mod message;
pub mod partition;
pub mod regions;
pub mod rtos;
pub mod spm;

mod client;
mod server;

#[cfg(feature = "std")]
pub mod host;
#[cfg(feature = "std")]
pub mod runtime;

// Re-export commonly used types
pub use arena::{Arena, ArenaKey};
pub use channel::ChannelState;
pub use engine::{Dispatcher, MessageIo, Notifications, Service};
pub use fatal::{halt, Checked, FatalError};
pub use handles::HandleManager;
pub use memory::Memory;
pub use message::{InVec, Message, MessageType, OutVec, RHandle};
pub use partition::{Partition, PartitionRegistry, RotService};
pub use regions::{AccessContext, MemoryRegion, RegionQuery, RegionValidator};
pub use rtos::{Rtos, ThreadPriority, Timeout};
pub use spm::Spm;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
