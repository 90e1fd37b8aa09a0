// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Qbitel SPM Common Library
//!
//! This crate provides the types, error definitions, configuration structures
//! and logging shared by the secure partition manager and the partitions it
//! hosts.
//!
//! # Features
//!
//! - `std`: Enable standard library support (disabled by default for embedded)
//! - `defmt`: Enable defmt logging support for embedded debugging
//!
//! # Security
//!
//! No heap allocations are performed - all buffers use fixed-size arrays or
//! heapless collections.

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

#[cfg(feature = "std")]
extern crate std;

pub mod types;
pub mod errors;
pub mod config;
pub mod log;
pub mod constants;
pub mod version;

// Re-export commonly used items
pub use errors::{Error, Result};
pub use types::*;
pub use config::{MemoryLayout, SpmConfig, Window, WindowKind};
pub use version::MinorVersionPolicy;
