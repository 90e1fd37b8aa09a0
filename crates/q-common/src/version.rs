// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! RoT service minor version policy
//!
//! Each RoT service declares the minor version it implements and a policy
//! deciding which requested versions a client may connect with.
//!
//! # Policies
//!
//! - `Strict`: the requested minor version must equal the service's
//! - `Relaxed`: any requested minor version up to and including the
//!   service's is accepted, so older clients keep working after the
//!   service gains features

use core::fmt;

/// Version matching policy of a RoT service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MinorVersionPolicy {
    /// Requested version must match exactly
    #[default]
    Strict,
    /// Requested version must not exceed the service's version
    Relaxed,
}

impl MinorVersionPolicy {
    /// Check whether a client requesting `requested` may connect to a
    /// service implementing `service_version`
    #[must_use]
    pub const fn accepts(&self, service_version: u32, requested: u32) -> bool {
        match self {
            Self::Strict => requested == service_version,
            Self::Relaxed => requested <= service_version,
        }
    }

    /// Policy name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Relaxed => "relaxed",
        }
    }
}

impl fmt::Display for MinorVersionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
