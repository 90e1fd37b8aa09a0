// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Memory region validation
//!
//! Two layers decide whether the SPM may touch a buffer on behalf of a
//! caller:
//!
//! - [`RegionValidator`]: the coarse two-domain gate. A non-secure caller may
//!   only name non-secure RAM or flash, a partition may only name secure RAM
//!   or flash. This is the final arbiter before any copy.
//! - [`RegionTable`]: the finer per-partition list of declared regions,
//!   grouped contiguously by partition id.
//!
//! Both are total over their inputs and use overflow-checked arithmetic.

use heapless::Vec;
use q_common::{Addr, Error, MemoryLayout, PartitionId, Result};

/// One declared memory region of a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Owning partition
    pub partition: PartitionId,
    /// Region identifier, unique within the partition
    pub id: u32,
    /// First address
    pub base: Addr,
    /// Length in bytes
    pub size: u32,
}

impl MemoryRegion {
    /// Create a region descriptor
    #[must_use]
    pub const fn new(partition: PartitionId, id: u32, base: Addr, size: u32) -> Self {
        Self {
            partition,
            id,
            base,
            size,
        }
    }

    /// Exclusive end address, `None` on overflow
    #[must_use]
    pub const fn end(&self) -> Option<Addr> {
        self.base.checked_add(self.size)
    }

    /// Check that `[ptr, ptr + size)` lies inside this region
    #[must_use]
    pub fn covers(&self, ptr: Addr, size: u32) -> bool {
        match (ptr.checked_add(size), self.end()) {
            (Some(end), Some(limit)) => ptr >= self.base && end <= limit,
            _ => false,
        }
    }
}

/// Selector for [`RegionTable::get`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionQuery {
    /// Every declared region
    All,
    /// Regions of one partition
    Partition(PartitionId),
}

/// Boot-time table of declared regions, grouped by partition
pub struct RegionTable<const N: usize> {
    regions: Vec<MemoryRegion, N>,
}

impl<const N: usize> RegionTable<N> {
    /// Create an empty table
    #[must_use]
    pub const fn new() -> Self {
        Self { regions: Vec::new() }
    }

    /// Append a region
    ///
    /// Regions of one partition must be added back to back.
    ///
    /// # Errors
    /// - `Error::InvalidParameter` for an empty or overflowing region
    /// - `Error::RegionOrdering` if the partition already has an earlier,
    ///   non-adjacent run of regions
    /// - `Error::ResourceExhausted` if the table is full
    pub fn add(&mut self, region: MemoryRegion) -> Result<()> {
        if region.size == 0 || region.end().is_none() {
            return Err(Error::InvalidParameter);
        }

        let continues_run = self
            .regions
            .last()
            .is_some_and(|last| last.partition == region.partition);
        if !continues_run && self.regions.iter().any(|r| r.partition == region.partition) {
            return Err(Error::RegionOrdering);
        }
        if self.get(RegionQuery::Partition(region.partition))
            .iter()
            .any(|r| r.id == region.id)
        {
            return Err(Error::InvalidParameter);
        }

        self.regions
            .push(region)
            .map_err(|_| Error::ResourceExhausted)
    }

    /// Regions selected by `query`; empty when a partition declared none
    #[must_use]
    pub fn get(&self, query: RegionQuery) -> &[MemoryRegion] {
        let id = match query {
            RegionQuery::All => return &self.regions,
            RegionQuery::Partition(id) => id,
        };

        let Some(start) = self.regions.iter().position(|r| r.partition == id) else {
            return &[];
        };
        let len = self.regions[start..]
            .iter()
            .take_while(|r| r.partition == id)
            .count();
        &self.regions[start..start + len]
    }

    /// Check whether one of `partition`'s regions covers the range
    #[must_use]
    pub fn covers(&self, partition: PartitionId, ptr: Addr, size: u32) -> bool {
        self.get(RegionQuery::Partition(partition))
            .iter()
            .any(|r| r.covers(ptr, size))
    }

    /// Number of regions
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Check if no region is declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl<const N: usize> Default for RegionTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Domain Validator
// ============================================================================

/// Security domain a buffer is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessContext {
    /// Non-secure caller
    NonSecure,
    /// Secure partition
    Partition(PartitionId),
}

impl From<PartitionId> for AccessContext {
    fn from(id: PartitionId) -> Self {
        if id.is_secure() {
            Self::Partition(id)
        } else {
            Self::NonSecure
        }
    }
}

/// Two-domain buffer gate over a [`MemoryLayout`]
#[derive(Debug, Clone, Copy)]
pub struct RegionValidator {
    layout: MemoryLayout,
}

impl RegionValidator {
    /// Create a validator for `layout`
    #[must_use]
    pub const fn new(layout: MemoryLayout) -> Self {
        Self { layout }
    }

    /// Layout being enforced
    #[must_use]
    pub const fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Decide whether `[ptr, ptr + size)` is accessible in `context`
    ///
    /// A null pointer is never accessible, a zero-length buffer at any other
    /// address always is, and a range that wraps the address space never is.
    #[must_use]
    pub const fn is_accessible(&self, ptr: Addr, size: u32, context: AccessContext) -> bool {
        if ptr == 0 {
            return false;
        }
        if size == 0 {
            return true;
        }
        let Some(end) = ptr.checked_add(size) else {
            return false;
        };

        match context {
            AccessContext::NonSecure => {
                self.layout.non_secure_ram.contains_range(ptr, end)
                    || self.layout.non_secure_rom.contains_range(ptr, end)
            }
            AccessContext::Partition(_) => {
                self.layout.secure_ram.contains_range(ptr, end)
                    || self.layout.secure_rom.contains_range(ptr, end)
            }
        }
    }
}
