// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Memory access collaborator
//!
//! Bytes only cross between security domains through the [`Memory`] trait.
//! The SPM validates every range with the region validator before calling
//! it, so an implementation only has to map addresses to backing storage.
//!
//! [`BumpAllocator`] hands out permanent buffers from one address window;
//! all allocations are reclaimed together by `reset`.

use q_common::{Addr, Error, Result, Window};

/// Address-space accessor used for iovec copies
pub trait Memory: Send + Sync {
    /// Copy `dst.len()` bytes starting at `addr` into `dst`
    ///
    /// # Errors
    /// Returns `Error::MemoryAccessViolation` if the range is not backed.
    fn load(&self, addr: Addr, dst: &mut [u8]) -> Result<()>;

    /// Copy `src` to memory starting at `addr`
    ///
    /// # Errors
    /// Returns `Error::MemoryAccessViolation` if the range is not backed.
    fn store(&self, addr: Addr, src: &[u8]) -> Result<()>;
}

// ============================================================================
// Bump Allocator
// ============================================================================

/// Bump allocator over one address window
#[derive(Debug, Clone, Copy)]
pub struct BumpAllocator {
    window: Window,
    offset: u32,
}

impl BumpAllocator {
    /// Create an allocator covering `window`
    #[must_use]
    pub const fn new(window: Window) -> Self {
        Self { window, offset: 0 }
    }

    /// Allocate `size` bytes aligned to `align`
    ///
    /// `align` must be a power of two.
    ///
    /// # Errors
    /// Returns `Error::InvalidParameter` for a zero size or a bad alignment
    /// and `Error::MemoryAllocationFailed` if the window is exhausted.
    pub fn alloc(&mut self, size: u32, align: u32) -> Result<Addr> {
        if size == 0 || !align.is_power_of_two() {
            return Err(Error::InvalidParameter);
        }

        let current = self
            .window
            .base
            .checked_add(self.offset)
            .ok_or(Error::MemoryAllocationFailed)?;
        let aligned = current
            .checked_add(align - 1)
            .map(|addr| addr & !(align - 1))
            .ok_or(Error::MemoryAllocationFailed)?;
        let padding = aligned - current;
        let needed = padding
            .checked_add(size)
            .ok_or(Error::MemoryAllocationFailed)?;

        if needed > self.available() {
            return Err(Error::MemoryAllocationFailed);
        }

        self.offset += needed;
        Ok(aligned)
    }

    /// Remaining bytes in the window
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.window.size - self.offset
    }

    /// Window this allocator carves from
    #[must_use]
    pub const fn window(&self) -> Window {
        self.window
    }

    /// Free every allocation
    pub fn reset(&mut self) {
        self.offset = 0;
    }
}
