// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! SPM configuration
//!
//! This module defines the configuration that controls the partition
//! manager. All configuration is fixed at image build time and handed to
//! the SPM context once at boot; nothing is reconfigured at runtime.

use crate::constants::DEFAULT_IOVEC_BUDGET;
use crate::errors::{Error, Result};
use crate::log::LogLevel;
use crate::types::Addr;

/// Top-level SPM configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpmConfig {
    /// Upper bound for the summed iovec lengths of a single call
    pub iovec_budget: u32,
    /// Stack size requested for every partition thread
    pub partition_stack_size: usize,
    /// Minimum level recorded in the SPM log
    pub log_level: LogLevel,
    /// Address windows of the two security domains
    pub layout: MemoryLayout,
}

impl SpmConfig {
    /// Default configuration for an STM32U5 TrustZone image
    pub const DEFAULT: Self = Self {
        iovec_budget: DEFAULT_IOVEC_BUDGET,
        partition_stack_size: 4096,
        log_level: LogLevel::Info,
        layout: MemoryLayout::STM32U5,
    };

    /// Configuration for host simulation and tests
    pub const SIMULATOR: Self = Self {
        iovec_budget: 4096,
        partition_stack_size: 64 * 1024,
        log_level: LogLevel::Debug,
        layout: MemoryLayout::SIMULATOR,
    };

    /// Validate the configuration
    ///
    /// # Errors
    /// Returns `Error::InvalidParameter` for a zero budget or stack size and
    /// `Error::InvalidMemoryLayout` for a malformed layout.
    pub fn validate(&self) -> Result<()> {
        if self.iovec_budget == 0 || self.partition_stack_size == 0 {
            return Err(Error::InvalidParameter);
        }
        self.layout.validate()
    }
}

impl Default for SpmConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// =============================================================================
// Memory Layout
// =============================================================================

/// One contiguous address window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// First address in the window
    pub base: Addr,
    /// Window length in bytes
    pub size: u32,
}

impl Window {
    /// Create a window
    #[must_use]
    pub const fn new(base: Addr, size: u32) -> Self {
        Self { base, size }
    }

    /// Exclusive end address, `None` if the window runs off the address space
    #[must_use]
    pub const fn end(&self) -> Option<Addr> {
        self.base.checked_add(self.size)
    }

    /// Check that `[start, end)` lies entirely inside the window
    #[must_use]
    pub const fn contains_range(&self, start: Addr, end: Addr) -> bool {
        match self.end() {
            Some(limit) => start >= self.base && end <= limit && start <= end,
            None => false,
        }
    }

    /// Check whether two windows share any address
    #[must_use]
    pub const fn overlaps(&self, other: &Window) -> bool {
        match (self.end(), other.end()) {
            (Some(a_end), Some(b_end)) => self.base < b_end && other.base < a_end,
            _ => true,
        }
    }

    const fn is_valid(&self) -> bool {
        self.size != 0 && self.end().is_some()
    }
}

/// Names of the four windows of a [`MemoryLayout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    /// Secure SRAM alias
    SecureRam,
    /// Secure flash alias
    SecureRom,
    /// Non-secure SRAM alias
    NonSecureRam,
    /// Non-secure flash alias
    NonSecureRom,
}

impl WindowKind {
    /// All window kinds
    pub const ALL: [WindowKind; 4] = [
        Self::SecureRam,
        Self::SecureRom,
        Self::NonSecureRam,
        Self::NonSecureRom,
    ];

    /// Check if the window belongs to the secure domain
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        matches!(self, Self::SecureRam | Self::SecureRom)
    }
}

/// Address windows of the secure and non-secure domains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    /// Secure SRAM window
    pub secure_ram: Window,
    /// Secure flash window
    pub secure_rom: Window,
    /// Non-secure SRAM window
    pub non_secure_ram: Window,
    /// Non-secure flash window
    pub non_secure_rom: Window,
}

impl MemoryLayout {
    /// STM32U5 TrustZone layout
    ///
    /// Lower flash bank and SRAM1 are secure, the rest is non-secure.
    pub const STM32U5: Self = Self {
        secure_ram: Window::new(0x3000_0000, 192 * 1024), // SRAM1, secure alias
        secure_rom: Window::new(0x0C00_0000, 1024 * 1024), // bank 1, secure alias
        non_secure_ram: Window::new(0x2003_0000, 576 * 1024), // SRAM2/3
        non_secure_rom: Window::new(0x0810_0000, 1024 * 1024), // bank 2
    };

    /// Small layout for host simulation
    pub const SIMULATOR: Self = Self {
        secure_ram: Window::new(0x3000_0000, 64 * 1024),
        secure_rom: Window::new(0x0C00_0000, 64 * 1024),
        non_secure_ram: Window::new(0x2000_0000, 64 * 1024),
        non_secure_rom: Window::new(0x0800_0000, 64 * 1024),
    };

    /// Get a window by kind
    #[must_use]
    pub const fn window(&self, kind: WindowKind) -> Window {
        match kind {
            WindowKind::SecureRam => self.secure_ram,
            WindowKind::SecureRom => self.secure_rom,
            WindowKind::NonSecureRam => self.non_secure_ram,
            WindowKind::NonSecureRom => self.non_secure_rom,
        }
    }

    /// Validate the layout
    ///
    /// # Errors
    /// Returns `Error::InvalidMemoryLayout` if any window is empty, runs off
    /// the address space or overlaps another window.
    pub fn validate(&self) -> Result<()> {
        let windows = WindowKind::ALL.map(|kind| self.window(kind));
        for (i, window) in windows.iter().enumerate() {
            if !window.is_valid() {
                return Err(Error::InvalidMemoryLayout);
            }
            if windows[i + 1..].iter().any(|other| window.overlaps(other)) {
                return Err(Error::InvalidMemoryLayout);
            }
        }
        Ok(())
    }
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::STM32U5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        assert!(SpmConfig::DEFAULT.validate().is_ok());
        assert!(SpmConfig::SIMULATOR.validate().is_ok());
    }

    #[test]
    fn test_window_range() {
        let window = Window::new(0x1000, 0x100);
        assert!(window.contains_range(0x1000, 0x1100));
        assert!(!window.contains_range(0x1000, 0x1101));
        assert!(!window.contains_range(0x0FFF, 0x1000));
    }

    #[test]
    fn test_window_at_top_of_address_space() {
        let window = Window::new(0xFFFF_FF00, 0x100);
        assert_eq!(window.end(), None);
        assert!(!window.contains_range(0xFFFF_FF00, 0xFFFF_FF10));
        assert!(Window::new(0xFFFF_FF00, 0xFF).contains_range(0xFFFF_FF00, 0xFFFF_FFFF));
    }

    #[test]
    fn test_overlapping_layout_rejected() {
        let mut layout = MemoryLayout::SIMULATOR;
        layout.non_secure_ram = Window::new(0x3000_8000, 0x1000);
        assert_eq!(layout.validate(), Err(Error::InvalidMemoryLayout));
    }

    #[test]
    fn test_empty_window_rejected() {
        let mut layout = MemoryLayout::SIMULATOR;
        layout.secure_rom = Window::new(0x0C00_0000, 0);
        assert_eq!(layout.validate(), Err(Error::InvalidMemoryLayout));
    }

    #[test]
    fn test_zero_budget_rejected() {
        let mut config = SpmConfig::SIMULATOR;
        config.iovec_budget = 0;
        assert_eq!(config.validate(), Err(Error::InvalidParameter));
    }
}
