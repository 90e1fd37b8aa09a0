// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Logging infrastructure for the secure partition manager
//!
//! This module provides a lightweight, no_std compatible logging system.
//! Entries are written to a circular buffer tagged with the tick count and
//! the partition that was running, and can be retrieved for debugging.
//!
//! # Security
//!
//! - Message payloads (iovec contents) must NEVER be logged
//! - Log levels control what is output in production vs development

use core::fmt::{self, Write};
use heapless::String;

use crate::types::PartitionId;

/// Maximum log message length
pub const MAX_LOG_MESSAGE_LEN: usize = 96;

/// Log buffer size (number of entries)
pub const LOG_BUFFER_SIZE: usize = 64;

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    /// Errors that require immediate attention
    Error = 0,
    /// Warnings about potential issues
    Warn = 1,
    /// Informational messages
    Info = 2,
    /// Debug messages (development only)
    Debug = 3,
    /// Trace messages (very verbose, development only)
    Trace = 4,
}

impl LogLevel {
    /// Get the log level name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    /// Get a short prefix for the log level
    #[must_use]
    pub const fn prefix(&self) -> char {
        match self {
            Self::Error => 'E',
            Self::Warn => 'W',
            Self::Info => 'I',
            Self::Debug => 'D',
            Self::Trace => 'T',
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Log entry structure
#[derive(Clone)]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// System ticks at the time of the entry
    pub ticks: u64,
    /// Partition that was running, `NON_SECURE` for the NSPE
    pub partition: PartitionId,
    /// Module/component name
    pub module: &'static str,
    /// Log message
    pub message: String<MAX_LOG_MESSAGE_LEN>,
}

impl LogEntry {
    /// Create a new log entry
    #[must_use]
    pub fn new(
        level: LogLevel,
        ticks: u64,
        partition: PartitionId,
        module: &'static str,
        message: &str,
    ) -> Self {
        let mut msg = String::new();
        // Truncate at a character boundary
        for ch in message.chars() {
            if msg.push(ch).is_err() {
                break;
            }
        }

        Self {
            level,
            ticks,
            partition,
            module,
            message: msg,
        }
    }
}

impl fmt::Debug for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:010}] {} {} [{}] {}",
            self.ticks,
            self.level.prefix(),
            self.partition,
            self.module,
            self.message
        )
    }
}

/// Circular log buffer
pub struct LogBuffer {
    entries: [Option<LogEntry>; LOG_BUFFER_SIZE],
    write_index: usize,
    count: usize,
    overwritten: u32,
    min_level: LogLevel,
}

impl LogBuffer {
    /// Create a new empty log buffer
    #[must_use]
    pub const fn new() -> Self {
        Self::with_level(LogLevel::Info)
    }

    /// Create a new empty log buffer recording `min_level` and above
    #[must_use]
    pub const fn with_level(min_level: LogLevel) -> Self {
        const NONE: Option<LogEntry> = None;
        Self {
            entries: [NONE; LOG_BUFFER_SIZE],
            write_index: 0,
            count: 0,
            overwritten: 0,
            min_level,
        }
    }

    /// Set the minimum log level
    pub fn set_min_level(&mut self, level: LogLevel) {
        self.min_level = level;
    }

    /// Get the minimum log level
    #[must_use]
    pub const fn min_level(&self) -> LogLevel {
        self.min_level
    }

    /// Check if a log level should be recorded
    #[must_use]
    pub const fn should_log(&self, level: LogLevel) -> bool {
        (level as u8) <= (self.min_level as u8)
    }

    /// Write a log entry
    pub fn write(&mut self, entry: LogEntry) {
        if !self.should_log(entry.level) {
            return;
        }

        if self.count == LOG_BUFFER_SIZE {
            self.overwritten = self.overwritten.saturating_add(1);
        }
        self.entries[self.write_index] = Some(entry);
        self.write_index = (self.write_index + 1) % LOG_BUFFER_SIZE;
        if self.count < LOG_BUFFER_SIZE {
            self.count += 1;
        }
    }

    /// Log with format arguments
    pub fn log(
        &mut self,
        level: LogLevel,
        ticks: u64,
        partition: PartitionId,
        module: &'static str,
        args: fmt::Arguments<'_>,
    ) {
        if !self.should_log(level) {
            return;
        }

        let mut message = String::<MAX_LOG_MESSAGE_LEN>::new();
        // Overlong messages are truncated
        let _ = message.write_fmt(args);

        self.write(LogEntry {
            level,
            ticks,
            partition,
            module,
            message,
        });
    }

    /// Get the number of entries
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Check if buffer is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of entries lost to wrap-around
    #[must_use]
    pub const fn overwritten(&self) -> u32 {
        self.overwritten
    }

    /// Clear all entries
    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            *entry = None;
        }
        self.write_index = 0;
        self.count = 0;
        self.overwritten = 0;
    }

    /// Iterate over entries (oldest first)
    pub fn iter(&self) -> LogBufferIter<'_> {
        LogBufferIter {
            buffer: self,
            index: 0,
            remaining: self.count,
        }
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over log buffer entries
pub struct LogBufferIter<'a> {
    buffer: &'a LogBuffer,
    index: usize,
    remaining: usize,
}

impl<'a> Iterator for LogBufferIter<'a> {
    type Item = &'a LogEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let start_index = if self.buffer.count < LOG_BUFFER_SIZE {
            0
        } else {
            self.buffer.write_index
        };

        let actual_index = (start_index + self.index) % LOG_BUFFER_SIZE;
        self.index += 1;
        self.remaining -= 1;

        self.buffer.entries[actual_index].as_ref()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($buffer:expr, $ts:expr, $partition:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Error, $ts, $partition, $module, format_args!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($buffer:expr, $ts:expr, $partition:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Warn, $ts, $partition, $module, format_args!($($arg)*))
    };
}

/// Log an informational message
#[macro_export]
macro_rules! log_info {
    ($buffer:expr, $ts:expr, $partition:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Info, $ts, $partition, $module, format_args!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($buffer:expr, $ts:expr, $partition:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Debug, $ts, $partition, $module, format_args!($($arg)*))
    };
}

/// Log a trace-level message
#[macro_export]
macro_rules! log_trace {
    ($buffer:expr, $ts:expr, $partition:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Trace, $ts, $partition, $module, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    const P1: PartitionId = PartitionId::new(1);

    #[test]
    fn test_level_filter() {
        let mut log = LogBuffer::with_level(LogLevel::Warn);
        log_info!(log, 1, P1, "test", "dropped {}", 1);
        log_warn!(log, 2, P1, "test", "kept {}", 2);
        assert_eq!(log.len(), 1);
        let entry = log.iter().next().map(|e| e.message.as_str());
        assert_eq!(entry, Some("kept 2"));
    }

    #[test]
    fn test_wraparound_keeps_newest() {
        let mut log = LogBuffer::with_level(LogLevel::Trace);
        for i in 0..(LOG_BUFFER_SIZE as u64 + 3) {
            log_debug!(log, i, P1, "test", "entry");
        }
        assert_eq!(log.len(), LOG_BUFFER_SIZE);
        assert_eq!(log.overwritten(), 3);
        assert_eq!(log.iter().next().map(|e| e.ticks), Some(3));
        assert_eq!(log.iter().last().map(|e| e.ticks), Some(LOG_BUFFER_SIZE as u64 + 2));
    }

    #[test]
    fn test_entry_truncation() {
        let long = [b'x'; MAX_LOG_MESSAGE_LEN + 10];
        let text = core::str::from_utf8(&long).unwrap();
        let entry = LogEntry::new(LogLevel::Error, 0, PartitionId::NON_SECURE, "test", text);
        assert_eq!(entry.message.len(), MAX_LOG_MESSAGE_LEN);
    }
}
