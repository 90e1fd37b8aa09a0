// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Tests for q-common
//!
//! Shared types, error handling, configuration and the log ring.

#![cfg(test)]

mod types_tests {
    use q_common::{is_single_signal, Handle, PartitionId, Sid};

    #[test]
    fn test_partition_id_domains() {
        assert!(!PartitionId::NON_SECURE.is_secure());
        assert!(PartitionId::new(0).is_secure());
        assert_eq!(PartitionId::new(3).raw(), 3);
        assert_eq!(PartitionId::NON_SECURE.to_string(), "NSPE");
        assert_eq!(PartitionId::new(3).to_string(), "P3");
    }

    #[test]
    fn test_handle_and_sid_display() {
        assert!(Handle::NULL.is_null());
        assert!(!Handle(7).is_null());
        assert_eq!(Handle(7).to_string(), "#7");
        assert_eq!(Sid::new(0xF000).to_string(), "SID 0x0000F000");
    }

    #[test]
    fn test_single_signal() {
        assert!(is_single_signal(0x10));
        assert!(is_single_signal(0x8000_0000));
        assert!(!is_single_signal(0));
        assert!(!is_single_signal(0x30));
    }
}

mod error_tests {
    use std::collections::HashSet;

    use q_common::constants::status;
    use q_common::Error;

    const ALL: [Error; 24] = [
        Error::ConnectionRefused,
        Error::ConnectionBusy,
        Error::ResourceExhausted,
        Error::WouldBlock,
        Error::PartitionNotFound,
        Error::ServiceNotFound,
        Error::DuplicatePartition,
        Error::DuplicateService,
        Error::InvalidSignal,
        Error::TaskCreationFailed,
        Error::MutexCreationFailed,
        Error::PartitionAlreadyStarted,
        Error::MemoryAllocationFailed,
        Error::InvalidMemoryLayout,
        Error::RegionOrdering,
        Error::MemoryAccessViolation,
        Error::BufferTooSmall,
        Error::InvalidParameter,
        Error::Timeout,
        Error::NotPermitted,
        Error::NotSupported,
        Error::InternalError,
        Error::InvalidState,
        Error::NotFound,
    ];

    #[test]
    fn test_error_codes_unique() {
        let codes: HashSet<u16> = ALL.iter().map(Error::code).collect();
        assert_eq!(codes.len(), ALL.len());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(Error::ConnectionBusy.code() >> 8, 0x01);
        assert_eq!(Error::DuplicateService.code() >> 8, 0x02);
        assert_eq!(Error::RegionOrdering.code() >> 8, 0x03);
        assert_eq!(Error::NotFound.code() >> 8, 0xFF);
    }

    #[test]
    fn test_every_error_maps_to_a_negative_status() {
        for err in ALL {
            assert!(err.status() < 0, "{err}");
        }
        assert_eq!(Error::ConnectionRefused.status(), status::CONNECTION_REFUSED);
        assert_eq!(Error::ConnectionBusy.status(), status::CONNECTION_BUSY);
        assert_eq!(Error::BufferTooSmall.status(), status::ERROR_BUFFER_TOO_SMALL);
        assert_eq!(Error::InternalError.status(), status::ERROR_GENERIC);
    }

    #[test]
    fn test_refusals() {
        assert!(Error::ConnectionRefused.is_refusal());
        assert!(Error::ConnectionBusy.is_refusal());
        assert!(!Error::NotPermitted.is_refusal());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(Error::ConnectionRefused.to_string(), "[0x0101] connection refused");
        for err in ALL {
            assert!(!err.description().is_empty());
        }
    }
}

mod config_tests {
    use q_common::config::{MemoryLayout, SpmConfig, Window, WindowKind};
    use q_common::log::LogLevel;
    use q_common::Error;

    #[test]
    fn test_presets_validate() {
        SpmConfig::DEFAULT.validate().unwrap();
        SpmConfig::SIMULATOR.validate().unwrap();
        assert_eq!(SpmConfig::default(), SpmConfig::DEFAULT);
        assert_eq!(SpmConfig::SIMULATOR.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_config_validation() {
        let mut config = SpmConfig::SIMULATOR;
        config.partition_stack_size = 0;
        assert_eq!(config.validate(), Err(Error::InvalidParameter));

        let mut config = SpmConfig::SIMULATOR;
        config.layout.non_secure_ram = config.layout.secure_ram;
        assert_eq!(config.validate(), Err(Error::InvalidMemoryLayout));
    }

    #[test]
    fn test_layout_windows() {
        let layout = MemoryLayout::STM32U5;
        for kind in WindowKind::ALL {
            let window = layout.window(kind);
            assert!(window.end().is_some());
            assert_eq!(kind.is_secure(), matches!(kind, WindowKind::SecureRam | WindowKind::SecureRom));
        }
        assert_eq!(layout.window(WindowKind::SecureRam), layout.secure_ram);
    }

    #[test]
    fn test_window_edges() {
        let window = Window::new(0x1000, 0x100);
        assert!(window.contains_range(0x1000, 0x1100));
        assert!(!window.contains_range(0x1000, 0x1101));
        assert!(!window.contains_range(0x0FFF, 0x1000));
        assert!(window.overlaps(&Window::new(0x10FF, 0x10)));
        assert!(!window.overlaps(&Window::new(0x1100, 0x10)));
        assert_eq!(Window::new(0xFFFF_FF00, 0x200).end(), None);
    }
}

mod version_tests {
    use q_common::MinorVersionPolicy;

    #[test]
    fn test_strict_requires_equality() {
        let policy = MinorVersionPolicy::Strict;
        assert!(policy.accepts(2, 2));
        assert!(!policy.accepts(2, 1));
        assert!(!policy.accepts(2, 3));
    }

    #[test]
    fn test_relaxed_accepts_older() {
        let policy = MinorVersionPolicy::Relaxed;
        assert!(policy.accepts(2, 0));
        assert!(policy.accepts(2, 2));
        assert!(!policy.accepts(2, 3));
    }

    #[test]
    fn test_default_is_strict() {
        assert_eq!(MinorVersionPolicy::default(), MinorVersionPolicy::Strict);
    }
}

mod log_tests {
    use q_common::log::{LogBuffer, LogLevel, LOG_BUFFER_SIZE, MAX_LOG_MESSAGE_LEN};
    use q_common::{log_debug, log_warn, PartitionId};

    #[test]
    fn test_level_filter() {
        let mut log = LogBuffer::with_level(LogLevel::Warn);
        log_debug!(log, 1, PartitionId::NON_SECURE, "test", "dropped");
        log_warn!(log, 2, PartitionId::new(1), "test", "kept {}", 7);
        assert_eq!(log.len(), 1);

        let entry = log.iter().next().unwrap();
        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.partition, PartitionId::new(1));
        assert_eq!(entry.message.as_str(), "kept 7");
    }

    #[test]
    fn test_ring_overwrites_oldest() {
        let mut log = LogBuffer::new();
        for i in 0..LOG_BUFFER_SIZE + 3 {
            log_warn!(log, i as u64, PartitionId::NON_SECURE, "test", "entry {}", i);
        }
        assert_eq!(log.len(), LOG_BUFFER_SIZE);
        assert_eq!(log.overwritten(), 3);
        assert_eq!(log.iter().next().unwrap().message.as_str(), "entry 3");
    }

    #[test]
    fn test_long_message_truncated() {
        let mut log = LogBuffer::new();
        let long = "x".repeat(MAX_LOG_MESSAGE_LEN * 2);
        log_warn!(log, 0, PartitionId::NON_SECURE, "test", "{}", long);
        assert!(log.iter().next().unwrap().message.len() <= MAX_LOG_MESSAGE_LEN);
    }
}

mod constants_tests {
    use q_common::constants::{
        msg_type, status, DOORBELL_SIGNAL, REPLY_SIGNAL, RESERVED_SIGNALS, START_SIGNAL,
    };

    #[test]
    fn test_reserved_signals() {
        for signal in [START_SIGNAL, REPLY_SIGNAL, DOORBELL_SIGNAL] {
            assert_eq!(signal & RESERVED_SIGNALS, signal);
        }
    }

    #[test]
    fn test_message_types_distinct() {
        assert_ne!(msg_type::CONNECT, msg_type::CALL);
        assert_ne!(msg_type::CALL, msg_type::DISCONNECT);
        assert!(status::CONNECTION_REFUSED < 0);
    }
}
