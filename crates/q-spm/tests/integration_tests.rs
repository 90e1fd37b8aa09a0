// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! End-to-end tests for q-spm
//!
//! Partitions run on real threads over the host collaborators; the test
//! thread plays the non-secure client.

#![cfg(feature = "std")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use q_common::constants::{status, MAX_CHANNELS, VERSION_NONE};
use q_common::{Addr, Error, MinorVersionPolicy, PartitionId, Result, Sid, SpmConfig, Status, WindowKind};
use q_spm::host::{HostMemory, HostRtos};
use q_spm::runtime::{spawn_partition, start_partition, PartitionServer};
use q_spm::{
    Arena, Dispatcher, InVec, MessageIo, Notifications, OutVec, Partition, RHandle, RotService, Service, Spm,
    ThreadPriority, Timeout,
};

type HostSpm = Spm<HostRtos, HostMemory>;

const SERVER: PartitionId = PartitionId::new(1);
const CLIENT: PartitionId = PartitionId::new(2);

const FACTORIAL: Sid = Sid(0x0000_F000);
const SPLICE: Sid = Sid(0x0000_F001);
const REFUSER: Sid = Sid(0x0000_F002);
const SECURE_SUM: Sid = Sid(0x0000_F003);
const RELAXED: Sid = Sid(0x0000_F004);

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Fixtures
// ============================================================================

fn rot(sid: Sid, signal: u32, minor_version: u32, policy: MinorVersionPolicy, allow_nspe: bool) -> RotService {
    RotService::new(sid, signal, minor_version, policy, allow_nspe)
}

fn server_partition() -> Partition {
    let mut p = Partition::new(SERVER, "server", ThreadPriority::Normal);
    p.add_service(rot(FACTORIAL, 0x10, 1, MinorVersionPolicy::Strict, true)).unwrap();
    p.add_service(rot(SPLICE, 0x20, 1, MinorVersionPolicy::Strict, true)).unwrap();
    p.add_service(rot(REFUSER, 0x40, 1, MinorVersionPolicy::Strict, true)).unwrap();
    p.add_service(rot(SECURE_SUM, 0x80, 1, MinorVersionPolicy::Strict, false)).unwrap();
    p.add_service(rot(RELAXED, 0x100, 3, MinorVersionPolicy::Relaxed, true)).unwrap();
    p
}

fn boot(partitions: impl IntoIterator<Item = Partition>) -> Arc<HostSpm> {
    let config = SpmConfig::SIMULATOR;
    let mut spm = Spm::new(config, HostRtos::new(), HostMemory::new(&config.layout)).unwrap();
    for partition in partitions {
        spm.register_partition(partition).unwrap();
    }
    Arc::new(spm)
}

fn ns_buffer(spm: &HostSpm, bytes: &[u8]) -> Addr {
    spm.memory().alloc_with(WindowKind::NonSecureRam, bytes).unwrap()
}

#[derive(Default)]
struct Counters {
    connects: AtomicU32,
    calls: AtomicU32,
    disconnects: AtomicU32,
}

impl Counters {
    fn snapshot(&self) -> (u32, u32, u32) {
        (
            self.connects.load(Ordering::SeqCst),
            self.calls.load(Ordering::SeqCst),
            self.disconnects.load(Ordering::SeqCst),
        )
    }
}

/// Returns n! on the n-th call of a connection, n kept behind the rhandle
struct Factorial {
    calls: Arena<i32, MAX_CHANNELS>,
    counters: Arc<Counters>,
}

impl Service for Factorial {
    fn on_connect(&mut self, msg: &mut dyn MessageIo) -> Result<()> {
        let key = self.calls.insert(0)?;
        msg.set_rhandle(RHandle::from(key));
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_call(&mut self, msg: &mut dyn MessageIo) -> Result<Status> {
        let key = msg.rhandle().key().ok_or(Error::InvalidState)?;
        let n = self.calls.get_mut(key).ok_or(Error::InvalidState)?;
        *n += 1;
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        Ok((1..=*n).product())
    }

    fn on_disconnect(&mut self, msg: &mut dyn MessageIo) {
        if let Some(key) = msg.rhandle().key() {
            self.calls.remove(key);
        }
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Reads 3 bytes, skips 5, reads the rest and writes what it read back
struct Splice {
    steps: Sender<(usize, usize, usize)>,
}

impl Service for Splice {
    fn on_call(&mut self, msg: &mut dyn MessageIo) -> Result<Status> {
        let mut buf = [0u8; 11];
        let first = msg.read(0, &mut buf[..3]);
        let skipped = msg.skip(0, 5);
        let second = msg.read(0, &mut buf[first..]);
        let _ = self.steps.send((first, skipped, second));

        let written = msg.write(0, &buf[..first + second]);
        Ok(written as Status)
    }
}

/// Refuses every connection
struct Refuser {
    counters: Arc<Counters>,
}

impl Service for Refuser {
    fn on_connect(&mut self, _msg: &mut dyn MessageIo) -> Result<()> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        Err(Error::NotPermitted)
    }

    fn on_call(&mut self, _msg: &mut dyn MessageIo) -> Result<Status> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        Ok(status::SUCCESS)
    }
}

/// Sums the bytes of input 0 and reports the caller
struct Sum {
    callers: Sender<PartitionId>,
}

impl Service for Sum {
    fn on_call(&mut self, msg: &mut dyn MessageIo) -> Result<Status> {
        let _ = self.callers.send(msg.message().client);
        let mut buf = [0u8; 16];
        let n = msg.read(0, &mut buf);
        Ok(buf[..n].iter().map(|&b| Status::from(b)).sum())
    }
}

/// Reads a little-endian u32 from input 0 and writes it back plus one
struct Increment;

impl Service for Increment {
    fn on_call(&mut self, msg: &mut dyn MessageIo) -> Result<Status> {
        let mut buf = [0u8; 4];
        let n = msg.read(0, &mut buf);
        if n != buf.len() {
            return Err(Error::BufferTooSmall);
        }
        let value = u32::from_le_bytes(buf) + 1;
        msg.write(0, &value.to_le_bytes());
        Ok(status::SUCCESS)
    }
}

struct Events {
    tx: Sender<&'static str>,
    irqs: Sender<u32>,
}

impl Notifications for Events {
    fn on_doorbell(&mut self) {
        let _ = self.tx.send("doorbell");
    }

    fn on_interrupt(&mut self, signal: u32) {
        let _ = self.irqs.send(signal);
    }
}

struct Started {
    spm: Arc<HostSpm>,
    counters: Arc<Counters>,
    steps: mpsc::Receiver<(usize, usize, usize)>,
    callers: mpsc::Receiver<PartitionId>,
}

/// Boot the server partition with every test service bound
fn start() -> Started {
    let spm = boot([server_partition()]);
    let counters = Arc::new(Counters::default());
    let refusals = Arc::new(Counters::default());
    let (steps_tx, steps) = mpsc::channel();
    let (callers_tx, callers) = mpsc::channel();

    let server = PartitionServer::new()
        .with_service(FACTORIAL, Factorial { calls: Arena::new(), counters: Arc::clone(&counters) })
        .with_service(SPLICE, Splice { steps: steps_tx })
        .with_service(REFUSER, Refuser { counters: refusals })
        .with_service(SECURE_SUM, Sum { callers: callers_tx })
        .with_service(RELAXED, Increment);
    start_partition(&spm, SERVER, server).unwrap();

    Started { spm, counters, steps, callers }
}

// ============================================================================
// Rendezvous
// ============================================================================

mod rendezvous_tests {
    use super::*;
    use q_spm::Memory;

    #[test]
    fn test_factorial_state_follows_rhandle() {
        let Started { spm, counters, .. } = start();

        let handle = spm.connect(FACTORIAL, 1).unwrap();
        let results: Vec<Status> = (0..5).map(|_| spm.call(handle, &[], &mut [])).collect();
        spm.close(handle);

        assert_eq!(results, [1, 2, 6, 24, 120]);
        assert_eq!(counters.snapshot(), (1, 5, 1));
        assert_eq!(spm.live_connections(), 0);
    }

    #[test]
    fn test_connections_keep_separate_state() {
        let Started { spm, .. } = start();

        let a = spm.connect(FACTORIAL, 1).unwrap();
        let b = spm.connect(FACTORIAL, 1).unwrap();
        assert_ne!(a, b);
        assert_eq!(spm.call(a, &[], &mut []), 1);
        assert_eq!(spm.call(a, &[], &mut []), 2);
        assert_eq!(spm.call(b, &[], &mut []), 1);
        assert_eq!(spm.call(a, &[], &mut []), 6);
        spm.close(a);
        spm.close(b);
    }

    #[test]
    fn test_truncated_read_and_write() {
        let Started { spm, steps, .. } = start();
        let input = ns_buffer(&spm, b"hello world");
        let output = spm.memory().alloc(WindowKind::NonSecureRam, 11).unwrap();

        let handle = spm.connect(SPLICE, 1).unwrap();
        let mut outputs = [OutVec::new(output, 11)];
        let status = spm.call(handle, &[InVec::new(input, 11)], &mut outputs);
        spm.close(handle);

        assert_eq!(steps.recv_timeout(RECV_TIMEOUT).unwrap(), (3, 5, 3));
        assert_eq!(status, 6);
        assert_eq!(outputs[0].len, 6);
        assert_eq!(spm.memory().dump(output, 6).unwrap(), b"helrld");
    }

    #[test]
    fn test_write_truncates_to_capacity() {
        let Started { spm, .. } = start();
        let input = ns_buffer(&spm, b"hello world");
        let output = spm.memory().alloc(WindowKind::NonSecureRam, 4).unwrap();

        let handle = spm.connect(SPLICE, 1).unwrap();
        let mut outputs = [OutVec::new(output, 4)];
        let status = spm.call(handle, &[InVec::new(input, 11)], &mut outputs);
        spm.close(handle);

        assert_eq!(status, 4);
        assert_eq!(outputs[0].len, 4);
        assert_eq!(spm.memory().dump(output, 4).unwrap(), b"helr");
    }

    #[test]
    fn test_refused_connection_gets_no_call() {
        let spm = boot([server_partition()]);
        let counters = Arc::new(Counters::default());
        let server = PartitionServer::new().with_service(REFUSER, Refuser { counters: Arc::clone(&counters) });
        start_partition(&spm, SERVER, server).unwrap();

        let err = spm.connect(REFUSER, 1).unwrap_err();
        assert_eq!(err, Error::ConnectionRefused);
        assert_eq!(err.status(), status::CONNECTION_REFUSED);
        assert_eq!(counters.snapshot(), (1, 0, 0));
        assert_eq!(spm.live_connections(), 0);
        assert!(spm.with_log(|log| log.iter().any(|e| e.message.contains("refused"))));
    }

    #[test]
    fn test_unbound_service_refuses_connections() {
        let spm = boot([server_partition()]);
        let counters = Arc::new(Counters::default());
        let server = PartitionServer::new().with_service(FACTORIAL, Factorial {
            calls: Arena::new(),
            counters: Arc::clone(&counters),
        });
        start_partition(&spm, SERVER, server).unwrap();

        let (tx, rx) = mpsc::channel();
        let client = Arc::clone(&spm);
        std::thread::spawn(move || {
            let _ = tx.send(client.connect(SPLICE, 1));
        });
        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Err(Error::ConnectionRefused));
        assert!(spm.with_log(|log| log.iter().any(|e| e.message.contains("no handler"))));

        let handle = spm.connect(FACTORIAL, 1).unwrap();
        assert_eq!(spm.call(handle, &[], &mut []), 1);
        spm.close(handle);
        assert_eq!(counters.snapshot(), (1, 1, 1));
        assert_eq!(spm.live_connections(), 0);
    }

    #[test]
    fn test_close_null_is_noop() {
        let Started { spm, .. } = start();
        spm.close(q_common::Handle::NULL);
        assert_eq!(spm.live_connections(), 0);
    }

    #[test]
    fn test_concurrent_clients() {
        let Started { spm, .. } = start();

        std::thread::scope(|scope| {
            for seed in 0..4u32 {
                let spm = &spm;
                scope.spawn(move || {
                    let input = ns_buffer(spm, &[0; 4]);
                    let output = spm.memory().alloc(WindowKind::NonSecureRam, 4).unwrap();
                    let handle = spm.connect(RELAXED, 3).unwrap();
                    let mut value = seed * 1000;
                    for _ in 0..20 {
                        spm.memory().store(input, &value.to_le_bytes()).unwrap();
                        let mut outputs = [OutVec::new(output, 4)];
                        let status = spm.call(handle, &[InVec::new(input, 4)], &mut outputs);
                        assert_eq!(status, status::SUCCESS);
                        assert_eq!(outputs[0].len, 4);
                        let bytes = spm.memory().dump(output, 4).unwrap();
                        value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    }
                    spm.close(handle);
                    assert_eq!(value, seed * 1000 + 20);
                });
            }
        });

        assert_eq!(spm.live_connections(), 0);
    }

    #[test]
    fn test_channel_pool_exhaustion_is_busy() {
        let Started { spm, .. } = start();

        let handles: Vec<_> = (0..MAX_CHANNELS)
            .map(|_| spm.connect(FACTORIAL, 1).unwrap())
            .collect();
        assert_eq!(spm.connect(FACTORIAL, 1), Err(Error::ConnectionBusy));

        for handle in handles {
            spm.close(handle);
        }
        assert_eq!(spm.live_connections(), 0);
        let handle = spm.connect(FACTORIAL, 1).unwrap();
        spm.close(handle);
    }
}

// ============================================================================
// Connection policy
// ============================================================================

mod policy_tests {
    use super::*;

    #[test]
    fn test_version_query() {
        let Started { spm, .. } = start();
        assert_eq!(spm.version(FACTORIAL), 1);
        assert_eq!(spm.version(RELAXED), 3);
        assert_eq!(spm.version(Sid(0xDEAD)), VERSION_NONE);
        // Hidden from the non-secure world
        assert_eq!(spm.version(SECURE_SUM), VERSION_NONE);
    }

    #[test]
    fn test_strict_version_must_match() {
        let Started { spm, .. } = start();
        assert_eq!(spm.connect(FACTORIAL, 2), Err(Error::ConnectionRefused));
        assert_eq!(spm.connect(FACTORIAL, 0), Err(Error::ConnectionRefused));
        let handle = spm.connect(FACTORIAL, 1).unwrap();
        spm.close(handle);
    }

    #[test]
    fn test_relaxed_accepts_older_clients() {
        let Started { spm, .. } = start();
        for minor in 0..=3 {
            let handle = spm.connect(RELAXED, minor).unwrap();
            spm.close(handle);
        }
        assert_eq!(spm.connect(RELAXED, 4), Err(Error::ConnectionRefused));
    }

    #[test]
    fn test_unknown_and_hidden_services_refused() {
        let Started { spm, callers, .. } = start();
        assert_eq!(spm.connect(Sid(0xDEAD), 1), Err(Error::ConnectionRefused));
        assert_eq!(spm.connect(SECURE_SUM, 1), Err(Error::ConnectionRefused));
        assert!(callers.try_recv().is_err());
        assert_eq!(spm.live_connections(), 0);
    }

    #[test]
    fn test_partition_to_partition_call() {
        let mut client = Partition::new(CLIENT, "client", ThreadPriority::Normal);
        client.allow_sid(SECURE_SUM).unwrap();
        let spm = boot([server_partition(), client]);
        let (callers_tx, callers) = mpsc::channel();
        start_partition(&spm, SERVER, PartitionServer::new().with_service(SECURE_SUM, Sum { callers: callers_tx }))
            .unwrap();

        let (tx, rx) = mpsc::channel();
        spawn_partition(&spm, CLIENT, move |spm| {
            let input = spm.memory().alloc_with(WindowKind::SecureRam, &[2, 3, 4]).unwrap();
            let version = spm.version(SECURE_SUM);
            let handle = spm.connect(SECURE_SUM, 1).unwrap();
            let status = spm.call(handle, &[InVec::new(input, 3)], &mut []);
            spm.close(handle);
            let _ = tx.send((spm.current_partition_id(), version, status));
        })
        .unwrap();

        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), (CLIENT, 1, 9));
        assert_eq!(callers.recv_timeout(RECV_TIMEOUT).unwrap(), CLIENT);
    }

    #[test]
    fn test_partition_outside_extern_list_halts() {
        let client = Partition::new(CLIENT, "client", ThreadPriority::Normal);
        let spm = boot([server_partition(), client]);
        start_partition(&spm, SERVER, PartitionServer::new().with_service(FACTORIAL, Factorial {
            calls: Arena::new(),
            counters: Arc::default(),
        }))
        .unwrap();

        let (tx, rx) = mpsc::channel();
        spawn_partition(&spm, CLIENT, move |spm| {
            let outcome = catch_unwind(AssertUnwindSafe(|| spm.connect(FACTORIAL, 1)));
            let message = outcome.err().and_then(|payload| payload.downcast_ref::<String>().cloned());
            let _ = tx.send(message);
        })
        .unwrap();

        let message = rx.recv_timeout(RECV_TIMEOUT).unwrap().unwrap();
        assert!(message.contains("not permitted"), "{message}");
    }

    #[test]
    fn test_partition_start_errors() {
        let spm = boot([server_partition()]);
        assert_eq!(
            start_partition(&spm, CLIENT, PartitionServer::new()).unwrap_err(),
            Error::PartitionNotFound
        );
        assert_eq!(
            start_partition(&spm, SERVER, PartitionServer::new().with_service(Sid(0xDEAD), Increment))
                .unwrap_err(),
            Error::ServiceNotFound
        );
        assert_eq!(
            start_partition(
                &spm,
                SERVER,
                PartitionServer::new().with_service(RELAXED, Increment).with_service(RELAXED, Increment)
            )
            .unwrap_err(),
            Error::DuplicateService
        );
        let crowded = (0..9).fold(PartitionServer::new(), |server, _| server.with_service(RELAXED, Increment));
        assert_eq!(start_partition(&spm, SERVER, crowded).unwrap_err(), Error::ResourceExhausted);
        start_partition(&spm, SERVER, PartitionServer::new().with_service(RELAXED, Increment)).unwrap();
        assert_eq!(
            start_partition(&spm, SERVER, PartitionServer::new()).unwrap_err(),
            Error::PartitionAlreadyStarted
        );
    }
}

// ============================================================================
// Doorbells and interrupts
// ============================================================================

mod notification_tests {
    use super::*;

    fn start_events(partition: Partition) -> (Arc<HostSpm>, mpsc::Receiver<&'static str>, mpsc::Receiver<u32>) {
        let id = partition.id;
        let spm = boot([partition]);
        let (tx, doorbells) = mpsc::channel();
        let (irq_tx, irqs) = mpsc::channel();
        start_partition(&spm, id, PartitionServer::new().with_notifications(Events { tx, irqs: irq_tx })).unwrap();
        (spm, doorbells, irqs)
    }

    #[test]
    fn test_doorbell_delivered_and_cleared() {
        let (spm, doorbells, _) = start_events(Partition::new(SERVER, "events", ThreadPriority::Normal));

        spm.notify(SERVER);
        assert_eq!(doorbells.recv_timeout(RECV_TIMEOUT).unwrap(), "doorbell");
        spm.notify(SERVER);
        assert_eq!(doorbells.recv_timeout(RECV_TIMEOUT).unwrap(), "doorbell");
    }

    #[test]
    fn test_interrupt_routed_to_owner() {
        let mut partition = Partition::new(SERVER, "events", ThreadPriority::High);
        partition.add_irq(7, 0x200).unwrap();
        let (spm, _, irqs) = start_events(partition);

        spm.raise_irq(7).unwrap();
        assert_eq!(irqs.recv_timeout(RECV_TIMEOUT).unwrap(), 0x200);
        assert_eq!(spm.raise_irq(8), Err(Error::NotFound));
    }

    #[test]
    fn test_interrupt_before_start() {
        let mut partition = Partition::new(SERVER, "events", ThreadPriority::Normal);
        partition.add_irq(3, 0x10).unwrap();
        let spm = boot([partition]);
        assert_eq!(spm.raise_irq(3), Err(Error::InvalidState));
    }

    #[test]
    fn test_empty_dispatcher_still_blocks() {
        let spm = boot([Partition::new(SERVER, "idle", ThreadPriority::Normal)]);
        let (idle_tx, idle) = mpsc::channel();
        let (rang_tx, rang) = mpsc::channel();
        spawn_partition(&spm, SERVER, move |spm| {
            let mut dispatcher = Dispatcher::new();
            let started = Instant::now();
            let handled = spm.serve_once(&mut dispatcher, Timeout::Ticks(50));
            let _ = idle_tx.send((handled, started.elapsed()));
            let _ = rang_tx.send(spm.serve_once(&mut dispatcher, Timeout::Block));
        })
        .unwrap();

        let (handled, waited) = idle.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(handled, 0);
        assert!(waited >= Duration::from_millis(50), "{waited:?}");

        spm.notify(SERVER);
        assert_eq!(rang.recv_timeout(RECV_TIMEOUT).unwrap(), 1);
    }

    #[test]
    #[should_panic(expected = "unknown partition")]
    fn test_notify_unknown_partition_halts() {
        let (spm, _, _) = start_events(Partition::new(SERVER, "events", ThreadPriority::Normal));
        spm.notify(PartitionId::new(5));
    }
}

// ============================================================================
// Fatal violations
// ============================================================================

mod fatal_tests {
    use super::*;
    use q_common::constants::MAX_IOVEC;
    use q_common::log::LogLevel;

    const FACTORIAL_SIGNAL: u32 = 0x10;

    /// Run `body` as the server partition while `client` drives it from a
    /// non-secure thread, returning the message the partition halted with
    ///
    /// The client thread is left blocked if the server halts mid-message.
    fn server_halt<B, C>(partition: Partition, body: B, client: C) -> String
    where
        B: FnOnce(&HostSpm) + Send + 'static,
        C: FnOnce(&HostSpm) + Send + 'static,
    {
        let spm = boot([partition]);
        let (tx, rx) = mpsc::channel();
        spawn_partition(&spm, SERVER, move |spm| {
            let outcome = catch_unwind(AssertUnwindSafe(|| body(&*spm)));
            let message = outcome.err().and_then(|payload| payload.downcast_ref::<String>().cloned());
            let _ = tx.send(message);
        })
        .unwrap();

        let worker = Arc::clone(&spm);
        std::thread::spawn(move || client(&*worker));

        let message = rx.recv_timeout(RECV_TIMEOUT).unwrap().unwrap();
        let logged = spm.with_log(|log| {
            log.iter()
                .any(|e| e.level == LogLevel::Error && message.contains(e.message.as_str()))
        });
        assert!(logged, "{message} not logged");
        message
    }

    fn accept_connect(spm: &HostSpm) {
        let signal = spm.wait(FACTORIAL_SIGNAL, Timeout::Block);
        let msg = spm.get(signal);
        spm.reply(msg.handle, status::SUCCESS);
    }

    fn connect_and_call(spm: &HostSpm) {
        let handle = spm.connect(FACTORIAL, 1).unwrap();
        spm.call(handle, &[], &mut []);
    }

    #[test]
    fn test_read_on_connect_halts() {
        let message = server_halt(
            server_partition(),
            |spm| {
                let signal = spm.wait(FACTORIAL_SIGNAL, Timeout::Block);
                let msg = spm.get(signal);
                let mut buf = [0u8; 4];
                spm.read(msg.handle, 0, &mut buf);
            },
            |spm| {
                let _ = spm.connect(FACTORIAL, 1);
            },
        );
        assert!(message.contains("iovec access on message type 1"), "{message}");
    }

    #[test]
    fn test_write_on_disconnect_halts() {
        let message = server_halt(
            server_partition(),
            |spm| {
                accept_connect(spm);
                let signal = spm.wait(FACTORIAL_SIGNAL, Timeout::Block);
                let msg = spm.get(signal);
                spm.write(msg.handle, 0, b"late");
            },
            |spm| {
                let handle = spm.connect(FACTORIAL, 1).unwrap();
                spm.close(handle);
            },
        );
        assert!(message.contains("iovec access on message type 3"), "{message}");
    }

    #[test]
    fn test_iovec_index_out_of_range_halts() {
        let message = server_halt(
            server_partition(),
            |spm| {
                accept_connect(spm);
                let signal = spm.wait(FACTORIAL_SIGNAL, Timeout::Block);
                let msg = spm.get(signal);
                spm.skip(msg.handle, MAX_IOVEC, 1);
            },
            connect_and_call,
        );
        assert!(message.contains("iovec index 4 out of range"), "{message}");
    }

    #[test]
    fn test_get_on_drained_signal_halts() {
        let message = server_halt(
            server_partition(),
            |spm| {
                spm.get(FACTORIAL_SIGNAL);
            },
            |_| {},
        );
        assert!(message.contains("no message pending on signal 0x00000010"), "{message}");
    }

    #[test]
    fn test_get_on_signal_set_halts() {
        let message = server_halt(
            server_partition(),
            |spm| {
                spm.get(0x30);
            },
            |_| {},
        );
        assert!(message.contains("0x00000030 is not a single bit"), "{message}");
    }

    #[test]
    fn test_wait_on_foreign_mask_halts() {
        let message = server_halt(
            server_partition(),
            |spm| {
                spm.wait(FACTORIAL_SIGNAL | 0x0010_0000, Timeout::Poll);
            },
            |_| {},
        );
        assert!(message.contains("signal 0x00100000 not owned by partition"), "{message}");
    }

    #[test]
    fn test_wait_on_empty_mask_halts() {
        let message = server_halt(
            server_partition(),
            |spm| {
                spm.wait(0, Timeout::Poll);
            },
            |_| {},
        );
        assert!(message.contains("signal 0x00000000 not owned"), "{message}");
    }

    #[test]
    fn test_double_reply_halts() {
        let message = server_halt(
            server_partition(),
            |spm| {
                let signal = spm.wait(FACTORIAL_SIGNAL, Timeout::Block);
                let msg = spm.get(signal);
                spm.reply(msg.handle, status::SUCCESS);
                spm.reply(msg.handle, status::SUCCESS);
            },
            |spm| {
                let _ = spm.connect(FACTORIAL, 1);
            },
        );
        assert!(message.contains("not found"), "{message}");
    }

    #[test]
    fn test_connect_reply_with_call_status_halts() {
        let message = server_halt(
            server_partition(),
            |spm| {
                let signal = spm.wait(FACTORIAL_SIGNAL, Timeout::Block);
                let msg = spm.get(signal);
                spm.reply(msg.handle, status::ERROR_GENERIC);
            },
            |spm| {
                let _ = spm.connect(FACTORIAL, 1);
            },
        );
        assert!(message.contains("invalid connect reply status -132"), "{message}");
    }

    #[test]
    fn test_clear_without_doorbell_halts() {
        let message = server_halt(server_partition(), |spm| spm.clear(), |_| {});
        assert!(message.contains("doorbell of P1 not asserted"), "{message}");
    }

    #[test]
    fn test_eoi_on_service_signal_halts() {
        let message = server_halt(server_partition(), |spm| spm.eoi(FACTORIAL_SIGNAL), |_| {});
        assert!(message.contains("irq signal 0x00000010 not owned"), "{message}");
    }

    #[test]
    fn test_eoi_on_idle_interrupt_halts() {
        let mut partition = server_partition();
        partition.add_irq(9, 0x400).unwrap();
        let message = server_halt(partition, |spm| spm.eoi(0x400), |_| {});
        assert!(message.contains("irq signal 0x00000400 not asserted"), "{message}");
    }

    #[test]
    fn test_handle_violation_is_logged() {
        let Started { spm, .. } = start();
        let handle = spm.connect(FACTORIAL, 1).unwrap();
        spm.close(handle);

        let outcome = catch_unwind(AssertUnwindSafe(|| spm.close(handle)));
        assert!(outcome.is_err());
        assert!(spm.with_log(|log| {
            log.iter()
                .any(|e| e.level == LogLevel::Error && e.message.contains("not found"))
        }));
    }

    #[test]
    #[should_panic(expected = "outside the caller's domain")]
    fn test_non_secure_call_with_secure_buffer() {
        let Started { spm, .. } = start();
        let secret = spm.memory().alloc_with(WindowKind::SecureRam, b"key").unwrap();
        let handle = spm.connect(SPLICE, 1).unwrap();
        spm.call(handle, &[InVec::new(secret, 3)], &mut []);
    }

    #[test]
    #[should_panic(expected = "outside the caller's domain")]
    fn test_output_outside_any_window() {
        let Started { spm, .. } = start();
        let handle = spm.connect(SPLICE, 1).unwrap();
        spm.call(handle, &[], &mut [OutVec::new(0x10, 4)]);
    }

    #[test]
    #[should_panic(expected = "operation on null handle")]
    fn test_call_on_null_handle() {
        let Started { spm, .. } = start();
        spm.call(q_common::Handle::NULL, &[], &mut []);
    }

    #[test]
    #[should_panic(expected = "not found")]
    fn test_call_after_close() {
        let Started { spm, .. } = start();
        let handle = spm.connect(FACTORIAL, 1).unwrap();
        spm.close(handle);
        spm.call(handle, &[], &mut []);
    }

    #[test]
    #[should_panic(expected = "too many iovecs (3 in, 2 out)")]
    fn test_too_many_iovecs() {
        let Started { spm, .. } = start();
        let handle = spm.connect(SPLICE, 1).unwrap();
        spm.call(handle, &[InVec::EMPTY; 3], &mut [OutVec::EMPTY; 2]);
    }

    #[test]
    #[should_panic(expected = "exceeds budget")]
    fn test_iovec_budget() {
        let Started { spm, .. } = start();
        let budget = spm.config().iovec_budget;
        let input = spm.memory().alloc(WindowKind::NonSecureRam, budget).unwrap();
        let output = spm.memory().alloc(WindowKind::NonSecureRam, 1).unwrap();
        let handle = spm.connect(SPLICE, 1).unwrap();
        spm.call(handle, &[InVec::new(input, budget)], &mut [OutVec::new(output, 1)]);
    }

    #[test]
    #[should_panic(expected = "caller is not a partition")]
    fn test_server_api_from_non_secure() {
        let Started { spm, .. } = start();
        spm.wait(0x10, Timeout::Poll);
    }
}
