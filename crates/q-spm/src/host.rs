// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Host collaborators
//!
//! [`HostRtos`] maps partitions onto std threads with per-thread event flags,
//! and [`HostMemory`] backs the four windows of a [`MemoryLayout`] with byte
//! banks. Together they run the SPM unmodified in host tests and the
//! simulator.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use q_common::{Addr, Error, MemoryLayout, Result, Window, WindowKind};
use zeroize::Zeroize;

use crate::memory::{BumpAllocator, Memory};
use crate::rtos::{MutexAttrs, MutexId, Rtos, ThreadAttrs, ThreadId, Timeout};

/// Smallest stack given to a host thread
const MIN_HOST_STACK: usize = 256 * 1024;

/// Thread ids are unique across every `HostRtos` in the process
static NEXT_THREAD: AtomicU32 = AtomicU32::new(1);

std::thread_local! {
    static CURRENT: Cell<ThreadId> = const { Cell::new(ThreadId::NONE) };
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// RTOS
// ============================================================================

/// RTOS primitives over std threads
pub struct HostRtos {
    flags: Mutex<HashMap<u32, u32>>,
    wake: Condvar,
    mutexes: Mutex<Vec<MutexAttrs>>,
    epoch: Instant,
}

impl HostRtos {
    /// Create a host RTOS
    #[must_use]
    pub fn new() -> Self {
        Self {
            flags: Mutex::new(HashMap::new()),
            wake: Condvar::new(),
            mutexes: Mutex::new(Vec::new()),
            epoch: Instant::now(),
        }
    }

    /// Attributes a mutex was created with
    #[must_use]
    pub fn mutex_attrs(&self, id: MutexId) -> Option<MutexAttrs> {
        let index = usize::try_from(id.0).ok()?.checked_sub(1)?;
        lock(&self.mutexes).get(index).copied()
    }
}

impl Default for HostRtos {
    fn default() -> Self {
        Self::new()
    }
}

impl Rtos for HostRtos {
    fn spawn<F>(&self, attrs: &ThreadAttrs, entry: F) -> Result<ThreadId>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = ThreadId(NEXT_THREAD.fetch_add(1, Ordering::Relaxed));
        std::thread::Builder::new()
            .name(attrs.name.into())
            .stack_size(attrs.stack_size.max(MIN_HOST_STACK))
            .spawn(move || {
                CURRENT.with(|current| current.set(id));
                entry();
            })
            .map_err(|_| Error::TaskCreationFailed)?;
        Ok(id)
    }

    fn current_thread(&self) -> ThreadId {
        CURRENT.with(|current| {
            if !current.get().is_valid() {
                current.set(ThreadId(NEXT_THREAD.fetch_add(1, Ordering::Relaxed)));
            }
            current.get()
        })
    }

    fn create_mutex(&self, attrs: &MutexAttrs) -> Result<MutexId> {
        let mut mutexes = lock(&self.mutexes);
        mutexes.push(*attrs);
        u32::try_from(mutexes.len())
            .map(MutexId)
            .map_err(|_| Error::MutexCreationFailed)
    }

    fn set_flags(&self, thread: ThreadId, flags: u32) {
        *lock(&self.flags).entry(thread.0).or_insert(0) |= flags;
        self.wake.notify_all();
    }

    fn clear_flags(&self, flags: u32) -> u32 {
        let me = self.current_thread().0;
        let mut table = lock(&self.flags);
        let entry = table.entry(me).or_insert(0);
        let previous = *entry;
        *entry &= !flags;
        previous
    }

    fn flags(&self) -> u32 {
        let me = self.current_thread().0;
        lock(&self.flags).get(&me).copied().unwrap_or(0)
    }

    fn wait_any(&self, mask: u32, timeout: Timeout) -> u32 {
        let me = self.current_thread().0;
        let deadline = match timeout {
            Timeout::Ticks(ticks) => Some(Instant::now() + Duration::from_millis(u64::from(ticks))),
            Timeout::Poll | Timeout::Block => None,
        };

        let mut table = lock(&self.flags);
        loop {
            let set = table.get(&me).copied().unwrap_or(0) & mask;
            if set != 0 || timeout == Timeout::Poll {
                return set;
            }
            match deadline {
                None => {
                    table = self.wake.wait(table).unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return 0;
                    }
                    table = self
                        .wake
                        .wait_timeout(table, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    fn ticks(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

// ============================================================================
// Memory
// ============================================================================

struct Bank {
    window: Window,
    bytes: Mutex<Vec<u8>>,
    allocator: Mutex<BumpAllocator>,
}

impl Bank {
    fn new(window: Window) -> Self {
        Self {
            window,
            bytes: Mutex::new(vec![0; window.size as usize]),
            allocator: Mutex::new(BumpAllocator::new(window)),
        }
    }

    /// Offset range of `[addr, addr + len)` if this bank holds all of it
    fn span(&self, addr: Addr, len: usize) -> Option<core::ops::Range<usize>> {
        let len = u32::try_from(len).ok()?;
        let end = addr.checked_add(len)?;
        if !self.window.contains_range(addr, end) {
            return None;
        }
        let start = (addr - self.window.base) as usize;
        Some(start..start + len as usize)
    }
}

/// Byte-addressable memory behind each window of a layout
pub struct HostMemory {
    banks: [Bank; 4],
}

impl HostMemory {
    /// Back every window of `layout`
    #[must_use]
    pub fn new(layout: &MemoryLayout) -> Self {
        Self {
            banks: WindowKind::ALL.map(|kind| Bank::new(layout.window(kind))),
        }
    }

    fn bank(&self, kind: WindowKind) -> &Bank {
        match kind {
            WindowKind::SecureRam => &self.banks[0],
            WindowKind::SecureRom => &self.banks[1],
            WindowKind::NonSecureRam => &self.banks[2],
            WindowKind::NonSecureRom => &self.banks[3],
        }
    }

    fn locate(&self, addr: Addr, len: usize) -> Result<(&Bank, core::ops::Range<usize>)> {
        self.banks
            .iter()
            .find_map(|bank| bank.span(addr, len).map(|span| (bank, span)))
            .ok_or(Error::MemoryAccessViolation)
    }

    /// Reserve `len` zeroed bytes in window `kind`
    ///
    /// # Errors
    /// See [`BumpAllocator::alloc`].
    pub fn alloc(&self, kind: WindowKind, len: u32) -> Result<Addr> {
        lock(&self.bank(kind).allocator).alloc(len, 4)
    }

    /// Reserve a buffer in window `kind` holding `bytes`
    ///
    /// # Errors
    /// See [`BumpAllocator::alloc`].
    pub fn alloc_with(&self, kind: WindowKind, bytes: &[u8]) -> Result<Addr> {
        let len = u32::try_from(bytes.len()).map_err(|_| Error::InvalidParameter)?;
        let addr = self.alloc(kind, len)?;
        self.store(addr, bytes)?;
        Ok(addr)
    }

    /// Copy `len` bytes starting at `addr`
    ///
    /// # Errors
    /// Returns `Error::MemoryAccessViolation` if no window holds the range.
    pub fn dump(&self, addr: Addr, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0; len];
        self.load(addr, &mut out)?;
        Ok(out)
    }

    /// Wipe every bank and release all allocations
    pub fn reset(&self) {
        for bank in &self.banks {
            lock(&bank.bytes).as_mut_slice().zeroize();
            lock(&bank.allocator).reset();
        }
    }
}

impl Memory for HostMemory {
    fn load(&self, addr: Addr, dst: &mut [u8]) -> Result<()> {
        if dst.is_empty() {
            return Ok(());
        }
        let (bank, span) = self.locate(addr, dst.len())?;
        dst.copy_from_slice(&lock(&bank.bytes)[span]);
        Ok(())
    }

    fn store(&self, addr: Addr, src: &[u8]) -> Result<()> {
        if src.is_empty() {
            return Ok(());
        }
        let (bank, span) = self.locate(addr, src.len())?;
        lock(&bank.bytes)[span].copy_from_slice(src);
        Ok(())
    }
}
