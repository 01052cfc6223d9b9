// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Quantum-set storage device.
//!
//! A [`Device`] owns a chain of quantum sets behind one mutex. Reads, writes,
//! trims and tunable changes take that mutex through an interruptible wait:
//! if the caller's [`Signal`] is raised while the lock is still held
//! elsewhere, the call returns [`StorageError::Interrupted`] without having
//! touched the device.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::config::{BackendKind, Tunables};
use crate::error::{Result, StorageError};
use crate::storage::alloc::{Quantum, QuantumAllocator};
use crate::storage::qset::{Geometry, QSet};

/// How long a blocked caller sleeps on the mutex before re-checking its signal.
const LOCK_POLL: Duration = Duration::from_millis(2);

/// Cancellation token for blocking lock waits.
#[derive(Debug, Clone, Default)]
pub struct Signal(Arc<AtomicBool>);

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub(crate) struct DeviceState<Q> {
    pub(crate) geometry: Geometry,
    pub(crate) tunables: Tunables,
    pub(crate) size: u64,
    pub(crate) active_mappings: usize,
    pub(crate) head: QSet<Q>,
}

/// Point-in-time view of a device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStats {
    pub minor: usize,
    pub backend: BackendKind,
    pub size: u64,
    pub geometry: Geometry,
    pub tunables: Tunables,
    pub sets: usize,
    pub slot_arrays: usize,
    pub quanta: usize,
    pub active_mappings: usize,
}

impl fmt::Display for DeviceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dev{} [{}]: {} bytes, quantum {} x qset {} (order {}), {} set(s), {} quanta, {} mapping(s)",
            self.minor,
            self.backend,
            self.size,
            self.geometry.quantum,
            self.geometry.qset,
            self.geometry.order,
            self.sets,
            self.quanta,
            self.active_mappings
        )
    }
}

pub struct Device<A: QuantumAllocator> {
    minor: usize,
    defaults: Tunables,
    allocator: Arc<A>,
    state: Mutex<DeviceState<A::Quantum>>,
}

impl<A: QuantumAllocator> Device<A> {
    /// Create an empty device. `defaults` is what [`Device::reset_tunables`]
    /// returns to.
    pub fn new(minor: usize, allocator: Arc<A>, defaults: Tunables) -> Result<Self> {
        defaults.validate()?;
        defaults.validate_for(allocator.quantum_size(defaults.order))?;
        let geometry = geometry_for(allocator.as_ref(), defaults);
        Ok(Self {
            minor,
            defaults,
            allocator,
            state: Mutex::new(DeviceState {
                geometry,
                tunables: defaults,
                size: 0,
                active_mappings: 0,
                head: QSet::new(),
            }),
        })
    }

    pub fn minor(&self) -> usize {
        self.minor
    }

    pub fn allocator(&self) -> &Arc<A> {
        &self.allocator
    }

    pub(crate) fn lock(&self, signal: &Signal) -> Result<MutexGuard<'_, DeviceState<A::Quantum>>> {
        loop {
            if let Some(guard) = self.state.try_lock_for(LOCK_POLL) {
                return Ok(guard);
            }
            if signal.is_raised() {
                debug!(minor = self.minor, "Lock wait interrupted");
                return Err(StorageError::Interrupted);
            }
        }
    }

    pub(crate) fn lock_uninterruptible(&self) -> MutexGuard<'_, DeviceState<A::Quantum>> {
        self.state.lock()
    }

    /// Read at most one quantum's worth of bytes at `offset`.
    ///
    /// Returns `Ok(0)` at or past the end of data and on holes.
    pub fn read_at(&self, signal: &Signal, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let state = self.lock(signal)?;
        if offset >= state.size || buf.is_empty() {
            return Ok(0);
        }
        let available = usize::try_from(state.size - offset).unwrap_or(usize::MAX);
        let geometry = state.geometry;
        let pos = geometry.locate(offset);

        let Some(quantum) = state.head.walk(pos.item).and_then(|set| set.quantum(pos.s_pos)) else {
            trace!(minor = self.minor, offset, item = pos.item, s_pos = pos.s_pos, "Read hit a hole");
            return Ok(0);
        };

        let count = buf.len().min(available).min(geometry.remaining_in_quantum(pos.q_pos));
        quantum.read_at(pos.q_pos, &mut buf[..count]);
        Ok(count)
    }

    /// Write at most one quantum's worth of bytes at `offset`, allocating
    /// the set, slot array and quantum on demand.
    pub fn write_at(&self, signal: &Signal, offset: u64, data: &[u8]) -> Result<usize> {
        offset
            .checked_add(data.len() as u64)
            .ok_or(StorageError::InvalidOffset { offset, len: data.len() })?;
        let mut guard = self.lock(signal)?;
        if data.is_empty() {
            return Ok(0);
        }
        let state = &mut *guard;
        let geometry = state.geometry;
        let pos = geometry.locate(offset);

        let slots = state.head.follow(pos.item).slots_or_alloc(geometry.qset)?;
        let slot = &mut slots[pos.s_pos];
        let quantum = match slot.take() {
            Some(quantum) => slot.insert(quantum),
            None => {
                let quantum = self.allocator.alloc(geometry.order)?;
                debug!(
                    minor = self.minor,
                    item = pos.item,
                    s_pos = pos.s_pos,
                    bytes = quantum.size(),
                    "Quantum allocated"
                );
                slot.insert(quantum)
            }
        };

        let count = data.len().min(geometry.remaining_in_quantum(pos.q_pos));
        quantum.write_at(pos.q_pos, &data[..count]);
        state.size = state.size.max(offset + count as u64);
        Ok(count)
    }

    /// Release all storage and apply the current tunables.
    ///
    /// Fails with [`StorageError::Busy`] while the device is mapped.
    pub fn trim(&self, signal: &Signal) -> Result<()> {
        let mut state = self.lock(signal)?;
        self.trim_locked(&mut state)
    }

    pub(crate) fn trim_locked(&self, state: &mut DeviceState<A::Quantum>) -> Result<()> {
        if state.active_mappings > 0 {
            warn!(minor = self.minor, mappings = state.active_mappings, "Trim refused, device is mapped");
            return Err(StorageError::Busy { mappings: state.active_mappings });
        }
        let (sets, quanta) = state.head.release(|quantum| self.allocator.free(quantum));
        let previous = state.size;
        state.size = 0;
        state.geometry = geometry_for(self.allocator.as_ref(), state.tunables);
        info!(
            minor = self.minor,
            previous_size = previous,
            sets,
            quanta,
            quantum = state.geometry.quantum,
            qset = state.geometry.qset,
            "Device trimmed"
        );
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.lock_uninterruptible().size
    }

    /// Geometry currently used for addressing.
    pub fn geometry(&self) -> Geometry {
        self.lock_uninterruptible().geometry
    }

    /// Tunables that the next trim will apply.
    pub fn tunables(&self) -> Tunables {
        self.lock_uninterruptible().tunables
    }

    /// Set the allocation order, returning the previous one.
    pub fn set_order(&self, signal: &Signal, order: u32) -> Result<u32> {
        self.update_tunables(signal, |t| Tunables { order, ..t }).map(|prev| prev.order)
    }

    /// Set the quanta per set, returning the previous value.
    pub fn set_qset(&self, signal: &Signal, qset: usize) -> Result<usize> {
        self.update_tunables(signal, |t| Tunables { qset, ..t }).map(|prev| prev.qset)
    }

    /// Go back to the tunables the device was created with.
    pub fn reset_tunables(&self, signal: &Signal) -> Result<()> {
        let defaults = self.defaults;
        self.update_tunables(signal, |_| defaults).map(|_| ())
    }

    fn update_tunables(&self, signal: &Signal, f: impl FnOnce(Tunables) -> Tunables) -> Result<Tunables> {
        let mut state = self.lock(signal)?;
        let next = f(state.tunables);
        next.validate()?;
        next.validate_for(geometry_for(self.allocator.as_ref(), next).quantum)?;
        let previous = std::mem::replace(&mut state.tunables, next);
        debug!(minor = self.minor, ?previous, ?next, "Tunables updated");
        Ok(previous)
    }

    pub fn active_mappings(&self) -> usize {
        self.lock_uninterruptible().active_mappings
    }

    pub fn stats(&self) -> DeviceStats {
        let state = self.lock_uninterruptible();
        DeviceStats {
            minor: self.minor,
            backend: self.allocator.kind(),
            size: state.size,
            geometry: state.geometry,
            tunables: state.tunables,
            sets: state.head.set_count(),
            slot_arrays: state.head.slot_array_count(),
            quanta: state.head.quantum_count(),
            active_mappings: state.active_mappings,
        }
    }
}

impl<A: QuantumAllocator> Drop for Device<A> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let (sets, quanta) = state.head.release(|quantum| self.allocator.free(quantum));
        if quanta > 0 {
            debug!(minor = self.minor, sets, quanta, "Device storage released on teardown");
        }
    }
}

fn geometry_for<A: QuantumAllocator>(allocator: &A, tunables: Tunables) -> Geometry {
    Geometry {
        quantum: allocator.quantum_size(tunables.order),
        qset: tunables.qset,
        order: match allocator.kind() {
            BackendKind::Slab => 0,
            BackendKind::Pages | BackendKind::Vmalloc => tunables.order,
        },
    }
}
