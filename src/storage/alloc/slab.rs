// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Fixed-size object cache shared by every device of the slab backend.
//!
//! Released objects go back onto a bounded free list and are handed out
//! again (zero-filled) before any fresh allocation is made.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{zeroed, AllocCounters, AllocStats, ConfiguredAllocator, MemoryBudget, Quantum, QuantumAllocator};
use crate::config::{BackendKind, Config};
use crate::error::{Result, StorageError};

const DEFAULT_MAX_FREE: usize = 64;

pub struct SlabObject(Box<[u8]>);

impl Quantum for SlabObject {
    fn size(&self) -> usize {
        self.0.len()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.0[offset..offset + buf.len()]);
    }

    fn write_at(&mut self, offset: usize, data: &[u8]) {
        self.0[offset..offset + data.len()].copy_from_slice(data);
    }
}

pub struct SlabCache {
    object_size: usize,
    free: Mutex<Vec<Box<[u8]>>>,
    max_free: usize,
    budget: Arc<MemoryBudget>,
    counters: AllocCounters,
}

impl SlabCache {
    pub fn new(object_size: usize, budget: Arc<MemoryBudget>) -> Result<Self> {
        if object_size == 0 {
            return Err(StorageError::InvalidConfig("slab object size must be > 0".into()));
        }
        Ok(Self {
            object_size,
            free: Mutex::new(Vec::new()),
            max_free: DEFAULT_MAX_FREE,
            budget,
            counters: AllocCounters::default(),
        })
    }

    /// Cap the number of released objects kept for reuse.
    pub fn with_max_free(mut self, max_free: usize) -> Self {
        self.max_free = max_free;
        self
    }

    pub fn object_size(&self) -> usize {
        self.object_size
    }

    /// Objects currently parked on the free list.
    pub fn cached_objects(&self) -> usize {
        self.free.lock().len()
    }
}

impl QuantumAllocator for SlabCache {
    type Quantum = SlabObject;

    fn kind(&self) -> BackendKind {
        BackendKind::Slab
    }

    fn quantum_size(&self, _order: u32) -> usize {
        self.object_size
    }

    fn alloc(&self, _order: u32) -> Result<SlabObject> {
        self.budget.charge(self.object_size)?;
        let recycled = self.free.lock().pop();
        let bytes = match recycled {
            Some(mut bytes) => {
                bytes.fill(0);
                bytes
            }
            None => zeroed(self.object_size).inspect_err(|_| self.budget.release(self.object_size))?,
        };
        self.counters.on_alloc();
        Ok(SlabObject(bytes))
    }

    fn free(&self, quantum: SlabObject) {
        self.budget.release(self.object_size);
        self.counters.on_free();
        let mut free = self.free.lock();
        if free.len() < self.max_free {
            free.push(quantum.0);
        } else {
            debug!(size = self.object_size, "Slab free list full, releasing object");
        }
    }

    fn stats(&self) -> AllocStats {
        self.counters.snapshot(&self.budget)
    }
}

impl ConfiguredAllocator for SlabCache {
    const KIND: BackendKind = BackendKind::Slab;

    fn from_config(config: &Config) -> Result<Self> {
        SlabCache::new(config.backend.quantum, MemoryBudget::new(config.memory_limit()))
    }
}
