// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Quantum allocators.
//!
//! The storage engine is generic over [`QuantumAllocator`]. Three backends
//! are provided:
//!
//! | backend              | quantum size         | mappable |
//! |----------------------|----------------------|----------|
//! | [`SlabCache`]        | fixed object size    | no       |
//! | [`PageAllocator`]    | `PAGE_SIZE << order` | yes      |
//! | [`VmallocAllocator`] | `PAGE_SIZE << order` | yes      |

pub mod pages;
pub mod slab;
pub mod vmalloc;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::config::{BackendKind, Config};
use crate::error::{Result, StorageError};
use crate::storage::page::PageRef;

pub use pages::{PageAllocator, PageBlock};
pub use slab::{SlabCache, SlabObject};
pub use vmalloc::{VmallocAllocator, VmallocBlock};

/// One allocated unit of device storage.
pub trait Quantum: Send + Sync + 'static {
    /// Size in bytes.
    fn size(&self) -> usize;
    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    fn read_at(&self, offset: usize, buf: &mut [u8]);
    /// Copy `data` into the quantum starting at `offset`.
    fn write_at(&mut self, offset: usize, data: &[u8]);
}

/// Obtains and releases quanta, and translates quantum offsets to pages.
pub trait QuantumAllocator: Send + Sync + 'static {
    type Quantum: Quantum;

    fn kind(&self) -> BackendKind;

    /// Bytes per quantum for a device configured with `order`.
    fn quantum_size(&self, order: u32) -> usize;

    /// Allocate one zero-filled quantum.
    fn alloc(&self, order: u32) -> Result<Self::Quantum>;

    fn free(&self, quantum: Self::Quantum);

    /// Pin the page holding byte `offset` of `quantum`.
    fn page_at(&self, _quantum: &Self::Quantum, _offset: usize) -> Option<PageRef> {
        None
    }

    /// Whether quanta can be exposed through memory mappings.
    fn is_mappable(&self) -> bool {
        false
    }

    fn stats(&self) -> AllocStats;
}

/// Allocators that can be built from a [`Config`].
pub trait ConfiguredAllocator: QuantumAllocator + Sized {
    const KIND: BackendKind;

    fn from_config(config: &Config) -> Result<Self>;
}

/// Shared cap on live quantum memory.
#[derive(Debug, Default)]
pub struct MemoryBudget {
    limit: Option<usize>,
    used: AtomicUsize,
}

impl MemoryBudget {
    pub fn new(limit: Option<usize>) -> Arc<Self> {
        Arc::new(Self { limit, used: AtomicUsize::new(0) })
    }

    pub fn unlimited() -> Arc<Self> {
        Self::new(None)
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Reserve `bytes`, failing if that would exceed the limit.
    pub(crate) fn charge(&self, bytes: usize) -> Result<()> {
        let Some(limit) = self.limit else {
            self.used.fetch_add(bytes, Ordering::AcqRel);
            return Ok(());
        };
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= limit)
            })
            .map(|_| ())
            .map_err(|_| StorageError::OutOfMemory { requested: bytes })
    }

    pub(crate) fn release(&self, bytes: usize) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| Some(used.saturating_sub(bytes)));
    }
}

/// Allocation counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AllocStats {
    pub allocated: u64,
    pub freed: u64,
    pub live_bytes: usize,
}

impl AllocStats {
    pub fn live(&self) -> u64 {
        self.allocated.saturating_sub(self.freed)
    }
}

#[derive(Debug, Default)]
pub(crate) struct AllocCounters {
    allocated: AtomicU64,
    freed: AtomicU64,
}

impl AllocCounters {
    pub(crate) fn on_alloc(&self) {
        self.allocated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_free(&self) {
        self.freed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, budget: &MemoryBudget) -> AllocStats {
        AllocStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
            live_bytes: budget.used(),
        }
    }
}

/// Fallibly allocate `len` zeroed bytes.
pub(crate) fn zeroed(len: usize) -> Result<Box<[u8]>> {
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(len)
        .map_err(|_| StorageError::OutOfMemory { requested: len })?;
    bytes.resize(len, 0);
    Ok(bytes.into_boxed_slice())
}
