// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Demand-paged mappings of device storage.
//!
//! Mapping a device only records the region and bumps the device's mapping
//! count; pages are looked up one at a time when [`Mapping::fault`] is
//! called for an address inside the region. A fault never allocates: an
//! address backed by a hole, or past the end of data, yields
//! [`StorageError::NoPage`].
//!
//! Only order-0 devices can be mapped. A fault pins exactly one page, while
//! the caller unmaps (and unpins) page by page, so handing out pages of a
//! multi-page quantum would unbalance its reference count.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::device::{Device, DeviceState};
use crate::error::{Result, StorageError};
use crate::storage::alloc::QuantumAllocator;
use crate::storage::page::{PageRef, PAGE_SHIFT, PAGE_SIZE};

/// A page-aligned, whole-page window onto a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapRegion {
    /// First address of the window.
    pub start: usize,
    /// Length of the window in bytes.
    pub len: usize,
    /// Device offset of `start`, in pages.
    pub pgoff: u64,
}

impl MapRegion {
    pub fn new(start: usize, len: usize, pgoff: u64) -> Result<Self> {
        if start % PAGE_SIZE != 0 || len % PAGE_SIZE != 0 || len == 0 || start.checked_add(len).is_none() {
            return Err(StorageError::InvalidOffset { offset: start as u64, len });
        }
        Ok(Self { start, len, pgoff })
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn contains(&self, address: usize) -> bool {
        (self.start..self.end()).contains(&address)
    }

    /// Page-aligned device offset backing `address`.
    pub fn device_offset(&self, address: usize) -> Option<u64> {
        if !self.contains(address) {
            return None;
        }
        let page = ((address - self.start) >> PAGE_SHIFT) as u64;
        page.checked_add(self.pgoff)?.checked_mul(PAGE_SIZE as u64)
    }
}

/// Look up the page at `page_offset` (in pages) and pin it.
///
/// Walks the set chain without growing it. `None` for holes, offsets past
/// the end of data and backends that cannot translate to pages.
pub(crate) fn resolve<A: QuantumAllocator>(
    allocator: &A,
    state: &DeviceState<A::Quantum>,
    page_offset: u64,
) -> Option<PageRef> {
    let offset = page_offset.checked_mul(PAGE_SIZE as u64)?;
    if offset >= state.size {
        return None;
    }
    let pos = state.geometry.locate(offset);
    let quantum = state.head.walk(pos.item)?.quantum(pos.s_pos)?;
    allocator.page_at(quantum, pos.q_pos)
}

impl<A: QuantumAllocator> Device<A> {
    /// Resolve and pin the page at `page_offset` (in pages).
    pub fn resolve(&self, page_offset: u64) -> Option<PageRef> {
        let state = self.lock_uninterruptible();
        resolve(self.allocator().as_ref(), &state, page_offset)
    }

    /// Map `region` of this device.
    ///
    /// Fails with [`StorageError::Unsupported`] on backends without page
    /// translation and on devices whose current order is not 0.
    pub fn map(self: &Arc<Self>, region: MapRegion) -> Result<Mapping<A>> {
        if !self.allocator().is_mappable() {
            warn!(minor = self.minor(), backend = %self.allocator().kind(), "Mapping refused");
            return Err(StorageError::Unsupported(format!(
                "{} backend cannot be mapped",
                self.allocator().kind()
            )));
        }
        let mut state = self.lock_uninterruptible();
        if state.geometry.order != 0 {
            warn!(minor = self.minor(), order = state.geometry.order, "Mapping refused");
            return Err(StorageError::Unsupported(format!(
                "order {} devices cannot be mapped",
                state.geometry.order
            )));
        }
        state.active_mappings += 1;
        debug!(
            minor = self.minor(),
            start = region.start,
            len = region.len,
            pgoff = region.pgoff,
            mappings = state.active_mappings,
            "Device mapped"
        );
        drop(state);
        Ok(Mapping { device: Arc::clone(self), region })
    }
}

/// A live mapping. Cloning attaches again; dropping releases.
pub struct Mapping<A: QuantumAllocator> {
    device: Arc<Device<A>>,
    region: MapRegion,
}

impl<A: QuantumAllocator> Mapping<A> {
    pub fn region(&self) -> MapRegion {
        self.region
    }

    pub fn device(&self) -> &Arc<Device<A>> {
        &self.device
    }

    /// Number of mappings currently attached to the device, this one included.
    pub fn active(&self) -> usize {
        self.device.active_mappings()
    }

    /// Service a fault at `address`, returning the pinned page.
    pub fn fault(&self, address: usize) -> Result<PageRef> {
        let offset = self
            .region
            .device_offset(address)
            .ok_or(StorageError::NoPage { offset: address as u64 })?;

        let state = self.device.lock_uninterruptible();
        if offset >= state.size {
            trace!(minor = self.device.minor(), offset, size = state.size, "Fault past end of data");
            return Err(StorageError::NoPage { offset });
        }
        resolve(self.device.allocator().as_ref(), &state, offset >> PAGE_SHIFT).ok_or_else(|| {
            trace!(minor = self.device.minor(), offset, "Fault on a hole");
            StorageError::NoPage { offset }
        })
    }
}

impl<A: QuantumAllocator> Clone for Mapping<A> {
    fn clone(&self) -> Self {
        let mut state = self.device.lock_uninterruptible();
        state.active_mappings += 1;
        drop(state);
        Self { device: Arc::clone(&self.device), region: self.region }
    }
}

impl<A: QuantumAllocator> Drop for Mapping<A> {
    fn drop(&mut self) {
        let mut state = self.device.lock_uninterruptible();
        match state.active_mappings.checked_sub(1) {
            Some(n) => state.active_mappings = n,
            None => warn!(minor = self.device.minor(), "Mapping released with no active mappings"),
        }
    }
}
