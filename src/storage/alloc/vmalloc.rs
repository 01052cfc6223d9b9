// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Virtually contiguous blocks built from individually allocated pages.
//!
//! A quantum looks like one `PAGE_SIZE << order` byte range to the storage
//! engine, but every page is its own frame. Copies are split at page
//! boundaries and page lookups go through the per-page table.

use std::sync::Arc;

use super::{AllocCounters, AllocStats, ConfiguredAllocator, MemoryBudget, Quantum, QuantumAllocator};
use crate::config::{BackendKind, Config};
use crate::error::Result;
use crate::storage::page::{pages_in_order, Frame, PageRef, PAGE_SHIFT, PAGE_SIZE};

pub struct VmallocBlock {
    pages: Box<[Arc<Frame>]>,
}

impl VmallocBlock {
    /// Visit each `(frame, offset in frame, range of the caller's buffer)`
    /// touched by a copy of `len` bytes at `offset`.
    fn for_each_chunk(&self, offset: usize, len: usize, mut f: impl FnMut(&Frame, usize, std::ops::Range<usize>)) {
        let mut done = 0;
        while done < len {
            let at = offset + done;
            let in_page = at & (PAGE_SIZE - 1);
            let chunk = (PAGE_SIZE - in_page).min(len - done);
            f(&self.pages[at >> PAGE_SHIFT], in_page, done..done + chunk);
            done += chunk;
        }
    }
}

impl Quantum for VmallocBlock {
    fn size(&self) -> usize {
        self.pages.len() * PAGE_SIZE
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) {
        self.for_each_chunk(offset, buf.len(), |frame, at, range| {
            frame.read_at(at, &mut buf[range]);
        });
    }

    fn write_at(&mut self, offset: usize, data: &[u8]) {
        self.for_each_chunk(offset, data.len(), |frame, at, range| {
            frame.write_at(at, &data[range]);
        });
    }
}

#[derive(Default)]
pub struct VmallocAllocator {
    budget: Arc<MemoryBudget>,
    counters: AllocCounters,
}

impl VmallocAllocator {
    pub fn new(budget: Arc<MemoryBudget>) -> Self {
        Self { budget, counters: AllocCounters::default() }
    }
}

impl QuantumAllocator for VmallocAllocator {
    type Quantum = VmallocBlock;

    fn kind(&self) -> BackendKind {
        BackendKind::Vmalloc
    }

    fn quantum_size(&self, order: u32) -> usize {
        PAGE_SIZE << order
    }

    fn alloc(&self, order: u32) -> Result<VmallocBlock> {
        let size = self.quantum_size(order);
        self.budget.charge(size)?;
        let pages = (0..pages_in_order(order))
            .map(|_| Frame::zeroed(PAGE_SIZE))
            .collect::<Result<Vec<_>>>()
            .inspect_err(|_| self.budget.release(size))?;
        self.counters.on_alloc();
        Ok(VmallocBlock { pages: pages.into_boxed_slice() })
    }

    fn free(&self, quantum: VmallocBlock) {
        self.budget.release(quantum.size());
        self.counters.on_free();
    }

    /// Pages are scattered, so each lookup goes through the page table.
    fn page_at(&self, quantum: &VmallocBlock, offset: usize) -> Option<PageRef> {
        quantum.pages.get(offset >> PAGE_SHIFT).map(|frame| PageRef::new(frame.clone(), 0))
    }

    fn is_mappable(&self) -> bool {
        true
    }

    fn stats(&self) -> AllocStats {
        self.counters.snapshot(&self.budget)
    }
}

impl ConfiguredAllocator for VmallocAllocator {
    const KIND: BackendKind = BackendKind::Vmalloc;

    fn from_config(config: &Config) -> Result<Self> {
        Ok(VmallocAllocator::new(MemoryBudget::new(config.memory_limit())))
    }
}
