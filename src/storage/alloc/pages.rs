// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Contiguous page blocks: one frame of `2^order` pages per quantum.

use std::sync::Arc;

use super::{AllocCounters, AllocStats, ConfiguredAllocator, MemoryBudget, Quantum, QuantumAllocator};
use crate::config::{BackendKind, Config};
use crate::error::Result;
use crate::storage::page::{Frame, PageRef, PAGE_SHIFT, PAGE_SIZE};

pub struct PageBlock {
    frame: Arc<Frame>,
    size: usize,
}

impl Quantum for PageBlock {
    fn size(&self) -> usize {
        self.size
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) {
        self.frame.read_at(offset, buf);
    }

    fn write_at(&mut self, offset: usize, data: &[u8]) {
        self.frame.write_at(offset, data);
    }
}

#[derive(Default)]
pub struct PageAllocator {
    budget: Arc<MemoryBudget>,
    counters: AllocCounters,
}

impl PageAllocator {
    pub fn new(budget: Arc<MemoryBudget>) -> Self {
        Self { budget, counters: AllocCounters::default() }
    }
}

impl QuantumAllocator for PageAllocator {
    type Quantum = PageBlock;

    fn kind(&self) -> BackendKind {
        BackendKind::Pages
    }

    fn quantum_size(&self, order: u32) -> usize {
        PAGE_SIZE << order
    }

    fn alloc(&self, order: u32) -> Result<PageBlock> {
        let size = self.quantum_size(order);
        self.budget.charge(size)?;
        let frame = Frame::zeroed(size).inspect_err(|_| self.budget.release(size))?;
        self.counters.on_alloc();
        Ok(PageBlock { frame, size })
    }

    fn free(&self, quantum: PageBlock) {
        self.budget.release(quantum.size);
        self.counters.on_free();
    }

    /// The block is one frame, so the page is found by index arithmetic.
    fn page_at(&self, quantum: &PageBlock, offset: usize) -> Option<PageRef> {
        (offset < quantum.size).then(|| PageRef::new(quantum.frame.clone(), offset >> PAGE_SHIFT))
    }

    fn is_mappable(&self) -> bool {
        true
    }

    fn stats(&self) -> AllocStats {
        self.counters.snapshot(&self.budget)
    }
}

impl ConfiguredAllocator for PageAllocator {
    const KIND: BackendKind = BackendKind::Pages;

    fn from_config(config: &Config) -> Result<Self> {
        Ok(PageAllocator::new(MemoryBudget::new(config.memory_limit())))
    }
}
