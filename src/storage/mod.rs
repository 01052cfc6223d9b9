// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Storage subsystem: quantum allocators, page frames and the set chain.

pub mod alloc;
pub mod page;
pub mod qset;

pub use alloc::{
    AllocStats, ConfiguredAllocator, MemoryBudget, PageAllocator, Quantum, QuantumAllocator,
    SlabCache, VmallocAllocator,
};
pub use page::{PageRef, PAGE_SHIFT, PAGE_SIZE};
pub use qset::{Geometry, Position};
