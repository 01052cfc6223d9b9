// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Page frames and pinned page handles.
//!
//! A [`Frame`] is one backing allocation: either a run of `2^order`
//! contiguous pages or a single page. Frames are reference counted; the
//! owning quantum holds one reference and every [`PageRef`] handed out to a
//! mapping holds another. Dropping the last reference releases the memory,
//! so a page pinned by a mapping outlives a trim of its device.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::storage::alloc::zeroed;

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Number of pages in an allocation of the given order.
pub const fn pages_in_order(order: u32) -> usize {
    1 << order
}

pub(crate) struct Frame {
    bytes: RwLock<Box<[u8]>>,
}

impl Frame {
    pub(crate) fn zeroed(len: usize) -> Result<Arc<Self>> {
        Ok(Arc::new(Self { bytes: RwLock::new(zeroed(len)?) }))
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.read().len()
    }

    pub(crate) fn read_at(&self, offset: usize, buf: &mut [u8]) {
        let bytes = self.bytes.read();
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
    }

    pub(crate) fn write_at(&self, offset: usize, data: &[u8]) {
        let mut bytes = self.bytes.write();
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }
}

/// A pinned reference to one page of a frame.
///
/// Cloning pins the page again; dropping unpins it.
#[derive(Clone)]
pub struct PageRef {
    frame: Arc<Frame>,
    index: usize,
}

impl PageRef {
    pub(crate) fn new(frame: Arc<Frame>, index: usize) -> Self {
        debug_assert!((index + 1) * PAGE_SIZE <= frame.len());
        Self { frame, index }
    }

    /// Page index inside its frame (always 0 for single-page frames).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Live references to the backing frame: the owner plus every pin.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.frame)
    }

    /// Whether both handles pin the same physical page.
    pub fn same_page(&self, other: &PageRef) -> bool {
        Arc::ptr_eq(&self.frame, &other.frame) && self.index == other.index
    }

    /// Run `f` over the page contents.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let bytes = self.frame.bytes.read();
        f(&bytes[self.range()])
    }

    /// Run `f` over the page contents, mutably. Stores through a mapping
    /// land here.
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut bytes = self.frame.bytes.write();
        let range = self.range();
        f(&mut bytes[range])
    }

    fn range(&self) -> std::ops::Range<usize> {
        let start = self.index * PAGE_SIZE;
        start..start + PAGE_SIZE
    }
}

impl fmt::Debug for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageRef")
            .field("frame", &Arc::as_ptr(&self.frame))
            .field("index", &self.index)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
