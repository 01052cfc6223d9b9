// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Quantum sets: the sparse list-of-arrays holding a device's quanta.
//!
//! ```text
//! head QSet ──next──▶ QSet ──next──▶ QSet ──▶ None
//!    │                  │              │
//!  [q0 q1 .. qN]      None         [.. qK ..]      (slot arrays, lazily allocated)
//! ```
//!
//! A byte offset splits into the set index (`item`), the slot inside that
//! set (`s_pos`) and the byte inside the quantum (`q_pos`).

use serde::Serialize;

use crate::error::{Result, StorageError};

/// Quantum and set dimensions of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Geometry {
    /// Bytes per quantum.
    pub quantum: usize,
    /// Quanta per set.
    pub qset: usize,
    /// Allocation order the quantum size was derived from (0 for slab).
    pub order: u32,
}

/// Location of a byte inside the set chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub item: u64,
    pub s_pos: usize,
    pub q_pos: usize,
}

impl Geometry {
    /// Bytes covered by one set.
    pub fn item_size(&self) -> u64 {
        self.quantum as u64 * self.qset as u64
    }

    pub fn locate(&self, offset: u64) -> Position {
        let item_size = self.item_size();
        let rest = offset % item_size;
        Position {
            item: offset / item_size,
            s_pos: (rest / self.quantum as u64) as usize,
            q_pos: (rest % self.quantum as u64) as usize,
        }
    }

    pub fn offset_of(&self, pos: Position) -> u64 {
        pos.item * self.item_size() + pos.s_pos as u64 * self.quantum as u64 + pos.q_pos as u64
    }

    /// Bytes left in the quantum after `q_pos`.
    pub fn remaining_in_quantum(&self, q_pos: usize) -> usize {
        self.quantum - q_pos
    }
}

pub(crate) struct QSet<Q> {
    data: Option<Box<[Option<Q>]>>,
    next: Option<Box<QSet<Q>>>,
}

impl<Q> QSet<Q> {
    pub(crate) fn new() -> Self {
        Self { data: None, next: None }
    }

    /// Walk `n` links forward, appending empty sets where the chain ends.
    pub(crate) fn follow(&mut self, n: u64) -> &mut QSet<Q> {
        let mut set = self;
        for _ in 0..n {
            set = &mut **set.next.get_or_insert_with(|| Box::new(QSet::new()));
        }
        set
    }

    /// Walk `n` links forward without growing the chain.
    pub(crate) fn walk(&self, n: u64) -> Option<&QSet<Q>> {
        let mut set = self;
        for _ in 0..n {
            set = set.next.as_deref()?;
        }
        Some(set)
    }

    pub(crate) fn quantum(&self, s_pos: usize) -> Option<&Q> {
        self.data.as_ref()?.get(s_pos)?.as_ref()
    }

    /// The slot array, allocated empty with `qset` entries on first use.
    pub(crate) fn slots_or_alloc(&mut self, qset: usize) -> Result<&mut [Option<Q>]> {
        let slots = match self.data.take() {
            Some(slots) => slots,
            None => {
                let mut slots = Vec::new();
                slots.try_reserve_exact(qset).map_err(|_| StorageError::OutOfMemory {
                    requested: qset.saturating_mul(std::mem::size_of::<Option<Q>>()),
                })?;
                slots.resize_with(qset, || None);
                slots.into_boxed_slice()
            }
        };
        Ok(&mut **self.data.insert(slots))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &QSet<Q>> {
        std::iter::successors(Some(self), |set| set.next.as_deref())
    }

    pub(crate) fn set_count(&self) -> usize {
        self.iter().count()
    }

    /// Sets whose slot array has been allocated.
    pub(crate) fn slot_array_count(&self) -> usize {
        self.iter().filter(|set| set.data.is_some()).count()
    }

    pub(crate) fn quantum_count(&self) -> usize {
        self.iter()
            .filter_map(|set| set.data.as_ref())
            .map(|slots| slots.iter().filter(|slot| slot.is_some()).count())
            .sum()
    }

    /// Hand every quantum to `free`, drop every slot array and every set
    /// after this one. Returns `(sets released, quanta released)`.
    pub(crate) fn release(&mut self, mut free: impl FnMut(Q)) -> (usize, usize) {
        let mut quanta = 0;
        let mut release_slots = |set: &mut QSet<Q>| {
            for quantum in set.data.take().into_iter().flat_map(|slots| slots.into_vec()).flatten() {
                free(quantum);
                quanta += 1;
            }
        };

        release_slots(&mut *self);
        let mut sets = 0;
        let mut next = self.next.take();
        while let Some(mut set) = next {
            release_slots(&mut *set);
            next = set.next.take();
            sets += 1;
        }
        (sets, quanta)
    }
}

impl<Q> Drop for QSet<Q> {
    // Unlink iteratively so long chains do not recurse through Box drops.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(mut set) = next {
            next = set.next.take();
        }
    }
}
