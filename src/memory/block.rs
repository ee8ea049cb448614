use serde::{Deserialize, Serialize};

use crate::event::Address;

use super::element::ElementId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ownership {
    /// Came from an `Allocate` event, needs a matching `Deallocate`
    Owned,
    /// Inferred from a construction at an untracked address (automatic
    /// storage). Goes away by itself once everything in it is destroyed.
    FromConstruct,
}

/// Bookkeeping for one contiguous allocation.
#[derive(Clone, Debug)]
pub struct AllocationBlock {
    base: Address,
    stride: usize,
    count: usize,
    ownership: Ownership,
    elements: Vec<ElementId>,
}

impl AllocationBlock {
    pub(super) fn new(
        base: Address,
        stride: usize,
        count: usize,
        ownership: Ownership,
        elements: Vec<ElementId>,
    ) -> Self {
        debug_assert_eq!(elements.len(), count);
        Self {
            base,
            stride,
            count,
            ownership,
            elements,
        }
    }

    pub const fn base(&self) -> Address {
        self.base
    }

    pub const fn stride(&self) -> usize {
        self.stride
    }

    pub const fn count(&self) -> usize {
        self.count
    }

    pub const fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Top-level elements, one per slot
    pub fn elements(&self) -> &[ElementId] {
        &self.elements
    }

    /// One past the last byte
    pub fn end(&self) -> usize {
        self.base
            .get()
            .saturating_add(self.stride.saturating_mul(self.count))
    }

    pub fn contains(&self, address: Address) -> bool {
        address >= self.base && address.get() < self.end()
    }

    pub(super) fn slot_of(&self, address: Address) -> Option<ElementId> {
        if !self.contains(address) {
            return None;
        }
        let index = (address.get() - self.base.get()) / self.stride;
        self.elements.get(index).copied()
    }
}
