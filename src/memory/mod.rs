//! An address-indexed model of what monitored memory currently holds.
//!
//! The model is a set of [`AllocationBlock`]s ordered by base address. Every
//! block owns one top-level [`AllocationElement`] per slot, and elements grow
//! children as construction is observed at addresses inside them. That is how
//! the fields of an aggregate get tracked one by one with nothing but the
//! addresses and type names carried by the events.
//!
//! ```plaintext
//!   block @ base, stride, count
//!   ├── slot 0 (Pair)              base
//!   │   ├── field (i32)            base         <- same address, other type
//!   │   └── field (i32)            base + 4
//!   └── slot 1                     base + stride
//! ```
//!
//! Nodes live in an [`Arena`] and refer to their children by index, so
//! cloning the model is a deep copy and nothing here recurses.
//!
//! The model applies events as they come. Whether an event was *allowed* is
//! decided by the [`Verifier`](crate::verify::Verifier) before it gets here.

mod arena;
mod block;
mod element;

pub use arena::{Arena, Idx};
pub use block::{AllocationBlock, Ownership};
pub use element::{AllocationElement, ElementId, Lifecycle};

use std::{collections::BTreeMap, fmt};

use crate::event::{Address, AllocationEvent, AllocationKind, ObjectEvent, ObjectKind, Snapshot};

/// Where an `(address, type)` pair lands in the element trees.
enum Resolution {
    Found(ElementId),
    /// Inside a known element but not yet seen; `parent` is the deepest
    /// element containing the address
    Missing { parent: ElementId },
    /// No block covers the address
    Untracked,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryRepresentation {
    blocks: BTreeMap<Address, AllocationBlock>,
    elements: Arena<AllocationElement>,
}

impl MemoryRepresentation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &AllocationBlock> {
        self.blocks.values()
    }

    pub fn element(&self, id: ElementId) -> &AllocationElement {
        self.elements.get(id)
    }

    /// The block whose range contains `address`
    pub fn block_at(&self, address: Address) -> Option<&AllocationBlock> {
        self.blocks
            .range(..=address)
            .next_back()
            .map(|(_, block)| block)
            .filter(|block| block.contains(address))
    }

    /// The block that starts exactly at `address`
    pub fn block_starting_at(&self, address: Address) -> Option<&AllocationBlock> {
        self.blocks.get(&address)
    }

    pub fn process_allocation(&mut self, event: &AllocationEvent) {
        match event.kind {
            AllocationKind::Allocate => {
                self.insert_block(event.address, event.stride, event.count, Ownership::Owned);
            }
            AllocationKind::Deallocate => {
                if !self.remove_block(event.address) {
                    log::trace!("deallocate of untracked block {}", event.address);
                }
            }
        }
    }

    pub fn process_object(&mut self, event: &ObjectEvent) {
        let destination = event.destination();
        let snapshot = event.snapshot();
        match event.kind() {
            ObjectKind::BeforeConstruct => {
                let id = self.introduce(destination, snapshot);
                self.elements.get_mut(id).begin_construction(snapshot);
            }
            ObjectKind::Destroy => {
                let Some(id) = self.find(destination, &snapshot.type_key) else {
                    log::trace!("destroy of unknown {} at {destination}", snapshot.type_name);
                    return;
                };
                self.elements.get_mut(id).destroy();
                self.collect_if_inferred(destination);
            }
            kind => {
                match self.find(destination, &snapshot.type_key) {
                    Some(id) => self.elements.get_mut(id).initialise(snapshot),
                    None => {
                        log::trace!("{kind:?} on unknown {} at {destination}", snapshot.type_name)
                    }
                }
                if let (true, Some(source)) = (kind.is_move(), event.source()) {
                    if let Some(id) = self.find(source, &snapshot.type_key) {
                        self.elements.get_mut(id).mark_moved();
                    }
                }
            }
        }
    }

    /// The innermost element whose range contains `address`. `None` means
    /// nothing at this address was ever introduced.
    pub fn field_at(&self, address: Address) -> Option<&AllocationElement> {
        let mut current = self.block_at(address)?.slot_of(address)?;
        'descend: loop {
            for &child in self.elements.get(current).children() {
                if self.elements.get(child).contains(address) {
                    current = child;
                    continue 'descend;
                }
            }
            return Some(self.elements.get(current));
        }
    }

    /// The element introduced at exactly `address` whose type has the key
    /// `type_key` (see [`crate::event::type_key`])
    pub fn field_of(&self, address: Address, type_key: &str) -> Option<&AllocationElement> {
        self.find(address, type_key).map(|id| self.elements.get(id))
    }

    pub fn state_of(&self, address: Address, type_key: &str) -> Option<Lifecycle> {
        self.field_of(address, type_key).map(AllocationElement::state)
    }

    /// The outermost elements of the block at `base` that are not
    /// [`Lifecycle::Uninitialised`]. A leaked aggregate is reported once, not
    /// once per field.
    pub fn undestroyed(&self, base: Address) -> Vec<&AllocationElement> {
        let Some(block) = self.blocks.get(&base) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        let mut pending: Vec<ElementId> = block.elements().iter().rev().copied().collect();
        while let Some(id) = pending.pop() {
            let element = self.elements.get(id);
            if element.state() != Lifecycle::Uninitialised {
                found.push(element);
            } else {
                pending.extend(element.children().iter().rev());
            }
        }
        found
    }

    /// Reset every element of the block at `base` to uninitialised.
    pub fn force_clean(&mut self, base: Address) {
        let Some(block) = self.blocks.get(&base) else {
            return;
        };
        let mut pending = block.elements().to_vec();
        while let Some(id) = pending.pop() {
            let element = self.elements.get_mut(id);
            element.destroy();
            pending.extend(element.children().iter().copied());
        }
    }

    /// Forget the block at `base` and everything in it. Returns whether there
    /// was one.
    pub fn remove_block(&mut self, base: Address) -> bool {
        let Some(block) = self.blocks.remove(&base) else {
            return false;
        };
        log::debug!(
            "removing {:?} block {base} ({} x {} bytes)",
            block.ownership(),
            block.count(),
            block.stride()
        );
        let mut pending = block.elements().to_vec();
        while let Some(id) = pending.pop() {
            pending.extend(self.elements.free(id).children);
        }
        true
    }

    /// Forced teardown of every [`Ownership::Owned`] block. Returns their
    /// base addresses.
    pub fn free_heap_allocations(&mut self) -> Vec<Address> {
        let owned: Vec<Address> = self
            .blocks
            .values()
            .filter(|block| block.ownership() == Ownership::Owned)
            .map(AllocationBlock::base)
            .collect();
        for &base in &owned {
            self.remove_block(base);
        }
        owned
    }

    fn insert_block(&mut self, base: Address, stride: usize, count: usize, ownership: Ownership) {
        let stride = stride.max(1);
        let end = base.get().saturating_add(stride.saturating_mul(count));
        self.evict_overlapping(base, end);
        let elements = (0..count)
            .map(|i| {
                self.elements
                    .alloc(AllocationElement::slot(base.offset(i * stride), stride))
            })
            .collect();
        log::debug!("new {ownership:?} block {base} ({count} x {stride} bytes)");
        self.blocks.insert(
            base,
            AllocationBlock::new(base, stride, count, ownership, elements),
        );
    }

    /// Blocks never overlap, so anything in `[start, end)` is stale: memory
    /// the model never saw being released.
    fn evict_overlapping(&mut self, start: Address, end: usize) {
        let stale: Vec<Address> = self
            .blocks
            .range(..Address(end.max(start.get() + 1)))
            .rev()
            .take_while(|(_, block)| block.end() > start.get())
            .map(|(&base, _)| base)
            .collect();
        for base in stale {
            log::warn!("evicting stale block {base} overlapping new block at {start}");
            self.remove_block(base);
        }
    }

    fn resolve(&self, address: Address, type_key: &str) -> Resolution {
        let Some(root) = self.block_at(address).and_then(|block| block.slot_of(address)) else {
            return Resolution::Untracked;
        };
        let mut deepest = (root, 0usize);
        let mut pending = vec![(root, 0usize)];
        while let Some((id, depth)) = pending.pop() {
            let element = self.elements.get(id);
            if element.matches(address, type_key) {
                return Resolution::Found(id);
            }
            if depth > deepest.1 {
                deepest = (id, depth);
            }
            pending.extend(
                element
                    .children()
                    .iter()
                    .rev()
                    .filter(|&&child| self.elements.get(child).contains(address))
                    .map(|&child| (child, depth + 1)),
            );
        }
        Resolution::Missing { parent: deepest.0 }
    }

    fn find(&self, address: Address, type_key: &str) -> Option<ElementId> {
        match self.resolve(address, type_key) {
            Resolution::Found(id) => Some(id),
            _ => None,
        }
    }

    /// Resolve `address`, creating whatever is needed for it to exist: a
    /// [`Ownership::FromConstruct`] block if nothing covers it, a new child
    /// if it is a field not seen before.
    fn introduce(&mut self, address: Address, snapshot: &Snapshot) -> ElementId {
        match self.resolve(address, &snapshot.type_key) {
            Resolution::Found(id) => id,
            Resolution::Missing { parent } => {
                let id = self
                    .elements
                    .alloc(AllocationElement::field(address, snapshot));
                self.elements.get_mut(parent).children.push(id);
                id
            }
            Resolution::Untracked => {
                self.insert_block(address, snapshot.size, 1, Ownership::FromConstruct);
                self.blocks[&address].elements()[0]
            }
        }
    }

    fn collect_if_inferred(&mut self, address: Address) {
        let Some(block) = self.block_at(address) else {
            return;
        };
        if block.ownership() == Ownership::FromConstruct && self.undestroyed(block.base()).is_empty()
        {
            let base = block.base();
            self.remove_block(base);
        }
    }
}

impl fmt::Display for MemoryRepresentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in self.blocks.values() {
            writeln!(
                f,
                "{:?} {} [{} x {}]",
                block.ownership(),
                block.base(),
                block.count(),
                block.stride()
            )?;
            let mut pending: Vec<(ElementId, usize)> =
                block.elements().iter().rev().map(|&id| (id, 1)).collect();
            while let Some((id, depth)) = pending.pop() {
                let element = self.elements.get(id);
                writeln!(
                    f,
                    "{:indent$}{} {} {:?} {}",
                    "",
                    element.address(),
                    element.type_name().unwrap_or("?"),
                    element.state(),
                    element.value().unwrap_or(""),
                    indent = depth * 2
                )?;
                pending.extend(element.children().iter().rev().map(|&c| (c, depth + 1)));
            }
        }
        Ok(())
    }
}
