use serde::{Deserialize, Serialize};

use crate::event::{Address, Snapshot};

use super::arena::Idx;

pub type ElementId = Idx<AllocationElement>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    Uninitialised,
    /// Between `BeforeConstruct` and the matching construct event
    Constructing,
    Initialised,
    /// Moved from: still has to be destroyed, may be assigned to
    Moved,
}

impl Lifecycle {
    /// Valid as the destination of an assignment or a destroy.
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Initialised | Self::Moved)
    }
}

/// One addressable, possibly nested, field of an allocation block.
#[derive(Clone, Debug)]
pub struct AllocationElement {
    address: Address,
    size: usize,
    is_pointer: bool,
    state: Lifecycle,
    /// `None` for a slot nothing has been constructed in yet; such a slot
    /// matches any type
    type_key: Option<String>,
    type_name: Option<String>,
    value: Option<String>,
    pub(super) children: Vec<ElementId>,
}

impl AllocationElement {
    /// A top-level slot of a block
    pub(super) fn slot(address: Address, size: usize) -> Self {
        Self {
            address,
            size,
            is_pointer: false,
            state: Lifecycle::Uninitialised,
            type_key: None,
            type_name: None,
            value: None,
            children: Vec::new(),
        }
    }

    /// A field discovered inside an existing element
    pub(super) fn field(address: Address, snapshot: &Snapshot) -> Self {
        Self {
            address,
            size: snapshot.size,
            is_pointer: snapshot.is_pointer,
            state: Lifecycle::Uninitialised,
            type_key: Some(snapshot.type_key.clone()),
            type_name: Some(snapshot.type_name.clone()),
            value: None,
            children: Vec::new(),
        }
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    pub const fn is_pointer(&self) -> bool {
        self.is_pointer
    }

    pub const fn state(&self) -> Lifecycle {
        self.state
    }

    /// Short type name, for display
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    /// Full type path this element is matched on
    pub fn type_key(&self) -> Option<&str> {
        self.type_key.as_deref()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn children(&self) -> &[ElementId] {
        &self.children
    }

    /// Zero-sized values still occupy their address
    fn extent(&self) -> usize {
        self.size.max(1)
    }

    pub fn contains(&self, address: Address) -> bool {
        address >= self.address && address.get() - self.address.get() < self.extent()
    }

    pub(super) fn matches(&self, address: Address, type_key: &str) -> bool {
        self.address == address && self.type_key.as_deref().map_or(true, |t| t == type_key)
    }

    pub(super) fn begin_construction(&mut self, snapshot: &Snapshot) {
        self.state = Lifecycle::Constructing;
        self.is_pointer = snapshot.is_pointer;
        self.type_key = Some(snapshot.type_key.clone());
        self.type_name = Some(snapshot.type_name.clone());
        self.value = None;
    }

    pub(super) fn initialise(&mut self, snapshot: &Snapshot) {
        self.state = Lifecycle::Initialised;
        if self.type_key.is_none() {
            self.type_key = Some(snapshot.type_key.clone());
            self.type_name = Some(snapshot.type_name.clone());
        }
        self.value.clone_from(&snapshot.value);
    }

    pub(super) fn mark_moved(&mut self) {
        self.state = Lifecycle::Moved;
    }

    pub(super) fn destroy(&mut self) {
        self.state = Lifecycle::Uninitialised;
        self.value = None;
    }
}
