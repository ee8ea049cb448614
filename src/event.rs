//! The two record kinds that flow from producers (wrappers, allocator facade)
//! to a [`Handler`](crate::handler::Handler).
//!
//! Both are built and consumed synchronously. An [`ObjectEvent`] captures a
//! [`Snapshot`] of its destination value at the moment it is created, so a
//! handler never has to read monitored memory itself.

use std::{fmt, mem};

use serde::{Deserialize, Serialize};

/// The identity of one byte in the process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub usize);

impl Address {
    pub fn of<T>(ptr: *const T) -> Self {
        Self(ptr as *const () as usize)
    }

    pub const fn get(self) -> usize {
        self.0
    }

    /// `self + bytes`, wrapping like raw pointer arithmetic would
    pub const fn offset(self, bytes: usize) -> Self {
        Self(self.0.wrapping_add(bytes))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationKind {
    Allocate,
    Deallocate,
}

/// A raw allocate or deallocate request for `count` slots of `stride` bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEvent {
    pub kind: AllocationKind,
    /// Where slot 0 lives
    pub address: Address,
    pub count: usize,
    /// Distance in bytes between two consecutive slots
    pub stride: usize,
}

impl AllocationEvent {
    pub const fn allocate(address: Address, count: usize, stride: usize) -> Self {
        Self {
            kind: AllocationKind::Allocate,
            address,
            count,
            stride,
        }
    }

    pub const fn deallocate(address: Address, count: usize, stride: usize) -> Self {
        Self {
            kind: AllocationKind::Deallocate,
            address,
            count,
            stride,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    BeforeConstruct,
    Construct,
    CopyConstruct,
    MoveConstruct,
    CopyAssign,
    UnderlyingCopyAssign,
    MoveAssign,
    UnderlyingMoveAssign,
    Destroy,
}

impl ObjectKind {
    /// Whether events of this kind carry a source address.
    pub const fn has_source(self) -> bool {
        matches!(
            self,
            Self::CopyConstruct | Self::MoveConstruct | Self::CopyAssign | Self::MoveAssign
        )
    }

    pub const fn is_move(self) -> bool {
        matches!(
            self,
            Self::MoveConstruct | Self::MoveAssign | Self::UnderlyingMoveAssign
        )
    }

    pub const fn is_construction(self) -> bool {
        matches!(
            self,
            Self::Construct | Self::CopyConstruct | Self::MoveConstruct
        )
    }

    pub const fn is_assignment(self) -> bool {
        matches!(
            self,
            Self::CopyAssign
                | Self::UnderlyingCopyAssign
                | Self::MoveAssign
                | Self::UnderlyingMoveAssign
        )
    }
}

/// What the destination of an [`ObjectEvent`] looked like when the event was
/// created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Shortened type name, for display
    pub type_name: String,
    /// Full type path. Tells apart fields that share an address with their
    /// enclosing value, see [`type_key`].
    pub type_key: String,
    pub size: usize,
    pub is_pointer: bool,
    /// `Debug` rendering of the value, `None` if there is no value yet
    pub value: Option<String>,
}

impl Snapshot {
    pub fn of<T>(value: &T) -> Self
    where
        T: fmt::Debug,
    {
        Self {
            type_name: tynm::type_name::<T>(),
            type_key: type_key::<T>().to_owned(),
            size: mem::size_of::<T>(),
            is_pointer: false,
            value: Some(format!("{value:?}")),
        }
    }

    /// A snapshot for a `T` that has not been built yet
    pub fn pending<T>() -> Self {
        Self {
            type_name: tynm::type_name::<T>(),
            type_key: type_key::<T>().to_owned(),
            size: mem::size_of::<T>(),
            is_pointer: false,
            value: None,
        }
    }

    /// A snapshot of a pointer whose pointee is a `T`. Pointers are keyed on
    /// the pointee type, so const and mutable pointers to the same `T` share a
    /// type name.
    pub fn of_pointer<T, P>(raw: *const P) -> Self {
        Self {
            type_name: format!("*{}", tynm::type_name::<T>()),
            type_key: pointer_type_key::<T>(),
            size: mem::size_of::<*const P>(),
            is_pointer: true,
            value: Some(format!("{raw:p}")),
        }
    }

    pub fn pending_pointer<T, P>() -> Self {
        Self {
            type_name: format!("*{}", tynm::type_name::<T>()),
            type_key: pointer_type_key::<T>(),
            size: mem::size_of::<*const P>(),
            is_pointer: true,
            value: None,
        }
    }

}

/// The key elements of type `T` are looked up by. Short names collide
/// (`a::Node` and `b::Node`), full paths do not.
pub fn type_key<T: ?Sized>() -> &'static str {
    std::any::type_name::<T>()
}

/// The key of a pointer whose pointee is a `T`
pub fn pointer_type_key<T: ?Sized>() -> String {
    format!("*{}", type_key::<T>())
}

/// A constructor, destructor or assignment on one monitored value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEvent {
    kind: ObjectKind,
    destination: Address,
    source: Option<Address>,
    snapshot: Snapshot,
}

impl ObjectEvent {
    /// # Panics
    ///
    /// If `source` is present for a kind that has no source, or missing for
    /// one that does (see [`ObjectKind::has_source`]).
    pub fn new(
        kind: ObjectKind,
        destination: Address,
        source: Option<Address>,
        snapshot: Snapshot,
    ) -> Self {
        assert_eq!(
            source.is_some(),
            kind.has_source(),
            "{kind:?} event with source {source:?}"
        );
        Self {
            kind,
            destination,
            source,
            snapshot,
        }
    }

    pub fn before_construct(destination: Address, snapshot: Snapshot) -> Self {
        Self::new(ObjectKind::BeforeConstruct, destination, None, snapshot)
    }

    pub fn destroy(destination: Address, snapshot: Snapshot) -> Self {
        Self::new(ObjectKind::Destroy, destination, None, snapshot)
    }

    pub const fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub const fn destination(&self) -> Address {
        self.destination
    }

    pub const fn source(&self) -> Option<Address> {
        self.source
    }

    pub const fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn type_name(&self) -> &str {
        &self.snapshot.type_name
    }

    pub fn type_key(&self) -> &str {
        &self.snapshot.type_key
    }
}

/// Either kind of event, as republished to consumers that keep or forward
/// the stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Allocation(AllocationEvent),
    Object(ObjectEvent),
}

impl From<AllocationEvent> for Event {
    fn from(event: AllocationEvent) -> Self {
        Self::Allocation(event)
    }
}

impl From<ObjectEvent> for Event {
    fn from(event: ObjectEvent) -> Self {
        Self::Object(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_copies_and_moves_between_objects_have_sources() {
        use ObjectKind::*;
        let sourced = [CopyConstruct, MoveConstruct, CopyAssign, MoveAssign];
        let unsourced = [
            BeforeConstruct,
            Construct,
            UnderlyingCopyAssign,
            UnderlyingMoveAssign,
            Destroy,
        ];
        assert!(sourced.iter().all(|kind| kind.has_source()));
        assert!(unsourced.iter().all(|kind| !kind.has_source()));
    }

    #[test]
    #[should_panic(expected = "CopyAssign event with source None")]
    fn copy_assign_without_source_is_rejected() {
        ObjectEvent::new(
            ObjectKind::CopyAssign,
            Address(0x10),
            None,
            Snapshot::pending::<u8>(),
        );
    }

    #[test]
    #[should_panic]
    fn destroy_with_source_is_rejected() {
        ObjectEvent::new(
            ObjectKind::Destroy,
            Address(0x10),
            Some(Address(0x20)),
            Snapshot::pending::<u8>(),
        );
    }

    #[test]
    fn snapshot_renders_value_eagerly() {
        let mut n = 5u32;
        let snapshot = Snapshot::of(&n);
        n += 1;
        assert_eq!(snapshot.value.as_deref(), Some("5"));
        assert_eq!(snapshot.size, 4);
        assert_eq!(snapshot.type_name, "u32");
        assert!(!snapshot.is_pointer);
        assert_eq!(n, 6);
    }

    #[test]
    fn pointer_snapshots_are_keyed_on_the_pointee() {
        let n = 7u64;
        let mutable = Snapshot::of_pointer::<u64, u64>(&n as *const u64 as *mut u64);
        let constant = Snapshot::of_pointer::<u64, u64>(&n);
        assert_eq!(mutable.type_name, constant.type_name);
        assert_eq!(mutable.type_name, "*u64");
        assert_eq!(mutable.type_key, pointer_type_key::<u64>());
        assert!(mutable.is_pointer);
        assert_eq!(mutable.size, mem::size_of::<usize>());
    }

    #[test]
    fn same_short_name_different_keys() {
        mod outer {
            #[derive(Debug)]
            pub struct Node;
        }
        mod inner {
            #[derive(Debug)]
            pub struct Node;
        }
        let a = Snapshot::of(&outer::Node);
        let b = Snapshot::of(&inner::Node);
        assert_eq!(a.type_name, b.type_name);
        assert_ne!(a.type_key, b.type_key);
        assert!(a.type_key.ends_with("outer::Node"));
    }

    #[test]
    fn address_formats_as_hex() {
        assert_eq!(Address(255).to_string(), "0xff");
        assert_eq!(format!("{:?}", Address(16).offset(16)), "0x20");
    }
}
