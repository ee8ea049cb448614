//! A pointer to monitored slots, itself monitored.
//!
//! Containers keep their structure in pointers as much as in values, so
//! pointer copies, moves and arithmetic are reported too. A pointer's events
//! are keyed on the *pointee* type (`*T`).
//!
//! Where the events point depends on how the pointer was built. One that is
//! emplaced ([`MonitoredPtr::emplace`] and friends) reports its own storage,
//! so a pointer field of a monitored aggregate is discovered as a field of
//! it. It must then stay where it was built, like a [`Monitored`] value. A
//! free-standing pointer (`new`, `null`, clones) keeps its raw pointer in a
//! small heap cell and reports that instead: Rust moves such pointers around
//! freely, the cell stays where it is.

use std::{
    cmp::Ordering,
    fmt::{self, Debug},
    marker::PhantomData,
    mem,
    ops::{Add, AddAssign, Sub, SubAssign},
    ptr,
};

use crate::{
    event::{Address, ObjectEvent, ObjectKind, Snapshot},
    handler::Handler,
};

use super::Monitored;

mod sealed {
    pub trait Sealed {}
}

/// Whether a [`MonitoredPtr`] may hand out mutable access.
pub trait Mutability: sealed::Sealed + 'static {}

#[derive(Debug)]
pub enum Mut {}

#[derive(Debug)]
pub enum Const {}

impl sealed::Sealed for Mut {}
impl sealed::Sealed for Const {}
impl Mutability for Mut {}
impl Mutability for Const {}

/// `Self` pointers may be copied into `M` pointers. Mutable coerces to
/// const, never the other way around.
pub trait CoercesTo<M: Mutability>: Mutability {}

impl CoercesTo<Mut> for Mut {}
impl CoercesTo<Const> for Mut {}
impl CoercesTo<Const> for Const {}

pub type MonitoredConstPtr<'h, T> = MonitoredPtr<'h, T, Const>;

enum Storage<'h, T: Debug> {
    /// Emplaced: the raw pointer lives in the wrapper
    Inline(*mut Monitored<'h, T>),
    /// Free-standing: the raw pointer lives in a cell that does not move
    Boxed(Box<*mut Monitored<'h, T>>),
}

pub struct MonitoredPtr<'h, T: Debug, M: Mutability = Mut> {
    storage: Storage<'h, T>,
    handler: &'h dyn Handler,
    _mutability: PhantomData<M>,
}

impl<'h, T: Debug> MonitoredPtr<'h, T, Mut> {
    pub fn null(handler: &'h dyn Handler) -> Self {
        Self::new(handler, ptr::null_mut())
    }

    pub fn new(handler: &'h dyn Handler, raw: *mut Monitored<'h, T>) -> Self {
        Self::build(handler, raw, ObjectKind::Construct, None)
    }
}

impl<'h, T: Debug> MonitoredPtr<'h, T, Const> {
    pub fn null_const(handler: &'h dyn Handler) -> Self {
        Self::new_const(handler, ptr::null())
    }

    pub fn new_const(handler: &'h dyn Handler, raw: *const Monitored<'h, T>) -> Self {
        Self::build(handler, raw.cast_mut(), ObjectKind::Construct, None)
    }
}

impl<'h, T: Debug, M: Mutability> MonitoredPtr<'h, T, M> {
    const STRIDE: usize = mem::size_of::<Monitored<'h, T>>();

    fn build(
        handler: &'h dyn Handler,
        raw: *mut Monitored<'h, T>,
        kind: ObjectKind,
        source: Option<Address>,
    ) -> Self {
        let cell = Box::new(ptr::null_mut());
        handler.process_object_event(&ObjectEvent::before_construct(
            Address::of::<*mut Monitored<'h, T>>(&*cell),
            Snapshot::pending_pointer::<T, Monitored<'h, T>>(),
        ));
        let mut this = Self {
            storage: Storage::Boxed(cell),
            handler,
            _mutability: PhantomData,
        };
        *this.raw_mut() = raw;
        this.emit(kind, source);
        this
    }

    /// # Safety
    ///
    /// See [`MonitoredPtr::emplace`].
    unsafe fn build_in_place<F>(
        slot: *mut Self,
        handler: &'h dyn Handler,
        kind: ObjectKind,
        source: Option<Address>,
        raw: F,
    ) where
        F: FnOnce() -> *mut Monitored<'h, T>,
    {
        handler.process_object_event(&ObjectEvent::before_construct(
            Address::of(slot),
            Snapshot {
                size: mem::size_of::<Self>(),
                ..Snapshot::pending_pointer::<T, Monitored<'h, T>>()
            },
        ));
        // SAFETY: caller guarantees `slot` is valid for writes and aligned
        unsafe {
            slot.write(Self {
                storage: Storage::Inline(raw()),
                handler,
                _mutability: PhantomData,
            });
            (*slot).emit(kind, source);
        }
    }

    /// Construct a pointer to `raw` at `slot`, reporting `slot` itself.
    ///
    /// # Safety
    ///
    /// `slot` must be valid for writes and aligned. The pointer must be
    /// dropped in place there (`drop_in_place`, or by dropping the value
    /// that holds it), never moved out.
    pub unsafe fn emplace(slot: *mut Self, handler: &'h dyn Handler, raw: *mut Monitored<'h, T>) {
        unsafe { Self::build_in_place(slot, handler, ObjectKind::Construct, None, || raw) }
    }

    /// # Safety
    ///
    /// See [`MonitoredPtr::emplace`].
    pub unsafe fn emplace_null(slot: *mut Self, handler: &'h dyn Handler) {
        unsafe { Self::emplace(slot, handler, ptr::null_mut()) }
    }

    /// Copy construction at `slot`
    ///
    /// # Safety
    ///
    /// See [`MonitoredPtr::emplace`].
    pub unsafe fn emplace_clone<N>(slot: *mut Self, source: &MonitoredPtr<'h, T, N>)
    where
        N: CoercesTo<M>,
    {
        let raw = source.get();
        unsafe {
            Self::build_in_place(
                slot,
                source.handler,
                ObjectKind::CopyConstruct,
                Some(source.address()),
                || raw,
            )
        }
    }

    /// Move construction at `slot`. `source` is left null.
    ///
    /// # Safety
    ///
    /// See [`MonitoredPtr::emplace`].
    pub unsafe fn emplace_move<N>(slot: *mut Self, source: &mut MonitoredPtr<'h, T, N>)
    where
        N: CoercesTo<M>,
    {
        let handler = source.handler;
        let from = source.address();
        unsafe {
            Self::build_in_place(slot, handler, ObjectKind::MoveConstruct, Some(from), || {
                mem::replace(source.raw_mut(), ptr::null_mut())
            })
        }
    }

    /// Where this pointer's events are reported
    pub fn address(&self) -> Address {
        match &self.storage {
            Storage::Inline(_) => Address::of::<Self>(self),
            Storage::Boxed(cell) => Address::of::<*mut Monitored<'h, T>>(&**cell),
        }
    }

    /// Whether this pointer reports its own storage (see
    /// [`MonitoredPtr::emplace`])
    pub fn is_emplaced(&self) -> bool {
        matches!(self.storage, Storage::Inline(_))
    }

    pub fn handler(&self) -> &'h dyn Handler {
        self.handler
    }

    pub fn get(&self) -> *mut Monitored<'h, T> {
        match &self.storage {
            Storage::Inline(raw) => *raw,
            Storage::Boxed(cell) => **cell,
        }
    }

    pub fn is_null(&self) -> bool {
        self.get().is_null()
    }

    fn raw_mut(&mut self) -> &mut *mut Monitored<'h, T> {
        match &mut self.storage {
            Storage::Inline(raw) => raw,
            Storage::Boxed(cell) => cell,
        }
    }

    fn snapshot(&self) -> Snapshot {
        let snapshot = Snapshot::of_pointer::<T, Monitored<'h, T>>(self.get());
        match self.storage {
            Storage::Inline(_) => Snapshot {
                size: mem::size_of::<Self>(),
                ..snapshot
            },
            Storage::Boxed(_) => snapshot,
        }
    }

    fn emit(&self, kind: ObjectKind, source: Option<Address>) {
        self.handler.process_object_event(&ObjectEvent::new(
            kind,
            self.address(),
            source,
            self.snapshot(),
        ));
    }

    fn store(&mut self, raw: *mut Monitored<'h, T>) {
        *self.raw_mut() = raw;
        self.emit(ObjectKind::UnderlyingCopyAssign, None);
    }

    /// A pointer of the other mutability (or the same), copy-constructed
    /// from this one
    pub fn coerce<N>(&self) -> MonitoredPtr<'h, T, N>
    where
        N: Mutability,
        M: CoercesTo<N>,
    {
        self.copy_construct()
    }

    fn copy_construct<N: Mutability>(&self) -> MonitoredPtr<'h, T, N> {
        MonitoredPtr::build(
            self.handler,
            self.get(),
            ObjectKind::CopyConstruct,
            Some(self.address()),
        )
    }

    /// Move construction: the new pointer takes the address, `self` is left
    /// null.
    pub fn take(&mut self) -> Self {
        let raw = mem::replace(self.raw_mut(), ptr::null_mut());
        Self::build(
            self.handler,
            raw,
            ObjectKind::MoveConstruct,
            Some(self.address()),
        )
    }

    pub fn assign<N>(&mut self, source: &MonitoredPtr<'h, T, N>)
    where
        N: CoercesTo<M>,
    {
        *self.raw_mut() = source.get();
        self.emit(ObjectKind::CopyAssign, Some(source.address()));
    }

    /// `source` is left null
    pub fn move_assign<N>(&mut self, source: &mut MonitoredPtr<'h, T, N>)
    where
        N: CoercesTo<M>,
    {
        *self.raw_mut() = mem::replace(source.raw_mut(), ptr::null_mut());
        self.emit(ObjectKind::MoveAssign, Some(source.address()));
    }

    pub fn set(&mut self, raw: *mut Monitored<'h, T>) {
        self.store(raw);
    }

    pub fn set_null(&mut self) {
        self.store(ptr::null_mut());
    }

    /// Pre-increment: step to the next slot
    pub fn increment(&mut self) -> &mut Self {
        *self += 1;
        self
    }

    pub fn decrement(&mut self) -> &mut Self {
        *self -= 1;
        self
    }

    /// Post-increment: step to the next slot and return a copy of where this
    /// pointed before
    pub fn post_increment(&mut self) -> Self {
        let old = self.clone();
        self.increment();
        old
    }

    pub fn post_decrement(&mut self) -> Self {
        let old = self.clone();
        self.decrement();
        old
    }

    /// Raw pointer to the `index`th slot from here. Reports nothing.
    pub fn slot(&self, index: usize) -> *mut Monitored<'h, T> {
        self.get().wrapping_add(index)
    }

    /// # Safety
    ///
    /// The slot must hold a live value for as long as the returned reference
    /// is used.
    pub unsafe fn as_ref<'a>(&self) -> Option<&'a Monitored<'h, T>> {
        unsafe { self.get().as_ref() }
    }

    /// # Safety
    ///
    /// The `index`th slot must hold a live value for as long as the returned
    /// reference is used.
    pub unsafe fn index<'a>(&self, index: usize) -> &'a Monitored<'h, T> {
        unsafe { &*self.slot(index) }
    }

    /// Distance in slots from `other` to `self`
    pub fn offset_from<N: Mutability>(&self, other: &MonitoredPtr<'h, T, N>) -> isize {
        (self.get() as isize).wrapping_sub(other.get() as isize) / Self::STRIDE as isize
    }
}

impl<'h, T: Debug> MonitoredPtr<'h, T, Mut> {
    /// # Safety
    ///
    /// The slot must hold a live value, and nothing else may access it for as
    /// long as the returned reference is used.
    pub unsafe fn as_mut<'a>(&self) -> Option<&'a mut Monitored<'h, T>> {
        unsafe { self.get().as_mut() }
    }

    /// # Safety
    ///
    /// See [`MonitoredPtr::as_mut`].
    pub unsafe fn index_mut<'a>(&self, index: usize) -> &'a mut Monitored<'h, T> {
        unsafe { &mut *self.slot(index) }
    }
}

impl<T: Debug, M: Mutability> Clone for MonitoredPtr<'_, T, M> {
    fn clone(&self) -> Self {
        self.copy_construct()
    }
}

impl<'h, T: Debug> From<&MonitoredPtr<'h, T, Mut>> for MonitoredPtr<'h, T, Const> {
    fn from(source: &MonitoredPtr<'h, T, Mut>) -> Self {
        source.coerce()
    }
}

impl<T: Debug, M: Mutability> AddAssign<usize> for MonitoredPtr<'_, T, M> {
    fn add_assign(&mut self, n: usize) {
        self.store(self.get().wrapping_add(n));
    }
}

impl<T: Debug, M: Mutability> SubAssign<usize> for MonitoredPtr<'_, T, M> {
    fn sub_assign(&mut self, n: usize) {
        self.store(self.get().wrapping_sub(n));
    }
}

impl<'h, T: Debug, M: Mutability> Add<usize> for &MonitoredPtr<'h, T, M> {
    type Output = MonitoredPtr<'h, T, M>;

    fn add(self, n: usize) -> Self::Output {
        let raw = self.get().wrapping_add(n);
        MonitoredPtr::build(self.handler, raw, ObjectKind::Construct, None)
    }
}

impl<'h, T: Debug, M: Mutability> Sub<usize> for &MonitoredPtr<'h, T, M> {
    type Output = MonitoredPtr<'h, T, M>;

    fn sub(self, n: usize) -> Self::Output {
        let raw = self.get().wrapping_sub(n);
        MonitoredPtr::build(self.handler, raw, ObjectKind::Construct, None)
    }
}

impl<'h, T: Debug, M: Mutability, N: Mutability> Sub<&MonitoredPtr<'h, T, N>>
    for &MonitoredPtr<'h, T, M>
{
    type Output = isize;

    fn sub(self, other: &MonitoredPtr<'h, T, N>) -> isize {
        self.offset_from(other)
    }
}

impl<'h, T: Debug, M: Mutability, N: Mutability> PartialEq<MonitoredPtr<'h, T, N>>
    for MonitoredPtr<'h, T, M>
{
    fn eq(&self, other: &MonitoredPtr<'h, T, N>) -> bool {
        ptr::eq(self.get(), other.get())
    }
}

impl<T: Debug, M: Mutability> Eq for MonitoredPtr<'_, T, M> {}

impl<'h, T: Debug, M: Mutability, N: Mutability> PartialOrd<MonitoredPtr<'h, T, N>>
    for MonitoredPtr<'h, T, M>
{
    fn partial_cmp(&self, other: &MonitoredPtr<'h, T, N>) -> Option<Ordering> {
        Some(self.get().cmp(&other.get()))
    }
}

impl<T: Debug, M: Mutability> Ord for MonitoredPtr<'_, T, M> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.get().cmp(&other.get())
    }
}

impl<T: Debug, M: Mutability> Debug for MonitoredPtr<'_, T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:p}", self.get())
    }
}

impl<T: Debug, M: Mutability> Drop for MonitoredPtr<'_, T, M> {
    fn drop(&mut self) {
        self.handler
            .process_object_event(&ObjectEvent::destroy(self.address(), self.snapshot()));
    }
}
