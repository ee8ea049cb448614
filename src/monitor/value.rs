use std::{
    fmt::{self, Debug},
    mem,
    ops::Deref,
    ptr,
};

use crate::{
    event::{Address, ObjectEvent, ObjectKind, Snapshot},
    handler::Handler,
    util::assert::{aligned_to, non_null},
};

/// A `T` whose constructors, assignments and destructor are reported to a
/// [`Handler`].
///
/// The value comes first, so the address of a `Monitored<T>` is the address
/// of its `T`. A Rust move is a bitwise copy that nobody gets to observe, so a
/// `Monitored` is only ever built *in place*, through the `emplace*`
/// functions, and then never moved: the address the handler saw is the
/// address it stays at until [`Drop`].
///
/// ```plaintext
/// emplace(slot)        BeforeConstruct(slot)   value written   Construct(slot)
/// assign(&other)       value cloned            CopyAssign(self, other)
/// drop                 Destroy(self)           value dropped
/// ```
#[repr(C)]
pub struct Monitored<'h, T: Debug> {
    value: T,
    handler: &'h dyn Handler,
}

impl<'h, T: Debug> Monitored<'h, T> {
    /// Build `value` into `slot`.
    ///
    /// # Safety
    ///
    /// `slot` must be valid for writes and aligned, and must not hold a value
    /// that still needs dropping (it is overwritten, not dropped). The result
    /// must not be moved afterwards.
    pub unsafe fn emplace(slot: *mut Self, handler: &'h dyn Handler, value: T) {
        unsafe { Self::construct(slot, handler, ObjectKind::Construct, None, |v| v.write(value)) }
    }

    /// Like [`Monitored::emplace`], but the value is produced after the
    /// handler has been told construction started.
    ///
    /// # Safety
    ///
    /// See [`Monitored::emplace`].
    pub unsafe fn emplace_with<F>(slot: *mut Self, handler: &'h dyn Handler, f: F)
    where
        F: FnOnce() -> T,
    {
        unsafe { Self::construct(slot, handler, ObjectKind::Construct, None, |v| v.write(f())) }
    }

    /// Build the value field by field. `init` gets a pointer to the
    /// uninitialised `T` and may itself emplace monitored fields inside it.
    ///
    /// # Safety
    ///
    /// See [`Monitored::emplace`]. In addition `init` must fully initialise
    /// the `T` it is given.
    pub unsafe fn emplace_in_place<F>(slot: *mut Self, handler: &'h dyn Handler, init: F)
    where
        F: FnOnce(*mut T),
    {
        unsafe { Self::construct(slot, handler, ObjectKind::Construct, None, init) }
    }

    /// # Safety
    ///
    /// See [`Monitored::emplace`].
    pub unsafe fn emplace_default(slot: *mut Self, handler: &'h dyn Handler)
    where
        T: Default,
    {
        unsafe { Self::emplace_with(slot, handler, T::default) }
    }

    /// Copy construction from another monitored value. The copy reports to
    /// the same handler.
    ///
    /// # Safety
    ///
    /// See [`Monitored::emplace`].
    pub unsafe fn emplace_clone(slot: *mut Self, source: &Self)
    where
        T: Clone,
    {
        unsafe {
            Self::construct(
                slot,
                source.handler,
                ObjectKind::CopyConstruct,
                Some(source.address()),
                |v| v.write(source.value.clone()),
            )
        }
    }

    /// Move construction: the value is taken out of `source`, which is left
    /// holding `T::default()` and still has to be destroyed.
    ///
    /// # Safety
    ///
    /// See [`Monitored::emplace`].
    pub unsafe fn emplace_move(slot: *mut Self, source: &mut Self)
    where
        T: Default,
    {
        let handler = source.handler;
        let address = source.address();
        unsafe {
            Self::construct(
                slot,
                handler,
                ObjectKind::MoveConstruct,
                Some(address),
                |v| v.write(mem::take(&mut source.value)),
            )
        }
    }

    unsafe fn construct<F>(
        slot: *mut Self,
        handler: &'h dyn Handler,
        kind: ObjectKind,
        source: Option<Address>,
        init: F,
    ) where
        F: FnOnce(*mut T),
    {
        debug_assert!(non_null(slot));
        debug_assert!(aligned_to(slot, mem::align_of::<Self>()));

        let address = Address::of(slot);
        handler.process_object_event(&ObjectEvent::before_construct(
            address,
            Snapshot::pending::<T>(),
        ));
        // SAFETY: caller guarantees `slot` is valid for writes
        let value = unsafe { ptr::addr_of_mut!((*slot).value) };
        init(value);
        unsafe { ptr::addr_of_mut!((*slot).handler).write(handler) };
        handler.process_object_event(&ObjectEvent::new(
            kind,
            address,
            source,
            Snapshot::of(unsafe { &*value }),
        ));
    }

    pub fn address(&self) -> Address {
        Address::of(self)
    }

    pub fn handler(&self) -> &'h dyn Handler {
        self.handler
    }

    /// Copy assignment from another monitored value
    pub fn assign(&mut self, source: &Self)
    where
        T: Clone,
    {
        self.value.clone_from(&source.value);
        self.emit(ObjectKind::CopyAssign, Some(source.address()));
    }

    /// Move assignment. `source` is left holding `T::default()`.
    pub fn move_assign(&mut self, source: &mut Self)
    where
        T: Default,
    {
        self.value = mem::take(&mut source.value);
        self.emit(ObjectKind::MoveAssign, Some(source.address()));
    }

    /// Assign a bare value, moving it in
    pub fn set(&mut self, value: T) {
        self.value = value;
        self.emit(ObjectKind::UnderlyingMoveAssign, None);
    }

    /// Assign a copy of a bare value
    pub fn set_cloned(&mut self, value: &T)
    where
        T: Clone,
    {
        self.value.clone_from(value);
        self.emit(ObjectKind::UnderlyingCopyAssign, None);
    }

    fn emit(&self, kind: ObjectKind, source: Option<Address>) {
        self.handler.process_object_event(&ObjectEvent::new(
            kind,
            self.address(),
            source,
            Snapshot::of(&self.value),
        ));
    }
}

impl<T: Debug> Deref for Monitored<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Debug> Debug for Monitored<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<T: Debug> Drop for Monitored<'_, T> {
    fn drop(&mut self) {
        self.handler.process_object_event(&ObjectEvent::destroy(
            self.address(),
            Snapshot::of(&self.value),
        ));
    }
}

#[cfg(test)]
mod tests {
    use std::mem::MaybeUninit;

    use super::*;
    use crate::{event::Event, handler::Recorder};

    fn kinds(recorder: &Recorder) -> Vec<(ObjectKind, Address)> {
        recorder
            .take()
            .into_iter()
            .filter_map(|event| match event {
                Event::Object(event) => Some((event.kind(), event.destination())),
                Event::Allocation(_) => None,
            })
            .collect()
    }

    #[test]
    fn value_shares_the_wrappers_address() {
        let recorder = Recorder::new();
        let mut slot = MaybeUninit::<Monitored<u16>>::uninit();
        unsafe { Monitored::emplace(slot.as_mut_ptr(), &recorder, 7) };
        let monitored = unsafe { slot.assume_init_ref() };

        assert_eq!(monitored.address(), Address::of::<u16>(&**monitored));
        assert_eq!(**monitored, 7);
        assert_eq!(format!("{monitored:?}"), "7");
        unsafe { slot.assume_init_drop() };
    }

    #[test]
    fn lifecycle_is_reported_in_order() {
        let recorder = Recorder::new();
        let mut slots = MaybeUninit::<[Monitored<String>; 2]>::uninit();
        let a = slots.as_mut_ptr().cast::<Monitored<String>>();
        let b = unsafe { a.add(1) };
        let (at_a, at_b) = (Address::of(a), Address::of(b));

        unsafe {
            Monitored::emplace(a, &recorder, "x".to_owned());
            Monitored::emplace_clone(b, &*a);
            (*b).set("y".to_owned());
            (*a).move_assign(&mut *b);
            assert_eq!(**a, "y");
            assert_eq!(**b, "");
            (*b).assign(&*a);
            (*a).set_cloned(&"z".to_owned());
            ptr::drop_in_place(a);
            ptr::drop_in_place(b);
        }

        use ObjectKind::*;
        assert_eq!(
            kinds(&recorder),
            vec![
                (BeforeConstruct, at_a),
                (Construct, at_a),
                (BeforeConstruct, at_b),
                (CopyConstruct, at_b),
                (UnderlyingMoveAssign, at_b),
                (MoveAssign, at_a),
                (CopyAssign, at_b),
                (UnderlyingCopyAssign, at_a),
                (Destroy, at_a),
                (Destroy, at_b),
            ]
        );
    }

    #[test]
    fn move_construction_carries_the_source() {
        let recorder = Recorder::new();
        let mut source = MaybeUninit::<Monitored<Vec<u8>>>::uninit();
        let mut destination = MaybeUninit::<Monitored<Vec<u8>>>::uninit();
        unsafe {
            Monitored::emplace(source.as_mut_ptr(), &recorder, vec![1, 2]);
            Monitored::emplace_move(destination.as_mut_ptr(), source.assume_init_mut());
            assert!(source.assume_init_ref().is_empty());
            assert_eq!(**destination.assume_init_ref(), [1, 2]);
        }

        let events = recorder.events();
        let Some(Event::Object(moved)) = events.last() else {
            panic!("expected an object event, got {events:?}");
        };
        assert_eq!(moved.kind(), ObjectKind::MoveConstruct);
        assert_eq!(moved.source(), Some(Address::of(source.as_ptr())));
        assert_eq!(moved.snapshot().value.as_deref(), Some("[1, 2]"));

        unsafe {
            source.assume_init_drop();
            destination.assume_init_drop();
        }
    }
}
