use std::{
    fmt::{self, Debug},
    marker::PhantomPinned,
    mem::MaybeUninit,
    pin::Pin,
    ptr,
};

use crate::handler::Handler;

use super::Monitored;

/// Automatic storage for one [`Monitored`] value.
///
/// Pin it (`std::pin::pin!`) and construct into it; the value is destroyed
/// when the `Local` goes out of scope. A `Local` reported to a verifier ends
/// up as an inferred block that disappears again once its value is destroyed.
///
/// ```
/// # use std::pin::pin;
/// # use lifecheck::{monitor::Local, verify::Verifier};
/// let verifier = Verifier::new();
/// let mut n = pin!(Local::new());
/// n.as_mut().construct(&verifier, 5u32);
/// assert_eq!(**n.get().unwrap(), 5);
/// n.as_mut().destroy();
/// verifier.cleanup().unwrap();
/// ```
pub struct Local<'h, T: Debug> {
    slot: MaybeUninit<Monitored<'h, T>>,
    live: bool,
    _pin: PhantomPinned,
}

impl<'h, T: Debug> Local<'h, T> {
    pub const fn new() -> Self {
        Self {
            slot: MaybeUninit::uninit(),
            live: false,
            _pin: PhantomPinned,
        }
    }

    /// Build into the slot with `f`. A value already living there is
    /// forgotten, not destroyed.
    fn build<F>(self: Pin<&mut Self>, f: F) -> &mut Monitored<'h, T>
    where
        F: FnOnce(*mut Monitored<'h, T>),
    {
        // SAFETY: the slot is never moved out of
        let this = unsafe { self.get_unchecked_mut() };
        f(this.slot.as_mut_ptr());
        this.live = true;
        // SAFETY: `f` initialised it
        unsafe { this.slot.assume_init_mut() }
    }

    pub fn construct(self: Pin<&mut Self>, handler: &'h dyn Handler, value: T) -> &mut Monitored<'h, T> {
        // SAFETY: pinned slot, valid for writes
        self.build(|slot| unsafe { Monitored::emplace(slot, handler, value) })
    }

    pub fn construct_with<F>(self: Pin<&mut Self>, handler: &'h dyn Handler, f: F) -> &mut Monitored<'h, T>
    where
        F: FnOnce() -> T,
    {
        self.build(|slot| unsafe { Monitored::emplace_with(slot, handler, f) })
    }

    /// # Safety
    ///
    /// `init` must fully initialise the `T` it is given.
    pub unsafe fn construct_in_place<F>(
        self: Pin<&mut Self>,
        handler: &'h dyn Handler,
        init: F,
    ) -> &mut Monitored<'h, T>
    where
        F: FnOnce(*mut T),
    {
        self.build(|slot| unsafe { Monitored::emplace_in_place(slot, handler, init) })
    }

    pub fn construct_default(self: Pin<&mut Self>, handler: &'h dyn Handler) -> &mut Monitored<'h, T>
    where
        T: Default,
    {
        self.build(|slot| unsafe { Monitored::emplace_default(slot, handler) })
    }

    pub fn clone_from_monitored(self: Pin<&mut Self>, source: &Monitored<'h, T>) -> &mut Monitored<'h, T>
    where
        T: Clone,
    {
        self.build(|slot| unsafe { Monitored::emplace_clone(slot, source) })
    }

    pub fn move_from(self: Pin<&mut Self>, source: &mut Monitored<'h, T>) -> &mut Monitored<'h, T>
    where
        T: Default,
    {
        self.build(|slot| unsafe { Monitored::emplace_move(slot, source) })
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn get(&self) -> Option<&Monitored<'h, T>> {
        // SAFETY: `live` means initialised
        self.live.then(|| unsafe { self.slot.assume_init_ref() })
    }

    /// Mutable access to the value. Named apart from [`Pin::get_mut`], which
    /// method calls on a pinned `Local` would otherwise collide with.
    pub fn value_mut(self: Pin<&mut Self>) -> Option<&mut Monitored<'h, T>> {
        // SAFETY: the slot is never moved out of
        let this = unsafe { self.get_unchecked_mut() };
        this.live.then(|| unsafe { this.slot.assume_init_mut() })
    }

    /// Destroy the value, if there is one. Returns whether there was.
    pub fn destroy(self: Pin<&mut Self>) -> bool {
        // SAFETY: the slot is never moved out of
        let this = unsafe { self.get_unchecked_mut() };
        this.destroy_in_place()
    }

    fn destroy_in_place(&mut self) -> bool {
        if !self.live {
            return false;
        }
        self.live = false;
        // SAFETY: was live, and is marked dead before anything can observe it
        unsafe { ptr::drop_in_place(self.slot.as_mut_ptr()) };
        true
    }
}

impl<T: Debug> Default for Local<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Debug> Debug for Local<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("Local").field(value).finish(),
            None => f.write_str("Local(<empty>)"),
        }
    }
}

impl<T: Debug> Drop for Local<'_, T> {
    fn drop(&mut self) {
        self.destroy_in_place();
    }
}

#[cfg(test)]
mod tests {
    use std::pin::pin;

    use super::*;
    use crate::{
        event::{Event, ObjectKind},
        handler::Recorder,
    };

    fn object_kinds(recorder: &Recorder) -> Vec<ObjectKind> {
        recorder
            .take()
            .into_iter()
            .filter_map(|event| match event {
                Event::Object(event) => Some(event.kind()),
                Event::Allocation(_) => None,
            })
            .collect()
    }

    #[test]
    fn drop_destroys_a_live_value() {
        let recorder = Recorder::new();
        {
            let mut local = pin!(Local::new());
            local.as_mut().construct(&recorder, 'a');
            assert!(local.is_live());
            assert_eq!(format!("{:?}", local.as_ref().get_ref()), "Local('a')");
        }
        use ObjectKind::*;
        assert_eq!(
            object_kinds(&recorder),
            vec![BeforeConstruct, Construct, Destroy]
        );
    }

    #[test]
    fn explicit_destroy_is_not_repeated() {
        let recorder = Recorder::new();
        {
            let mut local = pin!(Local::<u8>::new());
            assert!(!local.as_mut().destroy());
            local.as_mut().construct_default(&recorder);
            assert!(local.as_mut().destroy());
            assert!(local.get().is_none());
        }
        assert_eq!(object_kinds(&recorder).len(), 3);
    }

    #[test]
    fn copies_and_moves_between_locals() {
        let recorder = Recorder::new();
        let mut a = pin!(Local::new());
        let mut b = pin!(Local::new());
        let mut c = pin!(Local::new());

        a.as_mut().construct_with(&recorder, || String::from("hi"));
        let source = a.as_mut().value_mut().unwrap();
        b.as_mut().clone_from_monitored(source);
        c.as_mut().move_from(source);

        assert_eq!(**a.get().unwrap(), "");
        assert_eq!(**b.get().unwrap(), "hi");
        assert_eq!(**c.get().unwrap(), "hi");
    }

    #[test]
    fn pinned_locals_hand_out_mutable_access() {
        let recorder = Recorder::new();
        let mut local = pin!(Local::<u16>::new());
        assert!(local.as_mut().value_mut().is_none());

        local.as_mut().construct(&recorder, 1);
        local.as_mut().value_mut().unwrap().set(2);
        assert_eq!(**local.get().unwrap(), 2);

        use ObjectKind::*;
        assert_eq!(
            object_kinds(&recorder),
            vec![BeforeConstruct, Construct, UnderlyingMoveAssign]
        );
    }
}
