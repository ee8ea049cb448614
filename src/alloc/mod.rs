//! The allocator facade containers are written against.
//!
//! A [`MonitoredAllocator`] hands out raw slots of [`Monitored`] values from a
//! backing [`Allocator`] and reports each allocation and deallocation to its
//! [`Handler`]. Construction and destruction go straight to the value
//! wrapper, which reports those itself.
//!
//! ```plaintext
//!   allocate(n)     backing.allocate          Allocate(slot0, n, stride)
//!   construct(p)    Monitored::emplace        (object events)
//!   destroy(p)      drop_in_place             (object events)
//!   deallocate(n)   handler.before_deallocate ? backing.deallocate, Deallocate
//! ```

mod capabilities;
mod dlmalloc;

pub use capabilities::Capabilities;
pub use self::dlmalloc::DlMalloc;

use std::{
    alloc::{AllocError, Allocator, Global, Layout},
    fmt::{self, Debug},
    marker::PhantomData,
    mem,
    ptr::{self, NonNull},
};

use crate::{
    event::{Address, AllocationEvent},
    handler::Handler,
    monitor::{Monitored, MonitoredPtr, Mutability},
    util::assert::{aligned_to, non_null},
};

pub struct MonitoredAllocator<'h, T, A = Global>
where
    T: Debug,
    A: Allocator + Capabilities,
{
    allocator: A,
    handler: &'h dyn Handler,
    _ty: PhantomData<fn() -> T>,
}

impl<'h, T: Debug> MonitoredAllocator<'h, T> {
    pub fn new(handler: &'h dyn Handler) -> Self {
        Self::new_in(handler, Global)
    }
}

impl<'h, T, A> MonitoredAllocator<'h, T, A>
where
    T: Debug,
    A: Allocator + Capabilities,
{
    /// Bytes between two consecutive slots
    pub const STRIDE: usize = mem::size_of::<Monitored<'h, T>>();

    pub fn new_in(handler: &'h dyn Handler, allocator: A) -> Self {
        Self {
            allocator,
            handler,
            _ty: PhantomData,
        }
    }

    /// The same backing allocator and handler, for slots of `U`
    pub fn rebind<U: Debug>(&self) -> MonitoredAllocator<'h, U, A>
    where
        A: Clone,
    {
        MonitoredAllocator::new_in(self.handler, self.allocator.clone())
    }

    pub fn handler(&self) -> &'h dyn Handler {
        self.handler
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// The most slots one [`MonitoredAllocator::allocate`] may ask for
    pub fn max_count(&self) -> usize {
        self.allocator.max_count(Self::STRIDE)
    }

    /// Uninitialised storage for `count` values. A zero `count` gives a null
    /// pointer and reports no allocation.
    pub fn allocate(&self, count: usize) -> Result<MonitoredPtr<'h, T>, AllocError> {
        if count == 0 {
            return Ok(MonitoredPtr::null(self.handler));
        }
        if count > self.max_count() {
            log::debug!("allocate: {count} slots is over the limit of {}", self.max_count());
            return Err(AllocError);
        }
        let layout = Layout::array::<Monitored<'h, T>>(count).map_err(|_| AllocError)?;
        let block = if A::ZEROED {
            self.allocator.allocate_zeroed(layout)?
        } else {
            self.allocator.allocate(layout)?
        };
        let slot = block.cast::<Monitored<'h, T>>().as_ptr();
        debug_assert!(aligned_to(slot, layout.align()));

        self.handler
            .process_allocation_event(&AllocationEvent::allocate(
                Address::of(slot),
                count,
                Self::STRIDE,
            ));
        Ok(MonitoredPtr::new(self.handler, slot))
    }

    /// Release the storage `pointer` points to, if the handler agrees.
    /// Returns whether it was released; a refused deallocation leaks the
    /// memory.
    ///
    /// Releasing a null pointer with a zero count does nothing.
    ///
    /// # Safety
    ///
    /// `pointer` must point to storage from [`MonitoredAllocator::allocate`]
    /// on an allocator sharing this one's backing allocator, not yet
    /// released. `count` must be the count it was allocated with, unless the
    /// handler refuses mismatched counts (a
    /// [`Verifier`](crate::verify::Verifier) does).
    pub unsafe fn deallocate<M: Mutability>(
        &self,
        pointer: &MonitoredPtr<'h, T, M>,
        count: usize,
    ) -> bool {
        let slot = pointer.get();
        if slot.is_null() && count == 0 {
            return true;
        }
        let event = AllocationEvent::deallocate(Address::of(slot), count, Self::STRIDE);
        if !self.handler.before_deallocate(&event) {
            log::debug!("deallocate of {} refused, leaking it", event.address);
            return false;
        }

        let (Ok(layout), Some(data)) = (
            Layout::array::<Monitored<'h, T>>(count),
            NonNull::new(slot.cast::<u8>()),
        ) else {
            log::error!("deallocate: {count} slots at {} cannot have been allocated", event.address);
            return false;
        };
        // SAFETY: caller guarantees `slot` came from this backing allocator
        //         with this layout
        unsafe { self.allocator.deallocate(data, layout) };
        self.handler.process_allocation_event(&event);
        true
    }

    /// # Safety
    ///
    /// `slot` must be an unconstructed slot of storage from this allocator.
    pub unsafe fn construct(&self, slot: *mut Monitored<'h, T>, value: T) {
        debug_assert!(non_null(slot));
        unsafe { Monitored::emplace(slot, self.handler, value) }
    }

    /// # Safety
    ///
    /// See [`MonitoredAllocator::construct`].
    pub unsafe fn construct_with<F>(&self, slot: *mut Monitored<'h, T>, f: F)
    where
        F: FnOnce() -> T,
    {
        debug_assert!(non_null(slot));
        unsafe { Monitored::emplace_with(slot, self.handler, f) }
    }

    /// # Safety
    ///
    /// See [`MonitoredAllocator::construct`]. `init` must fully initialise
    /// the value.
    pub unsafe fn construct_in_place<F>(&self, slot: *mut Monitored<'h, T>, init: F)
    where
        F: FnOnce(*mut T),
    {
        debug_assert!(non_null(slot));
        unsafe { Monitored::emplace_in_place(slot, self.handler, init) }
    }

    /// # Safety
    ///
    /// See [`MonitoredAllocator::construct`].
    pub unsafe fn construct_default(&self, slot: *mut Monitored<'h, T>)
    where
        T: Default,
    {
        debug_assert!(non_null(slot));
        unsafe { Monitored::emplace_default(slot, self.handler) }
    }

    /// # Safety
    ///
    /// See [`MonitoredAllocator::construct`].
    pub unsafe fn construct_clone(&self, slot: *mut Monitored<'h, T>, source: &Monitored<'h, T>)
    where
        T: Clone,
    {
        debug_assert!(non_null(slot));
        unsafe { Monitored::emplace_clone(slot, source) }
    }

    /// # Safety
    ///
    /// See [`MonitoredAllocator::construct`].
    pub unsafe fn construct_move(&self, slot: *mut Monitored<'h, T>, source: &mut Monitored<'h, T>)
    where
        T: Default,
    {
        debug_assert!(non_null(slot));
        unsafe { Monitored::emplace_move(slot, source) }
    }

    /// # Safety
    ///
    /// `slot` must hold a constructed value, which is not used again.
    pub unsafe fn destroy(&self, slot: *mut Monitored<'h, T>) {
        debug_assert!(non_null(slot));
        unsafe { ptr::drop_in_place(slot) }
    }
}

impl<T, A> Clone for MonitoredAllocator<'_, T, A>
where
    T: Debug,
    A: Allocator + Capabilities + Clone,
{
    fn clone(&self) -> Self {
        self.rebind()
    }
}

impl<T, A> Debug for MonitoredAllocator<'_, T, A>
where
    T: Debug,
    A: Allocator + Capabilities + Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredAllocator")
            .field("type", &tynm::type_name::<T>())
            .field("stride", &Self::STRIDE)
            .field("allocator", &self.allocator)
            .finish_non_exhaustive()
    }
}
