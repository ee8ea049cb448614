//! The single seam between producers of events and whoever consumes them.
//!
//! Wrappers and the allocator facade only ever talk to a [`Handler`]. The
//! [`Verifier`](crate::verify::Verifier) is one, the [`Forwarder`] and
//! [`Recorder`] are others, and [`Tee`] lets two of them watch the identical
//! stream.

mod forward;
mod record;

pub use forward::Forwarder;
pub use record::{Recorder, RecordingFromFileError};

use crate::event::{AllocationEvent, ObjectEvent};

pub trait Handler {
    /// Asked before the memory of a deallocation is released. Returning
    /// `false` vetoes the release: the memory is leaked on purpose and no
    /// `Deallocate` event follows.
    fn before_deallocate(&self, event: &AllocationEvent) -> bool;

    fn process_allocation_event(&self, event: &AllocationEvent);

    fn process_object_event(&self, event: &ObjectEvent);
}

impl<H> Handler for &H
where
    H: Handler + ?Sized,
{
    fn before_deallocate(&self, event: &AllocationEvent) -> bool {
        (**self).before_deallocate(event)
    }

    fn process_allocation_event(&self, event: &AllocationEvent) {
        (**self).process_allocation_event(event)
    }

    fn process_object_event(&self, event: &ObjectEvent) {
        (**self).process_object_event(event)
    }
}

/// Hands every event to both `A` and `B`, in that order. A deallocation goes
/// ahead only if both approve; both are always asked.
#[derive(Debug)]
pub struct Tee<A, B>(pub A, pub B);

impl<A, B> Handler for Tee<A, B>
where
    A: Handler,
    B: Handler,
{
    fn before_deallocate(&self, event: &AllocationEvent) -> bool {
        let first = self.0.before_deallocate(event);
        let second = self.1.before_deallocate(event);
        first && second
    }

    fn process_allocation_event(&self, event: &AllocationEvent) {
        self.0.process_allocation_event(event);
        self.1.process_allocation_event(event);
    }

    fn process_object_event(&self, event: &ObjectEvent) {
        self.0.process_object_event(event);
        self.1.process_object_event(event);
    }
}
