use std::alloc::{Global, System};

/// What a backing allocator promises beyond [`Allocator`](std::alloc::Allocator).
pub trait Capabilities {
    /// The facade asks this allocator for zeroed memory
    /// ([`allocate_zeroed`](std::alloc::Allocator::allocate_zeroed)), so every
    /// block it hands out starts as zero bytes, reused memory included.
    const ZEROED: bool = false;

    /// The most slots of `stride` bytes one allocation may hold.
    fn max_count(&self, stride: usize) -> usize {
        isize::MAX as usize / stride.max(1)
    }
}

impl Capabilities for Global {}

impl Capabilities for System {}

impl<A> Capabilities for &A
where
    A: Capabilities + ?Sized,
{
    const ZEROED: bool = A::ZEROED;

    fn max_count(&self, stride: usize) -> usize {
        (**self).max_count(stride)
    }
}
