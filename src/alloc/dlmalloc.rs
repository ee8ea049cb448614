use std::{
    alloc::{AllocError, Allocator, Layout},
    cell::RefCell,
    fmt,
    ptr::{self, NonNull},
};

use crate::util::hint::cold;

use super::Capabilities;

// https://gee.cs.oswego.edu/dl/html/malloc.html

/// A private `dlmalloc` heap. Implements [`Allocator`], so that is the API.
///
/// Every `DlMalloc` owns its own arena: memory from one must go back to the
/// same one. It is not `Sync`, which is fine for a single-threaded monitoring
/// session. Share it by reference (`&DlMalloc` is an allocator too).
pub struct DlMalloc {
    heap: RefCell<::dlmalloc::Dlmalloc>,
}

impl DlMalloc {
    /// Construct a new, empty heap. No memory is requested until the first
    /// allocation.
    pub const fn new() -> Self {
        Self {
            heap: RefCell::new(::dlmalloc::Dlmalloc::new()),
        }
    }

    /// Hand unused memory at the top of the heap back to the system, keeping
    /// `pad` bytes. Returns whether anything was released.
    pub fn trim(&self, pad: usize) -> bool {
        // SAFETY: the heap is only ever touched through `self`
        unsafe { self.heap.borrow_mut().trim(pad) }
    }

    fn allocate_impl(&self, layout: Layout, zeroed: bool) -> Result<NonNull<[u8]>, AllocError> {
        if layout.size() == 0 {
            return cold(|| {
                let dangling = ptr::null_mut::<u8>().wrapping_add(layout.align());
                NonNull::new(dangling)
                    .map(|data| NonNull::slice_from_raw_parts(data, 0))
                    .ok_or(AllocError)
            });
        }

        let data = {
            let mut heap = self.heap.borrow_mut();
            // SAFETY: non-zero size, `Layout` guarantees a power-of-two align
            unsafe {
                if zeroed {
                    heap.calloc(layout.size(), layout.align())
                } else {
                    heap.malloc(layout.size(), layout.align())
                }
            }
        };

        match NonNull::new(data) {
            Some(data) => Ok(NonNull::slice_from_raw_parts(data, layout.size())),
            None => cold(|| {
                log::debug!("dlmalloc: out of memory for {layout:?}");
                Err(AllocError)
            }),
        }
    }
}

impl Default for DlMalloc {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DlMalloc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DlMalloc").finish_non_exhaustive()
    }
}

unsafe impl Allocator for DlMalloc {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        self.allocate_impl(layout, false)
    }

    fn allocate_zeroed(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        self.allocate_impl(layout, true)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        // SAFETY:
        // - Identical contract to caller, which is described in `Allocator`
        //   docs: `ptr` came from this heap with this layout.
        unsafe {
            self.heap
                .borrow_mut()
                .free(ptr.as_ptr(), layout.size(), layout.align())
        };
    }
}

/// Blocks come from `calloc`, which clears recycled chunks and skips only
/// fresh ones the system already zeroed.
impl Capabilities for DlMalloc {
    const ZEROED: bool = true;
}
