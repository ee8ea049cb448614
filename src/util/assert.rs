//! Predicates for `debug_assert!`s on raw slot pointers.

/// `ptr` is a multiple of `align`
pub fn aligned_to<T>(ptr: *const T, align: usize) -> bool {
    debug_assert!(align.is_power_of_two());
    ptr as *const () as usize & (align - 1) == 0
}

/// `ptr` is not null
pub fn non_null<T>(ptr: *const T) -> bool
where
    T: ?Sized,
{
    !ptr.is_null()
}
