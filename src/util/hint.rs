/// Run `f` out of line, on a path the optimiser should treat as rarely taken.
/// Violation reporting goes through here so the bookkeeping fast path stays
/// small.
#[cold]
#[inline(never)]
pub fn cold<R, F: FnOnce() -> R>(f: F) -> R {
    f()
}
