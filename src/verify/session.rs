use std::{
    marker::PhantomData,
    ops::Deref,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{
    event::{AllocationEvent, ObjectEvent},
    handler::Handler,
};

use super::Verifier;

static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Proof that this is the only monitoring session in the process. Released on
/// drop.
///
/// Monitored values hold plain references to their handler, so nothing stops
/// two verifiers from watching the same memory. The guard makes that a loud
/// failure instead of a confusing report.
#[derive(Debug)]
pub struct SessionGuard {
    // !Send: released on the thread that took it
    _marker: PhantomData<*const ()>,
}

impl SessionGuard {
    /// # Panics
    ///
    /// If another session is active.
    pub fn acquire() -> Self {
        Self::try_acquire().unwrap_or_else(|| panic!("a monitoring session is already active"))
    }

    pub fn try_acquire() -> Option<Self> {
        SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self {
                _marker: PhantomData,
            })
    }

    pub fn is_active() -> bool {
        SESSION_ACTIVE.load(Ordering::Acquire)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        SESSION_ACTIVE.store(false, Ordering::Release);
    }
}

/// A [`Verifier`] that holds the [`SessionGuard`] for as long as it lives.
#[derive(Debug)]
pub struct Session {
    // dropped (and so checked) before the guard is released
    verifier: Verifier,
    _guard: SessionGuard,
}

impl Session {
    /// # Panics
    ///
    /// If another session is active.
    pub fn new() -> Self {
        Self::with_guard(SessionGuard::acquire())
    }

    pub fn try_new() -> Option<Self> {
        SessionGuard::try_acquire().map(Self::with_guard)
    }

    fn with_guard(guard: SessionGuard) -> Self {
        log::debug!("monitoring session started");
        Self {
            verifier: Verifier::new(),
            _guard: guard,
        }
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }
}

impl Deref for Session {
    type Target = Verifier;

    fn deref(&self) -> &Verifier {
        &self.verifier
    }
}

impl Handler for Session {
    fn before_deallocate(&self, event: &AllocationEvent) -> bool {
        self.verifier.before_deallocate(event)
    }

    fn process_allocation_event(&self, event: &AllocationEvent) {
        self.verifier.process_allocation_event(event)
    }

    fn process_object_event(&self, event: &ObjectEvent) {
        self.verifier.process_object_event(event)
    }
}
