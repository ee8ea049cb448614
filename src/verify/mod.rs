//! Checks the event stream against the allocator contract.
//!
//! The [`Verifier`] is a [`Handler`] that keeps a [`MemoryRepresentation`]
//! up to date and, before applying each event, asks whether the event is
//! legal for the state the model is in. Violations are collected, never
//! raised on the spot: the monitored program keeps running and everything
//! comes out at once from [`Verifier::cleanup`].
//!
//! | event                              | requires                          |
//! |------------------------------------|-----------------------------------|
//! | `BeforeConstruct`                  | destination not `Initialised`     |
//! | copy/move (construct or assign)    | source `Initialised`              |
//! | any assignment                     | destination `Initialised`/`Moved` |
//! | `Destroy`                          | destination `Initialised`/`Moved` |
//! | `Deallocate`                       | an allocation with the same count |

mod diagnostic;
mod session;

pub use diagnostic::{Diagnostic, VerificationError, Violation};
pub use session::{Session, SessionGuard};

use std::{
    cell::{Ref, RefCell},
    process, thread,
};

use hashbrown::HashSet;

use crate::{
    event::{Address, AllocationEvent, ObjectEvent, ObjectKind},
    handler::Handler,
    memory::{Lifecycle, MemoryRepresentation, Ownership},
    util::hint::cold,
};

/// Handler that models memory and collects contract violations.
///
/// A bare `Verifier` takes no [`SessionGuard`], so two of them can watch the
/// same memory and each report the other's events as illegal. Tests that
/// monitor one container per process should start from [`Session`], which
/// holds the guard for as long as the verifier lives.
///
/// Dropping a verifier with diagnostics or owned blocks that
/// [`cleanup`](Verifier::cleanup) never reported aborts the process.
#[derive(Debug, Default)]
pub struct Verifier {
    memory: RefCell<MemoryRepresentation>,
    errors: RefCell<HashSet<Diagnostic>>,
}

impl Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// The model as of the last event
    pub fn memory(&self) -> Ref<'_, MemoryRepresentation> {
        self.memory.borrow()
    }

    /// Diagnostics recorded so far and not yet returned by
    /// [`Verifier::cleanup`], sorted
    pub fn pending(&self) -> Vec<Diagnostic> {
        let mut pending: Vec<_> = self.errors.borrow().iter().copied().collect();
        pending.sort_unstable();
        pending
    }

    /// End of session: report every allocation still outstanding, then
    /// return everything recorded since the last call.
    ///
    /// Outstanding allocations are dropped from the model once reported, so
    /// calling this again without new events gives `Ok(())`. Values in
    /// automatic storage that are still alive are not an error here.
    pub fn cleanup(&self) -> Result<(), VerificationError> {
        let diagnostics = self.drain();
        if diagnostics.is_empty() {
            Ok(())
        } else {
            Err(VerificationError::new(diagnostics))
        }
    }

    /// Like [`Verifier::cleanup`], for sessions that are being abandoned: the
    /// outstanding allocations are torn down and whatever would have been
    /// reported is handed back instead of raised.
    pub fn free_heap_allocations(&self) -> Vec<Diagnostic> {
        let mut diagnostics = self.drain();
        diagnostics.sort_unstable();
        if !diagnostics.is_empty() {
            log::debug!("discarding {} diagnostics", diagnostics.len());
        }
        diagnostics
    }

    fn drain(&self) -> Vec<Diagnostic> {
        self.report_outstanding();
        self.errors.borrow_mut().drain().collect()
    }

    fn report_outstanding(&self) {
        let mut memory = self.memory.borrow_mut();
        let owned: Vec<Address> = memory
            .blocks()
            .filter(|block| block.ownership() == Ownership::Owned)
            .map(|block| block.base())
            .collect();
        for base in owned {
            self.record(Violation::MemoryLeaked, base);
            for address in undestroyed(&memory, base) {
                self.record(Violation::ObjectLeaked, address);
            }
            memory.remove_block(base);
        }
    }

    fn record(&self, violation: Violation, address: Address) {
        cold(|| {
            log::warn!("{violation} at {address}");
            self.errors.borrow_mut().insert(Diagnostic { violation, address });
        })
    }

    fn check_object(&self, event: &ObjectEvent) {
        let memory = self.memory.borrow();
        let kind = event.kind();
        let destination = event.destination();
        let state = |address| memory.state_of(address, event.type_key());

        if kind == ObjectKind::BeforeConstruct {
            if state(destination) == Some(Lifecycle::Initialised) {
                self.record(Violation::ObjectLeaked, destination);
            }
            return;
        }

        if let Some(source) = event.source() {
            if state(source) != Some(Lifecycle::Initialised) {
                self.record(Violation::AssignFromUninitializedMemory, source);
            }
        }

        let live = state(destination).is_some_and(Lifecycle::is_live);
        if kind.is_assignment() && !live {
            self.record(Violation::AssignUninitializedMemory, destination);
        }
        if kind == ObjectKind::Destroy && !live {
            self.record(Violation::DestroyingNonconstructedMemory, destination);
        }
    }
}

fn undestroyed(memory: &MemoryRepresentation, base: Address) -> Vec<Address> {
    memory
        .undestroyed(base)
        .iter()
        .map(|element| element.address())
        .collect()
}

impl Handler for Verifier {
    fn before_deallocate(&self, event: &AllocationEvent) -> bool {
        log::trace!("{event:?}");
        let mut memory = self.memory.borrow_mut();
        let Some(block) = memory
            .block_starting_at(event.address)
            .filter(|block| block.ownership() == Ownership::Owned)
        else {
            self.record(Violation::DeallocatingUnallocatedMemory, event.address);
            return false;
        };

        if block.count() != event.count {
            log::debug!(
                "deallocate of {} slots at {}, allocated {}",
                event.count,
                event.address,
                block.count()
            );
            self.record(Violation::DeallocatingCountMismatch, event.address);
            // still allocated: a retry with the right count is accepted, and
            // a block never released is a leak at cleanup
            memory.force_clean(event.address);
            return false;
        }

        for address in undestroyed(&memory, event.address) {
            self.record(Violation::ObjectLeaked, address);
        }
        memory.force_clean(event.address);
        true
    }

    fn process_allocation_event(&self, event: &AllocationEvent) {
        log::trace!("{event:?}");
        self.memory.borrow_mut().process_allocation(event);
    }

    fn process_object_event(&self, event: &ObjectEvent) {
        log::trace!("{event:?}");
        self.check_object(event);
        self.memory.borrow_mut().process_object(event);
    }
}

impl Drop for Verifier {
    fn drop(&mut self) {
        let mut unseen = self.pending();
        unseen.extend(
            self.memory
                .get_mut()
                .blocks()
                .filter(|block| block.ownership() == Ownership::Owned)
                .map(|block| Diagnostic {
                    violation: Violation::MemoryLeaked,
                    address: block.base(),
                }),
        );
        if unseen.is_empty() {
            return;
        }
        let report = VerificationError::new(unseen);
        if thread::panicking() {
            log::error!("verifier dropped while panicking with unreported diagnostics:\n{report}");
            return;
        }
        log::error!("verifier dropped with unreported diagnostics:\n{report}");
        eprintln!("verifier dropped with unreported diagnostics:\n{report}");
        process::abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Snapshot;

    const BASE: Address = Address(0x4000);

    fn construct(verifier: &Verifier, address: Address, value: i64) {
        verifier.process_object_event(&ObjectEvent::before_construct(
            address,
            Snapshot::pending::<i64>(),
        ));
        verifier.process_object_event(&ObjectEvent::new(
            ObjectKind::Construct,
            address,
            None,
            Snapshot::of(&value),
        ));
    }

    fn destroy(verifier: &Verifier, address: Address, value: i64) {
        verifier.process_object_event(&ObjectEvent::destroy(address, Snapshot::of(&value)));
    }

    fn deallocate(verifier: &Verifier, event: AllocationEvent) -> bool {
        let approved = verifier.before_deallocate(&event);
        if approved {
            verifier.process_allocation_event(&event);
        }
        approved
    }

    fn violations(verifier: &Verifier) -> Vec<Violation> {
        match verifier.cleanup() {
            Ok(()) => Vec::new(),
            Err(error) => error.diagnostics().iter().map(|d| d.violation).collect(),
        }
    }

    #[test]
    fn matched_allocation_is_clean() {
        let verifier = Verifier::new();
        verifier.process_allocation_event(&AllocationEvent::allocate(BASE, 4, 8));
        assert!(deallocate(&verifier, AllocationEvent::deallocate(BASE, 4, 8)));
        assert_eq!(verifier.cleanup(), Ok(()));
    }

    #[test]
    fn count_mismatch_is_vetoed_and_can_be_retried() {
        let verifier = Verifier::new();
        verifier.process_allocation_event(&AllocationEvent::allocate(BASE, 4, 8));
        construct(&verifier, BASE, 1);
        assert!(!deallocate(&verifier, AllocationEvent::deallocate(BASE, 3, 8)));

        // force-cleaned, not forgotten
        let memory = verifier.memory();
        assert_eq!(memory.block_starting_at(BASE).unwrap().count(), 4);
        assert!(memory.undestroyed(BASE).is_empty());
        drop(memory);

        assert!(deallocate(&verifier, AllocationEvent::deallocate(BASE, 4, 8)));
        assert!(verifier.memory().is_empty());
        assert_eq!(
            violations(&verifier),
            vec![Violation::DeallocatingCountMismatch]
        );
    }

    #[test]
    fn count_mismatch_never_retried_is_also_a_leak() {
        let verifier = Verifier::new();
        verifier.process_allocation_event(&AllocationEvent::allocate(BASE, 2, 8));
        assert!(!deallocate(&verifier, AllocationEvent::deallocate(BASE, 3, 8)));
        assert_eq!(
            violations(&verifier),
            vec![Violation::MemoryLeaked, Violation::DeallocatingCountMismatch]
        );
        assert_eq!(verifier.cleanup(), Ok(()));
    }

    #[test]
    fn unknown_deallocation_is_vetoed() {
        let verifier = Verifier::new();
        assert!(!deallocate(&verifier, AllocationEvent::deallocate(BASE, 1, 8)));
        let error = verifier.cleanup().unwrap_err();
        assert_eq!(
            error.diagnostics(),
            &[Diagnostic {
                violation: Violation::DeallocatingUnallocatedMemory,
                address: BASE,
            }]
        );
    }

    #[test]
    fn deallocating_live_objects_leaks_only_the_objects() {
        let verifier = Verifier::new();
        verifier.process_allocation_event(&AllocationEvent::allocate(BASE, 2, 8));
        construct(&verifier, BASE, 1);
        construct(&verifier, BASE.offset(8), 2);
        destroy(&verifier, BASE.offset(8), 2);
        assert!(deallocate(&verifier, AllocationEvent::deallocate(BASE, 2, 8)));
        assert_eq!(violations(&verifier), vec![Violation::ObjectLeaked]);
    }

    #[test]
    fn outstanding_allocation_is_reported_once() {
        let verifier = Verifier::new();
        verifier.process_allocation_event(&AllocationEvent::allocate(BASE, 1, 8));
        construct(&verifier, BASE, 5);
        assert_eq!(
            violations(&verifier),
            vec![Violation::MemoryLeaked, Violation::ObjectLeaked]
        );
        assert_eq!(verifier.cleanup(), Ok(()));
    }

    #[test]
    fn constructing_over_a_live_object_leaks_it() {
        let verifier = Verifier::new();
        construct(&verifier, BASE, 1);
        construct(&verifier, BASE, 2);
        destroy(&verifier, BASE, 2);
        assert_eq!(violations(&verifier), vec![Violation::ObjectLeaked]);
    }

    #[test]
    fn destroying_twice_is_reported() {
        let verifier = Verifier::new();
        verifier.process_allocation_event(&AllocationEvent::allocate(BASE, 1, 8));
        construct(&verifier, BASE, 1);
        destroy(&verifier, BASE, 1);
        destroy(&verifier, BASE, 1);
        assert!(deallocate(&verifier, AllocationEvent::deallocate(BASE, 1, 8)));
        assert_eq!(
            violations(&verifier),
            vec![Violation::DestroyingNonconstructedMemory]
        );
    }

    #[test]
    fn assigning_to_and_from_raw_memory_is_reported() {
        let verifier = Verifier::new();
        verifier.process_allocation_event(&AllocationEvent::allocate(BASE, 2, 8));
        verifier.process_object_event(&ObjectEvent::new(
            ObjectKind::CopyAssign,
            BASE,
            Some(BASE.offset(8)),
            Snapshot::of(&0i64),
        ));
        // the assignment still happened, so the slot now holds a value
        destroy(&verifier, BASE, 0);
        assert!(deallocate(&verifier, AllocationEvent::deallocate(BASE, 2, 8)));
        let error = verifier.cleanup().unwrap_err();
        assert_eq!(
            error.diagnostics(),
            &[
                Diagnostic {
                    violation: Violation::AssignUninitializedMemory,
                    address: BASE,
                },
                Diagnostic {
                    violation: Violation::AssignFromUninitializedMemory,
                    address: BASE.offset(8),
                },
            ]
        );
    }

    #[test]
    fn moved_from_values_may_be_assigned_and_destroyed_but_not_moved_again() {
        let verifier = Verifier::new();
        verifier.process_allocation_event(&AllocationEvent::allocate(BASE, 3, 8));
        let [a, b, c] = [BASE, BASE.offset(8), BASE.offset(16)];
        construct(&verifier, a, 1);
        construct(&verifier, b, 2);
        construct(&verifier, c, 3);

        let move_assign = |destination, source| {
            verifier.process_object_event(&ObjectEvent::new(
                ObjectKind::MoveAssign,
                destination,
                Some(source),
                Snapshot::of(&1i64),
            ))
        };
        move_assign(b, a);
        assert!(verifier.pending().is_empty());
        move_assign(c, a);

        verifier.process_object_event(&ObjectEvent::new(
            ObjectKind::UnderlyingMoveAssign,
            a,
            None,
            Snapshot::of(&9i64),
        ));
        for (address, value) in [(a, 9), (b, 1), (c, 1)] {
            destroy(&verifier, address, value);
        }
        assert!(deallocate(&verifier, AllocationEvent::deallocate(BASE, 3, 8)));

        let error = verifier.cleanup().unwrap_err();
        assert_eq!(
            error.diagnostics(),
            &[Diagnostic {
                violation: Violation::AssignFromUninitializedMemory,
                address: a,
            }]
        );
    }

    #[test]
    fn free_heap_allocations_hands_back_instead_of_raising() {
        let verifier = Verifier::new();
        verifier.process_allocation_event(&AllocationEvent::allocate(BASE, 1, 8));
        let discarded = verifier.free_heap_allocations();
        assert_eq!(
            discarded,
            vec![Diagnostic {
                violation: Violation::MemoryLeaked,
                address: BASE,
            }]
        );
        assert!(verifier.pending().is_empty());
        assert_eq!(verifier.cleanup(), Ok(()));
    }
}
