#![feature(allocator_api)]

use std::{pin::pin, sync::Mutex};

use lifecheck::{
    alloc::MonitoredAllocator,
    monitor::Local,
    verify::{Session, SessionGuard, Violation},
};

// sessions are process-wide, tests in this file run on several threads
static SERIAL: Mutex<()> = Mutex::new(());

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn session_verifies_through_its_handler() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    init_logging();

    let session = Session::new();
    let allocator = MonitoredAllocator::<u32>::new(&session);
    let slots = allocator.allocate(3).unwrap();
    unsafe {
        allocator.construct(slots.slot(0), 1);
        allocator.destroy(slots.slot(0));
        allocator.destroy(slots.slot(0));
        allocator.deallocate(&slots, 3);
    }
    let error = session.cleanup().unwrap_err();
    assert_eq!(
        error.violations(),
        [Violation::DestroyingNonconstructedMemory]
    );
}

#[test]
fn a_second_session_is_refused_until_the_first_ends() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    init_logging();

    let session = Session::new();
    assert!(Session::try_new().is_none());
    {
        let mut local = pin!(Local::new());
        local.as_mut().construct(&session, "scoped");
    }
    assert_eq!(session.cleanup(), Ok(()));
    drop(session);

    let guard = SessionGuard::try_acquire();
    assert!(guard.is_some());
    drop(guard);
    assert!(!SessionGuard::is_active());
}
