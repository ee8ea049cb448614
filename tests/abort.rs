use std::{
    env,
    process::{Command, Stdio},
};

use lifecheck::{
    event::{Address, ObjectEvent, Snapshot},
    handler::Handler,
    verify::Verifier,
};

/// Set in the re-executed test binary: run the body that must not survive
const CHILD: &str = "LIFECHECK_ABORT_CHILD";

fn run_as_child(test: &str) -> std::process::ExitStatus {
    Command::new(env::current_exe().unwrap())
        .args(["--exact", test, "--test-threads=1", "--nocapture"])
        .env(CHILD, "1")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap()
}

fn assert_aborted(status: std::process::ExitStatus) {
    assert!(!status.success());
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(status.signal(), Some(6), "expected SIGABRT, got {status:?}");
    }
}

#[test]
fn unreported_diagnostics_abort_on_drop() {
    if env::var_os(CHILD).is_some() {
        let verifier = Verifier::new();
        verifier.process_object_event(&ObjectEvent::destroy(Address(0x10), Snapshot::of(&1u8)));
        drop(verifier);
        return;
    }
    assert_aborted(run_as_child("unreported_diagnostics_abort_on_drop"));
}

#[test]
fn outstanding_allocations_abort_on_drop() {
    if env::var_os(CHILD).is_some() {
        let verifier = Verifier::new();
        verifier.process_allocation_event(&lifecheck::event::AllocationEvent::allocate(
            Address(0x1000),
            2,
            8,
        ));
        drop(verifier);
        return;
    }
    assert_aborted(run_as_child("outstanding_allocations_abort_on_drop"));
}

#[test]
fn a_cleaned_up_verifier_drops_quietly() {
    if env::var_os(CHILD).is_some() {
        let verifier = Verifier::new();
        verifier.process_object_event(&ObjectEvent::destroy(Address(0x10), Snapshot::of(&1u8)));
        assert!(verifier.cleanup().is_err());
        drop(verifier);
        return;
    }
    assert!(run_as_child("a_cleaned_up_verifier_drops_quietly").success());
}
