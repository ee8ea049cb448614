#![feature(allocator_api)]

use std::{env, fs, pin::pin, process, thread};

use lifecheck::{
    alloc::MonitoredAllocator,
    event::{AllocationKind, Event},
    handler::{Forwarder, Handler, Recorder, RecordingFromFileError, Tee},
    monitor::Local,
    verify::{Verifier, Violation},
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A short session with one leaked value
fn exercise(handler: &dyn Handler) {
    let allocator = MonitoredAllocator::<String>::new(handler);
    let slots = allocator.allocate(2).unwrap();
    unsafe {
        allocator.construct(slots.slot(0), "kept".to_owned());
        allocator.construct(slots.slot(1), "dropped".to_owned());
        allocator.destroy(slots.slot(1));
        allocator.deallocate(&slots, 2);
    }
    let mut local = pin!(Local::new());
    local.as_mut().construct(handler, 3.5f32);
}

/// Feed a recorded stream to `handler` as the original producers would have
fn replay(events: &[Event], handler: &dyn Handler) {
    for event in events {
        match event {
            Event::Allocation(event) => {
                if event.kind == AllocationKind::Deallocate && !handler.before_deallocate(event) {
                    continue;
                }
                handler.process_allocation_event(event);
            }
            Event::Object(event) => handler.process_object_event(event),
        }
    }
}

#[test]
fn tee_shows_both_handlers_the_same_stream() {
    init_logging();
    let verifier = Verifier::new();
    let recorder = Recorder::new();
    let (forwarder, receiver) = Forwarder::channel();
    let renderer = thread::spawn(move || receiver.iter().collect::<Vec<_>>());

    {
        let handler = Tee(&verifier, Tee(&recorder, forwarder));
        exercise(&handler);
    }
    let rendered = renderer.join().unwrap();
    let recorded = recorder.events();

    assert_eq!(rendered, recorded);
    let error = verifier.cleanup().unwrap_err();
    assert_eq!(error.violations(), [Violation::ObjectLeaked]);
}

#[test]
fn a_recording_reproduces_the_verdict() {
    init_logging();
    let recorder = Recorder::new();
    exercise(&recorder);

    let path = env::temp_dir().join(format!("lifecheck-recording-{}.json", process::id()));
    recorder.write_to_file(&path).unwrap();
    let events = Recorder::from_file(&path).unwrap();
    fs::remove_file(&path).unwrap();
    assert_eq!(events, recorder.events());

    let verifier = Verifier::new();
    replay(&events, &verifier);
    let error = verifier.cleanup().unwrap_err();
    assert_eq!(error.violations(), [Violation::ObjectLeaked]);
}

#[test]
fn unreadable_recordings_are_reported() {
    init_logging();
    let missing = env::temp_dir().join("lifecheck-recording-that-does-not-exist.json");
    assert!(matches!(
        Recorder::from_file(&missing),
        Err(RecordingFromFileError::IoError(_))
    ));

    let garbage = env::temp_dir().join(format!("lifecheck-garbage-{}.json", process::id()));
    fs::write(&garbage, "[{\"Allocation\": 12}]").unwrap();
    let result = Recorder::from_file(&garbage);
    fs::remove_file(&garbage).unwrap();
    assert!(matches!(
        result,
        Err(RecordingFromFileError::SerdeJsonError(_))
    ));
}
