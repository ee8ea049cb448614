use std::{
    cell::RefCell,
    fs::File,
    io::{self, Read, Write},
    path::Path,
};

use crate::event::{AllocationEvent, Event, ObjectEvent};

use super::Handler;

/// Keeps every event it sees, in order. Never vetoes a deallocation.
#[derive(Debug, Default)]
pub struct Recorder {
    events: RefCell<Vec<Event>>,
}

#[non_exhaustive]
#[derive(Debug)]
pub enum RecordingFromFileError {
    IoError(io::Error),
    SerdeJsonError(serde_json::error::Error),
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    /// A copy of everything recorded so far
    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn take(&self) -> Vec<Event> {
        self.events.take()
    }

    /// Write the recording as a JSON array of events
    pub fn write_to_file<P>(&self, path: P) -> io::Result<()>
    where
        P: AsRef<Path>,
    {
        let mut file = File::create(path)?;
        file.write_all(
            &serde_json::to_vec(&*self.events.borrow())
                .expect("events should always be valid for serialization to json"),
        )?;
        Ok(())
    }

    /// Read back a recording written by [`Recorder::write_to_file`]
    pub fn from_file<P>(path: P) -> Result<Vec<Event>, RecordingFromFileError>
    where
        P: AsRef<Path>,
    {
        let mut file = File::open(path).map_err(RecordingFromFileError::IoError)?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)
            .map_err(RecordingFromFileError::IoError)?;
        serde_json::from_str(&buf).map_err(RecordingFromFileError::SerdeJsonError)
    }
}

impl Handler for Recorder {
    fn before_deallocate(&self, _: &AllocationEvent) -> bool {
        true
    }

    fn process_allocation_event(&self, event: &AllocationEvent) {
        self.events.borrow_mut().push(Event::Allocation(*event));
    }

    fn process_object_event(&self, event: &ObjectEvent) {
        self.events.borrow_mut().push(Event::Object(event.clone()));
    }
}
