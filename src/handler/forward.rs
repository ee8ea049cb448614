use crossbeam::channel::{self, Receiver, Sender};

use crate::event::{AllocationEvent, Event, ObjectEvent};

use super::Handler;

/// Republishes the event stream over a channel, typically to a rendering loop
/// on another thread. The receiving side going away is not an error for the
/// monitored program; events are then dropped.
#[derive(Debug, Clone)]
pub struct Forwarder {
    sender: Sender<Event>,
}

impl Forwarder {
    pub fn new(sender: Sender<Event>) -> Self {
        Self { sender }
    }

    pub fn channel() -> (Self, Receiver<Event>) {
        let (sender, receiver) = channel::unbounded();
        (Self::new(sender), receiver)
    }

    /// Like [`Forwarder::channel`], but the monitored program blocks once
    /// `capacity` events are waiting to be rendered.
    pub fn bounded(capacity: usize) -> (Self, Receiver<Event>) {
        let (sender, receiver) = channel::bounded(capacity);
        (Self::new(sender), receiver)
    }

    fn forward(&self, event: Event) {
        if self.sender.send(event).is_err() {
            log::debug!("forwarder: receiver disconnected, dropping event");
        }
    }
}

impl Handler for Forwarder {
    fn before_deallocate(&self, _: &AllocationEvent) -> bool {
        true
    }

    fn process_allocation_event(&self, event: &AllocationEvent) {
        self.forward(Event::Allocation(*event));
    }

    fn process_object_event(&self, event: &ObjectEvent) {
        self.forward(Event::Object(event.clone()));
    }
}
