//! Wrappers that report what happens to the values and pointers they hold.
//!
//! Nothing here validates anything: every operation is turned into an
//! [`ObjectEvent`](crate::event::ObjectEvent) and handed to the
//! [`Handler`](crate::handler::Handler) the wrapper was built with.

mod local;
mod ptr;
mod value;

pub use local::Local;
pub use ptr::{CoercesTo, Const, MonitoredConstPtr, MonitoredPtr, Mut, Mutability};
pub use value::Monitored;
