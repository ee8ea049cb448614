//! Object-lifecycle verification for hand-written allocators and containers.
//!
//! Values and pointers that a container manages are wrapped in
//! [`Monitored`](monitor::Monitored) and [`MonitoredPtr`](monitor::MonitoredPtr),
//! and its storage comes from a [`MonitoredAllocator`](alloc::MonitoredAllocator).
//! Every allocation, construction, copy, move, assignment, destruction and
//! deallocation they perform becomes an event for a [`Handler`](handler::Handler).
//! The [`Verifier`](verify::Verifier) is the handler that keeps a model of
//! memory and reports what the container got wrong:
//!
//! ```
//! use lifecheck::{alloc::MonitoredAllocator, verify::{Verifier, Violation}};
//!
//! let verifier = Verifier::new();
//! let allocator = MonitoredAllocator::<String>::new(&verifier);
//! let slots = allocator.allocate(2).unwrap();
//! unsafe {
//!     allocator.construct(slots.slot(0), "kept".to_owned());
//!     allocator.deallocate(&slots, 2);
//! }
//! let error = verifier.cleanup().unwrap_err();
//! assert_eq!(error.violations(), [Violation::ObjectLeaked]);
//! ```
//!
//! Everything is single-threaded and synchronous; a handler has seen an event
//! by the time the operation that caused it returns.

#![feature(allocator_api)]

pub mod alloc;
pub mod event;
pub mod handler;
pub mod memory;
pub mod monitor;
pub mod util;
pub mod verify;

pub use alloc::MonitoredAllocator;
pub use handler::Handler;
pub use monitor::{Local, Monitored, MonitoredConstPtr, MonitoredPtr};
pub use verify::{Session, Verifier};
