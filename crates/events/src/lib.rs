//! Work events and the handlers that act on them.
//!
//! The queue runtime (`brignext-infra`) only moves opaque messages around.
//! This crate gives those messages meaning: what a handler looks like, how an
//! upstream caller encodes "run this worker / job" into a message body, and
//! the downstream collaborator that actually launches workloads.

pub mod dispatch;
pub mod handler;
pub mod launcher;
pub mod work_item;

pub use dispatch::DispatchHandler;
pub use handler::{HandlerFn, MessageHandler, handler_fn};
pub use launcher::{InMemoryLauncher, LaunchOutcome, WorkloadLauncher};
pub use work_item::{WorkItem, WorkItemError};
