//! Reliable queue runtime.
//!
//! - [`Producer`]: publishes immediate or scheduled messages.
//! - [`Consumer`]: claims and handles messages; owns the heartbeat, cleaner,
//!   scheduler, receiver and handler tasks.

pub mod config;
pub mod consumer;
pub mod producer;

mod liveness;
mod pipeline;
mod scheduler;

pub use config::{CLOCK_DRIFT_TOLERANCE, ConsumerConfig, ConsumerOptions, ProducerConfig};
pub use consumer::Consumer;
pub use producer::Producer;
