//! `brignext-core`: building blocks shared by queue producers and consumers.
//!
//! This crate contains **pure** primitives (no IO, no async): messages and
//! their codec, identifiers, key naming and time.

pub mod clock;
pub mod error;
pub mod id;
pub mod keyspace;
pub mod message;

pub use clock::{Clock, SystemClock, epoch_score};
pub use error::CodecError;
pub use id::{ConsumerId, MessageId};
pub use keyspace::Keyspace;
pub use message::Message;
