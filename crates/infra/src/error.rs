use core::any::Any;
use core::fmt;

use brignext_core::{CodecError, ConsumerId};

use crate::store::StoreError;

/// Subsystem of a running consumer, as named in a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// Lone-consumer cleanup and the first heartbeat, before any work is claimed.
    Startup,
    Heartbeat,
    Cleaner,
    Scheduler,
    Receiver,
    Handler,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Component::Startup => "startup",
            Component::Heartbeat => "heartbeat",
            Component::Cleaner => "cleaner",
            Component::Scheduler => "scheduler",
            Component::Receiver => "receiver",
            Component::Handler => "handler",
        })
    }
}

/// Queue error.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("{operation} interrupted by shutdown")]
    Interrupted { operation: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("consumer {consumer} of queue {queue:?} was cancelled")]
    Cancelled { queue: String, consumer: ConsumerId },

    /// A consumer task stopped while the consumer was still meant to run.
    #[error("task ended unexpectedly: {reason}")]
    TaskEnded { reason: String },

    #[error("{component} failed: {source}")]
    Component {
        component: Component,
        #[source]
        source: Box<QueueError>,
    },
}

impl QueueError {
    pub(crate) fn in_component(self, component: Component) -> Self {
        QueueError::Component {
            component,
            source: Box::new(self),
        }
    }

    /// The subsystem that failed, for errors returned by `Consumer::run`.
    pub fn component(&self) -> Option<Component> {
        match self {
            QueueError::Component { component, .. } => Some(*component),
            _ => None,
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
