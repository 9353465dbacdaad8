//! Correlation identifiers carried in message bodies.
//!
//! The event-creation workflow never names storage details. It publishes the
//! bare event ID when the event's worker should run, or `eventID:jobName` when
//! one of the worker's jobs should run.

use core::fmt;

use brignext_core::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItem {
    /// Run the worker for an event.
    Worker { event_id: String },
    /// Run a named job spawned by an event's worker.
    Job { event_id: String, job_name: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkItemError {
    #[error("message body is not valid UTF-8")]
    NotUtf8,
    #[error("message body has an empty event ID")]
    MissingEventId,
    #[error("message body for event {0:?} has an empty job name")]
    MissingJobName(String),
}

impl WorkItem {
    pub fn worker(event_id: impl Into<String>) -> Self {
        Self::Worker {
            event_id: event_id.into(),
        }
    }

    pub fn job(event_id: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self::Job {
            event_id: event_id.into(),
            job_name: job_name.into(),
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            WorkItem::Worker { event_id } | WorkItem::Job { event_id, .. } => event_id,
        }
    }

    /// Body bytes for a queue message.
    pub fn to_body(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// An immediate queue message carrying this work item.
    pub fn to_message(&self) -> Message {
        Message::new(self.to_body())
    }

    /// Parse a message body produced by [`WorkItem::to_body`].
    pub fn parse(body: &[u8]) -> Result<Self, WorkItemError> {
        let text = std::str::from_utf8(body).map_err(|_| WorkItemError::NotUtf8)?;
        let text = text.trim();
        match text.split_once(':') {
            None if text.is_empty() => Err(WorkItemError::MissingEventId),
            None => Ok(Self::worker(text)),
            Some(("", _)) => Err(WorkItemError::MissingEventId),
            Some((event_id, "")) => Err(WorkItemError::MissingJobName(event_id.to_string())),
            Some((event_id, job_name)) => Ok(Self::job(event_id, job_name)),
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkItem::Worker { event_id } => f.write_str(event_id),
            WorkItem::Job { event_id, job_name } => write!(f, "{event_id}:{job_name}"),
        }
    }
}
