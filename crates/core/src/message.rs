//! Queue messages and their transport encoding.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::id::MessageId;

/// Immutable unit of work.
///
/// - `body` is opaque to the queue; only the handler interprets it.
/// - `handle_time` defers delivery until that instant; `None` means "as soon
///   as possible".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    body: Vec<u8>,
    handle_time: Option<DateTime<Utc>>,
}

impl Message {
    /// An immediate message with a fresh ID.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: MessageId::new(),
            body: body.into(),
            handle_time: None,
        }
    }

    /// A message that must not be handled before `at`.
    pub fn scheduled(body: impl Into<Vec<u8>>, at: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::new(),
            body: body.into(),
            handle_time: Some(at),
        }
    }

    /// A message that must not be handled before `delay` has elapsed.
    pub fn delayed(body: impl Into<Vec<u8>>, delay: Duration) -> Self {
        Self::delayed_from(body, delay, Utc::now())
    }

    /// Like [`Message::delayed`], relative to an explicit `now`.
    ///
    /// Delays too large to represent saturate to the latest representable instant.
    pub fn delayed_from(body: impl Into<Vec<u8>>, delay: Duration, now: DateTime<Utc>) -> Self {
        let at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::scheduled(body, at)
    }

    /// Replace the generated ID (replays, deterministic tests).
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub fn handle_time(&self) -> Option<DateTime<Utc>> {
        self.handle_time
    }

    /// Whether the message may be handled at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.handle_time.is_none_or(|at| at <= now)
    }

    /// Serialize for storage in the messages map.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|e| CodecError::encode(e.to_string()))
    }

    /// Inverse of [`Message::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::decode(e.to_string()))
    }
}
