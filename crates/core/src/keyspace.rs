//! Store key naming for a single queue.
//!
//! Every key of a queue embeds the queue name as a `{hash tag}` so that all of
//! them map to the same Redis Cluster slot; multi-key scripts require that.

use crate::id::ConsumerId;

/// Deterministic names of the store-side structures backing one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    queue: String,
    base: String,
    messages: String,
    pending: String,
    scheduled: String,
    consumers: String,
}

impl Keyspace {
    /// Build the keyspace for `queue`, optionally namespaced by `prefix`.
    pub fn new(prefix: &str, queue: &str) -> Self {
        let base = format!("{prefix}{{{queue}}}");
        Self {
            queue: queue.to_string(),
            messages: format!("{base}:messages"),
            pending: format!("{base}:pending"),
            scheduled: format!("{base}:scheduled"),
            consumers: format!("{base}:consumers"),
            base,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Hash: message ID → encoded message.
    pub fn messages(&self) -> &str {
        &self.messages
    }

    /// List of IDs ready to be claimed.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Sorted set of IDs scored by handle time.
    pub fn scheduled(&self) -> &str {
        &self.scheduled
    }

    /// Sorted set of consumer IDs scored by last heartbeat.
    pub fn consumers(&self) -> &str {
        &self.consumers
    }

    /// List of IDs claimed by `consumer`.
    pub fn active(&self, consumer: &ConsumerId) -> String {
        format!("{}{}", self.active_prefix(), consumer)
    }

    /// Common prefix of every active list of this queue.
    pub fn active_prefix(&self) -> String {
        format!("{}:active:", self.base)
    }

    /// Glob pattern (Redis `SCAN MATCH` syntax) matching every active list.
    pub fn active_pattern(&self) -> String {
        let mut pattern = String::with_capacity(self.base.len() + 9);
        for c in self.active_prefix().chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('*');
        pattern
    }

    /// Recover the consumer ID from an active-list key, if it is one of ours.
    pub fn consumer_from_active(&self, key: &str) -> Option<ConsumerId> {
        key.strip_prefix(&self.active_prefix())
            .and_then(|id| id.parse().ok())
    }
}
