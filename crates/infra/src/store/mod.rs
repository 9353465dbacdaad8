//! Queue storage.
//!
//! A [`QueueStore`] exposes exactly the state transitions the queue runtime
//! needs. Every method is one atomic step against the shared store: callers
//! never compose a read with a later write to move an ID between structures.
//!
//! - `InMemoryQueueStore`: single process, tests/dev.
//! - `RedisQueueStore` (feature `redis`): shared across processes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use brignext_core::{ConsumerId, Keyspace, MessageId};

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::{InMemoryQueueStore, StoreOp};
#[cfg(feature = "redis")]
pub use self::redis::RedisQueueStore;

/// Storage backend of a reliable queue.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Store `encoded` under `id` and make the ID reachable, in one step.
    ///
    /// `handle_time = None` pushes the ID onto pending; otherwise it is added
    /// to the scheduled set scored by that instant.
    async fn publish(
        &self,
        keys: &Keyspace,
        id: &MessageId,
        encoded: &[u8],
        handle_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Record `at` as `consumer`'s last proof of life.
    async fn heartbeat(
        &self,
        keys: &Keyspace,
        consumer: &ConsumerId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Registered consumers whose last heartbeat is at or before `cutoff`.
    async fn dead_consumers(
        &self,
        keys: &Keyspace,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConsumerId>, StoreError>;

    /// Consumers that own an active list but have no registry entry.
    async fn orphaned_consumers(&self, keys: &Keyspace) -> Result<Vec<ConsumerId>, StoreError>;

    /// Return `consumer`'s active IDs to pending, delete its active list and
    /// unregister it.
    ///
    /// The registry score is re-checked inside the same atomic step: if the
    /// consumer heartbeated after `cutoff`, nothing happens and `None` is
    /// returned. A consumer with no registry entry counts as dead. Returns the
    /// number of IDs moved.
    async fn reclaim(
        &self,
        keys: &Keyspace,
        consumer: &ConsumerId,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<usize>, StoreError>;

    /// Move up to `batch` scheduled IDs due at `now` onto pending, earliest
    /// first. Returns how many moved.
    async fn promote_due(
        &self,
        keys: &Keyspace,
        now: DateTime<Utc>,
        batch: usize,
    ) -> Result<usize, StoreError>;

    /// Pop the oldest pending ID onto `consumer`'s active list.
    async fn claim(
        &self,
        keys: &Keyspace,
        consumer: &ConsumerId,
    ) -> Result<Option<MessageId>, StoreError>;

    /// Encoded message stored under `id`, if any.
    async fn fetch(&self, keys: &Keyspace, id: &MessageId) -> Result<Option<Vec<u8>>, StoreError>;

    /// Remove `id` from `consumer`'s active list (by value) and drop its
    /// stored message.
    async fn complete(
        &self,
        keys: &Keyspace,
        consumer: &ConsumerId,
        id: &MessageId,
    ) -> Result<(), StoreError>;

    /// Structure sizes, for operators and tests.
    async fn stats(&self, keys: &Keyspace) -> Result<QueueStats, StoreError>;
}

/// Store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store command error: {0}")]
    Command(String),

    #[error("store script error: {0}")]
    Script(String),

    #[error("store state poisoned")]
    Poisoned,
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Command(_))
    }
}

/// Sizes of a queue's structures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub messages: usize,
    pub pending: usize,
    pub scheduled: usize,
    pub consumers: usize,
}

#[async_trait]
impl<S> QueueStore for Arc<S>
where
    S: QueueStore + ?Sized,
{
    async fn publish(
        &self,
        keys: &Keyspace,
        id: &MessageId,
        encoded: &[u8],
        handle_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        (**self).publish(keys, id, encoded, handle_time).await
    }

    async fn heartbeat(
        &self,
        keys: &Keyspace,
        consumer: &ConsumerId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        (**self).heartbeat(keys, consumer, at).await
    }

    async fn dead_consumers(
        &self,
        keys: &Keyspace,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConsumerId>, StoreError> {
        (**self).dead_consumers(keys, cutoff).await
    }

    async fn orphaned_consumers(&self, keys: &Keyspace) -> Result<Vec<ConsumerId>, StoreError> {
        (**self).orphaned_consumers(keys).await
    }

    async fn reclaim(
        &self,
        keys: &Keyspace,
        consumer: &ConsumerId,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<usize>, StoreError> {
        (**self).reclaim(keys, consumer, cutoff).await
    }

    async fn promote_due(
        &self,
        keys: &Keyspace,
        now: DateTime<Utc>,
        batch: usize,
    ) -> Result<usize, StoreError> {
        (**self).promote_due(keys, now, batch).await
    }

    async fn claim(
        &self,
        keys: &Keyspace,
        consumer: &ConsumerId,
    ) -> Result<Option<MessageId>, StoreError> {
        (**self).claim(keys, consumer).await
    }

    async fn fetch(&self, keys: &Keyspace, id: &MessageId) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).fetch(keys, id).await
    }

    async fn complete(
        &self,
        keys: &Keyspace,
        consumer: &ConsumerId,
        id: &MessageId,
    ) -> Result<(), StoreError> {
        (**self).complete(keys, consumer, id).await
    }

    async fn stats(&self, keys: &Keyspace) -> Result<QueueStats, StoreError> {
        (**self).stats(keys).await
    }
}
