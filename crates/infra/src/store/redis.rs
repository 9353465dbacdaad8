//! Redis-backed queue store.
//!
//! Structures map one-to-one onto Redis types:
//!
//! - **messages**: hash `id -> encoded message`
//! - **pending**: list; `LPUSH` to enqueue, `RPOPLPUSH` onto an active list to claim
//! - **scheduled**: sorted set scored by handle time
//! - **consumers**: sorted set scored by last heartbeat
//! - **active**: one list per consumer
//!
//! Promotion and reclamation touch several keys and run as Lua scripts;
//! publish and completion run as `MULTI`/`EXEC` transactions. All keys of a
//! queue share a hash tag, so the store also works against Redis Cluster.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ErrorKind, RedisError, Script};
use tracing::instrument;

use brignext_core::{ConsumerId, Keyspace, MessageId, epoch_score};

use super::{QueueStats, QueueStore, StoreError};

static PROMOTE_SCRIPT: LazyLock<Script> =
    LazyLock::new(|| Script::new(include_str!("scripts/promote.lua")));

static RECLAIM_SCRIPT: LazyLock<Script> =
    LazyLock::new(|| Script::new(include_str!("scripts/reclaim.lua")));

/// `SCAN` page size used when looking for orphaned active lists.
const SCAN_COUNT: usize = 100;

#[derive(Clone)]
pub struct RedisQueueStore {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisQueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueueStore").finish_non_exhaustive()
    }
}

impl RedisQueueStore {
    /// Connect to `redis_url` (e.g. `redis://localhost:6379`).
    ///
    /// The returned store reconnects on its own after connection loss; calls
    /// made while disconnected fail with a transient error.
    pub async fn connect(redis_url: impl AsRef<str>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Share an existing connection manager.
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn is_connection_error(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

fn command_error(e: RedisError) -> StoreError {
    if is_connection_error(&e) {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

fn script_error(e: RedisError) -> StoreError {
    if is_connection_error(&e) || matches!(e.kind(), ErrorKind::BusyLoadingError | ErrorKind::TryAgain) {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Script(e.to_string())
    }
}



#[async_trait]
impl QueueStore for RedisQueueStore {
    #[instrument(skip(self, keys, encoded), fields(queue = %keys.queue(), message_id = %id), err)]
    async fn publish(
        &self,
        keys: &Keyspace,
        id: &MessageId,
        encoded: &[u8],
        handle_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut pipe = redis::pipe();
        pipe.atomic().hset(keys.messages(), id.as_str(), encoded).ignore();
        match handle_time {
            None => pipe.lpush(keys.pending(), id.as_str()).ignore(),
            Some(at) => pipe
                .zadd(keys.scheduled(), id.as_str(), epoch_score(&at))
                .ignore(),
        };
        pipe.query_async::<_, ()>(&mut self.conn())
            .await
            .map_err(command_error)
    }

    #[instrument(skip(self, keys), fields(queue = %keys.queue(), consumer = %consumer), err)]
    async fn heartbeat(
        &self,
        keys: &Keyspace,
        consumer: &ConsumerId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn()
            .zadd::<_, _, _, ()>(keys.consumers(), consumer.as_str(), epoch_score(&at))
            .await
            .map_err(command_error)
    }

    #[instrument(skip(self, keys), fields(queue = %keys.queue()), err)]
    async fn dead_consumers(
        &self,
        keys: &Keyspace,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConsumerId>, StoreError> {
        let raw: Vec<String> = self
            .conn()
            .zrangebyscore(keys.consumers(), "-inf", epoch_score(&cutoff))
            .await
            .map_err(command_error)?;
        Ok(raw.into_iter().map(ConsumerId::from_stored).collect())
    }

    #[instrument(skip(self, keys), fields(queue = %keys.queue()), err)]
    async fn orphaned_consumers(&self, keys: &Keyspace) -> Result<Vec<ConsumerId>, StoreError> {
        let mut conn = self.conn();
        let pattern = keys.active_pattern();
        let mut owners = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, page): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(command_error)?;
            owners.extend(page.iter().filter_map(|key| keys.consumer_from_active(key)));
            if next == 0 {
                break;
            }
            cursor = next;
        }
        owners.sort();
        owners.dedup();

        let mut orphans = Vec::new();
        for owner in owners {
            let score: Option<f64> = conn
                .zscore(keys.consumers(), owner.as_str())
                .await
                .map_err(command_error)?;
            if score.is_none() {
                orphans.push(owner);
            }
        }
        Ok(orphans)
    }

    #[instrument(skip(self, keys), fields(queue = %keys.queue(), consumer = %consumer), err)]
    async fn reclaim(
        &self,
        keys: &Keyspace,
        consumer: &ConsumerId,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<usize>, StoreError> {
        let moved: i64 = RECLAIM_SCRIPT
            .key(keys.consumers())
            .key(keys.active(consumer))
            .key(keys.pending())
            .arg(consumer.as_str())
            .arg(epoch_score(&cutoff))
            .invoke_async(&mut self.conn())
            .await
            .map_err(script_error)?;
        Ok(usize::try_from(moved).ok())
    }

    #[instrument(skip(self, keys), fields(queue = %keys.queue()), err)]
    async fn promote_due(
        &self,
        keys: &Keyspace,
        now: DateTime<Utc>,
        batch: usize,
    ) -> Result<usize, StoreError> {
        let moved: usize = PROMOTE_SCRIPT
            .key(keys.scheduled())
            .key(keys.pending())
            .arg(epoch_score(&now))
            .arg(batch)
            .invoke_async(&mut self.conn())
            .await
            .map_err(script_error)?;
        Ok(moved)
    }

    #[instrument(skip(self, keys), fields(queue = %keys.queue(), consumer = %consumer), err)]
    async fn claim(
        &self,
        keys: &Keyspace,
        consumer: &ConsumerId,
    ) -> Result<Option<MessageId>, StoreError> {
        let id: Option<String> = self
            .conn()
            .rpoplpush(keys.pending(), keys.active(consumer))
            .await
            .map_err(command_error)?;
        Ok(id.map(MessageId::from_stored))
    }

    #[instrument(skip(self, keys), fields(queue = %keys.queue(), message_id = %id), err)]
    async fn fetch(&self, keys: &Keyspace, id: &MessageId) -> Result<Option<Vec<u8>>, StoreError> {
        self.conn()
            .hget(keys.messages(), id.as_str())
            .await
            .map_err(command_error)
    }

    #[instrument(
        skip(self, keys),
        fields(queue = %keys.queue(), consumer = %consumer, message_id = %id),
        err
    )]
    async fn complete(
        &self,
        keys: &Keyspace,
        consumer: &ConsumerId,
        id: &MessageId,
    ) -> Result<(), StoreError> {
        redis::pipe()
            .atomic()
            .lrem(keys.active(consumer), -1, id.as_str())
            .ignore()
            .hdel(keys.messages(), id.as_str())
            .ignore()
            .query_async::<_, ()>(&mut self.conn())
            .await
            .map_err(command_error)
    }

    #[instrument(skip(self, keys), fields(queue = %keys.queue()), err)]
    async fn stats(&self, keys: &Keyspace) -> Result<QueueStats, StoreError> {
        let (messages, pending, scheduled, consumers): (usize, usize, usize, usize) = redis::pipe()
            .hlen(keys.messages())
            .llen(keys.pending())
            .zcard(keys.scheduled())
            .zcard(keys.consumers())
            .query_async(&mut self.conn())
            .await
            .map_err(command_error)?;
        Ok(QueueStats {
            messages,
            pending,
            scheduled,
            consumers,
        })
    }
}
