//! In-memory queue store for tests/dev.
//!
//! Models the same structures the Redis store uses (lists, hashes, sorted
//! sets keyed by name) behind one mutex, so every operation is atomic the way
//! a Redis transaction or script is. Empty structures are removed, as Redis
//! removes empty keys.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use brignext_core::{ConsumerId, Keyspace, MessageId, epoch_score};

use super::{QueueStats, QueueStore, StoreError};

/// Store operation, for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Publish,
    Heartbeat,
    DeadConsumers,
    OrphanedConsumers,
    Reclaim,
    PromoteDue,
    Claim,
    Fetch,
    Complete,
    Stats,
}

#[derive(Debug, Clone)]
enum Entry {
    List(VecDeque<String>),
    Hash(HashMap<String, Vec<u8>>),
    SortedSet(HashMap<String, f64>),
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    faults: HashMap<StoreOp, usize>,
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Command(format!(
        "WRONGTYPE operation against key {key:?} holding the wrong kind of value"
    ))
}

impl State {
    fn inject(&mut self, op: StoreOp) -> Result<(), StoreError> {
        match self.faults.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Connection(format!("injected {op:?} failure")))
            }
            _ => Ok(()),
        }
    }

    fn list(&self, key: &str) -> Result<Option<&VecDeque<String>>, StoreError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::List(list)) => Ok(Some(list)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn list_mut(&mut self, key: &str) -> Result<&mut VecDeque<String>, StoreError> {
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(VecDeque::new()))
        {
            Entry::List(list) => Ok(list),
            _ => Err(wrong_type(key)),
        }
    }

    fn hash(&self, key: &str) -> Result<Option<&HashMap<String, Vec<u8>>>, StoreError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::Hash(hash)) => Ok(Some(hash)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut HashMap<String, Vec<u8>>, StoreError> {
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(HashMap::new()))
        {
            Entry::Hash(hash) => Ok(hash),
            _ => Err(wrong_type(key)),
        }
    }

    fn zset(&self, key: &str) -> Result<Option<&HashMap<String, f64>>, StoreError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::SortedSet(set)) => Ok(Some(set)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn zset_mut(&mut self, key: &str) -> Result<&mut HashMap<String, f64>, StoreError> {
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::SortedSet(HashMap::new()))
        {
            Entry::SortedSet(set) => Ok(set),
            _ => Err(wrong_type(key)),
        }
    }

    /// Members with score `<= max`, ordered by (score, member).
    fn zrange_upto(&self, key: &str, max: f64) -> Result<Vec<String>, StoreError> {
        let Some(set) = self.zset(key)? else {
            return Ok(Vec::new());
        };
        let mut members: Vec<(&String, f64)> = set
            .iter()
            .filter(|(_, score)| **score <= max)
            .map(|(m, s)| (m, *s))
            .collect();
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        Ok(members.into_iter().map(|(m, _)| m.clone()).collect())
    }

    fn prune(&mut self, key: &str) {
        let empty = match self.entries.get(key) {
            Some(Entry::List(list)) => list.is_empty(),
            Some(Entry::Hash(hash)) => hash.is_empty(),
            Some(Entry::SortedSet(set)) => set.is_empty(),
            None => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }
}

/// Single-process [`QueueStore`].
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    state: Mutex<State>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Make the next `count` calls of `op` fail with a transient error.
    pub fn fail_next(&self, op: StoreOp, count: usize) -> Result<(), StoreError> {
        self.lock()?.faults.insert(op, count);
        Ok(())
    }

    /// Pending IDs, next-to-be-claimed first.
    pub fn pending_ids(&self, keys: &Keyspace) -> Result<Vec<MessageId>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .list(keys.pending())?
            .map(|list| list.iter().rev().map(|id| to_message_id(id)).collect())
            .unwrap_or_default())
    }

    /// IDs on `consumer`'s active list, most recent claim first.
    pub fn active_ids(
        &self,
        keys: &Keyspace,
        consumer: &ConsumerId,
    ) -> Result<Vec<MessageId>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .list(&keys.active(consumer))?
            .map(|list| list.iter().map(|id| to_message_id(id)).collect())
            .unwrap_or_default())
    }

    /// Scheduled IDs, earliest first.
    pub fn scheduled_ids(&self, keys: &Keyspace) -> Result<Vec<MessageId>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .zrange_upto(keys.scheduled(), f64::INFINITY)?
            .iter()
            .map(|id| to_message_id(id))
            .collect())
    }

    /// Last heartbeat score of `consumer`, if registered.
    pub fn heartbeat_score(
        &self,
        keys: &Keyspace,
        consumer: &ConsumerId,
    ) -> Result<Option<f64>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .zset(keys.consumers())?
            .and_then(|set| set.get(consumer.as_str()).copied()))
    }

    /// Push a bare ID onto pending without storing a message for it.
    pub fn push_pending(&self, keys: &Keyspace, id: &MessageId) -> Result<(), StoreError> {
        self.lock()?
            .list_mut(keys.pending())?
            .push_front(id.to_string());
        Ok(())
    }
}

fn to_message_id(raw: &str) -> MessageId {
    MessageId::from_stored(raw)
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn publish(
        &self,
        keys: &Keyspace,
        id: &MessageId,
        encoded: &[u8],
        handle_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.inject(StoreOp::Publish)?;

        // Type-check every target before the first write.
        state.hash(keys.messages())?;
        match handle_time {
            None => state.list(keys.pending()).map(|_| ())?,
            Some(_) => state.zset(keys.scheduled()).map(|_| ())?,
        }

        state
            .hash_mut(keys.messages())?
            .insert(id.to_string(), encoded.to_vec());
        match handle_time {
            None => state.list_mut(keys.pending())?.push_front(id.to_string()),
            Some(at) => {
                state
                    .zset_mut(keys.scheduled())?
                    .insert(id.to_string(), epoch_score(&at));
            }
        }
        Ok(())
    }

    async fn heartbeat(
        &self,
        keys: &Keyspace,
        consumer: &ConsumerId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.inject(StoreOp::Heartbeat)?;
        state
            .zset_mut(keys.consumers())?
            .insert(consumer.to_string(), epoch_score(&at));
        Ok(())
    }

    async fn dead_consumers(
        &self,
        keys: &Keyspace,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConsumerId>, StoreError> {
        let mut state = self.lock()?;
        state.inject(StoreOp::DeadConsumers)?;
        Ok(state
            .zrange_upto(keys.consumers(), epoch_score(&cutoff))?
            .into_iter()
            .map(ConsumerId::from_stored)
            .collect())
    }

    async fn orphaned_consumers(&self, keys: &Keyspace) -> Result<Vec<ConsumerId>, StoreError> {
        let mut state = self.lock()?;
        state.inject(StoreOp::OrphanedConsumers)?;
        let registry = state.zset(keys.consumers())?;
        let mut orphans: Vec<ConsumerId> = state
            .entries
            .keys()
            .filter_map(|key| keys.consumer_from_active(key))
            .filter(|consumer| registry.is_none_or(|set| !set.contains_key(consumer.as_str())))
            .collect();
        orphans.sort();
        Ok(orphans)
    }

    async fn reclaim(
        &self,
        keys: &Keyspace,
        consumer: &ConsumerId,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<usize>, StoreError> {
        let mut state = self.lock()?;
        state.inject(StoreOp::Reclaim)?;

        let score = state
            .zset(keys.consumers())?
            .and_then(|set| set.get(consumer.as_str()).copied());
        if score.is_some_and(|score| score > epoch_score(&cutoff)) {
            return Ok(None);
        }

        let active_key = keys.active(consumer);
        state.list(&active_key)?;
        state.list(keys.pending())?;

        let ids: Vec<String> = match state.entries.remove(&active_key) {
            Some(Entry::List(list)) => list.into_iter().collect(),
            _ => Vec::new(),
        };
        let moved = ids.len();
        if moved > 0 {
            state.list_mut(keys.pending())?.extend(ids);
        }
        if score.is_some() {
            state.zset_mut(keys.consumers())?.remove(consumer.as_str());
            state.prune(keys.consumers());
        }
        Ok(Some(moved))
    }

    async fn promote_due(
        &self,
        keys: &Keyspace,
        now: DateTime<Utc>,
        batch: usize,
    ) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        state.inject(StoreOp::PromoteDue)?;
        state.list(keys.pending())?;

        let due: Vec<String> = state
            .zrange_upto(keys.scheduled(), epoch_score(&now))?
            .into_iter()
            .take(batch)
            .collect();
        if due.is_empty() {
            return Ok(0);
        }

        let scheduled = state.zset_mut(keys.scheduled())?;
        for id in &due {
            scheduled.remove(id);
        }
        state.prune(keys.scheduled());

        let pending = state.list_mut(keys.pending())?;
        for id in &due {
            pending.push_front(id.clone());
        }
        Ok(due.len())
    }

    async fn claim(
        &self,
        keys: &Keyspace,
        consumer: &ConsumerId,
    ) -> Result<Option<MessageId>, StoreError> {
        let mut state = self.lock()?;
        state.inject(StoreOp::Claim)?;

        let active_key = keys.active(consumer);
        state.list(&active_key)?;

        if state.list(keys.pending())?.is_none() {
            return Ok(None);
        }
        let Some(id) = state.list_mut(keys.pending())?.pop_back() else {
            return Ok(None);
        };
        state.prune(keys.pending());
        state.list_mut(&active_key)?.push_front(id.clone());
        Ok(Some(to_message_id(&id)))
    }

    async fn fetch(&self, keys: &Keyspace, id: &MessageId) -> Result<Option<Vec<u8>>, StoreError> {
        let mut state = self.lock()?;
        state.inject(StoreOp::Fetch)?;
        Ok(state
            .hash(keys.messages())?
            .and_then(|hash| hash.get(id.as_str()).cloned()))
    }

    async fn complete(
        &self,
        keys: &Keyspace,
        consumer: &ConsumerId,
        id: &MessageId,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.inject(StoreOp::Complete)?;

        let active_key = keys.active(consumer);
        state.list(&active_key)?;
        state.hash(keys.messages())?;

        if let Some(Entry::List(list)) = state.entries.get_mut(&active_key) {
            if let Some(pos) = list.iter().rposition(|entry| entry == id.as_str()) {
                list.remove(pos);
            }
        }
        state.prune(&active_key);

        if let Some(Entry::Hash(hash)) = state.entries.get_mut(keys.messages()) {
            hash.remove(id.as_str());
        }
        state.prune(keys.messages());
        Ok(())
    }

    async fn stats(&self, keys: &Keyspace) -> Result<QueueStats, StoreError> {
        let mut state = self.lock()?;
        state.inject(StoreOp::Stats)?;
        Ok(QueueStats {
            messages: state.hash(keys.messages())?.map_or(0, HashMap::len),
            pending: state.list(keys.pending())?.map_or(0, VecDeque::len),
            scheduled: state.zset(keys.scheduled())?.map_or(0, HashMap::len),
            consumers: state.zset(keys.consumers())?.map_or(0, HashMap::len),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn keys() -> Keyspace {
        Keyspace::new("test:", "q")
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn id(s: &str) -> MessageId {
        s.parse().unwrap()
    }

    fn consumer(s: &str) -> ConsumerId {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn unparseable_stored_id_is_claimed_and_completed_verbatim() {
        let store = InMemoryQueueStore::new();
        let keys = keys();
        let me = consumer("c1");
        let blank = MessageId::from_stored("");

        store.push_pending(&keys, &blank).unwrap();
        let claimed = store.claim(&keys, &me).await.unwrap().unwrap();
        assert_eq!(claimed.as_str(), "");
        assert_eq!(store.active_ids(&keys, &me).unwrap(), vec![blank.clone()]);

        store.complete(&keys, &me, &claimed).await.unwrap();
        assert!(store.active_ids(&keys, &me).unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_immediate_goes_to_pending() {
        let store = InMemoryQueueStore::new();
        let keys = keys();

        store.publish(&keys, &id("m1"), b"one", None).await.unwrap();
        store.publish(&keys, &id("m2"), b"two", None).await.unwrap();

        assert_eq!(store.pending_ids(&keys).unwrap(), vec![id("m1"), id("m2")]);
        assert_eq!(
            store.fetch(&keys, &id("m1")).await.unwrap(),
            Some(b"one".to_vec())
        );
        let stats = store.stats(&keys).await.unwrap();
        assert_eq!(stats.messages, 2);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.scheduled, 0);
    }

    #[tokio::test]
    async fn publish_scheduled_goes_to_scheduled_set() {
        let store = InMemoryQueueStore::new();
        let keys = keys();

        store
            .publish(&keys, &id("m1"), b"x", Some(at(100)))
            .await
            .unwrap();

        assert!(store.pending_ids(&keys).unwrap().is_empty());
        assert_eq!(store.scheduled_ids(&keys).unwrap(), vec![id("m1")]);
    }

    #[tokio::test]
    async fn claim_is_fifo_and_moves_to_active() {
        let store = InMemoryQueueStore::new();
        let keys = keys();
        let c = consumer("c1");

        store.publish(&keys, &id("m1"), b"1", None).await.unwrap();
        store.publish(&keys, &id("m2"), b"2", None).await.unwrap();

        assert_eq!(store.claim(&keys, &c).await.unwrap(), Some(id("m1")));
        assert_eq!(store.claim(&keys, &c).await.unwrap(), Some(id("m2")));
        assert_eq!(store.claim(&keys, &c).await.unwrap(), None);
        assert_eq!(store.active_ids(&keys, &c).unwrap(), vec![id("m2"), id("m1")]);
    }

    #[tokio::test]
    async fn complete_removes_claim_and_message() {
        let store = InMemoryQueueStore::new();
        let keys = keys();
        let c = consumer("c1");

        store.publish(&keys, &id("m1"), b"1", None).await.unwrap();
        store.claim(&keys, &c).await.unwrap();
        store.complete(&keys, &c, &id("m1")).await.unwrap();

        assert!(store.active_ids(&keys, &c).unwrap().is_empty());
        assert_eq!(store.fetch(&keys, &id("m1")).await.unwrap(), None);
        assert_eq!(store.stats(&keys).await.unwrap(), QueueStats::default());
    }

    #[tokio::test]
    async fn promote_moves_only_due_ids_in_batches() {
        let store = InMemoryQueueStore::new();
        let keys = keys();

        for (n, secs) in [("a", 10), ("b", 20), ("c", 30), ("d", 1_000)] {
            store.publish(&keys, &id(n), b"", Some(at(secs))).await.unwrap();
        }

        assert_eq!(store.promote_due(&keys, at(5), 10).await.unwrap(), 0);
        assert_eq!(store.promote_due(&keys, at(30), 2).await.unwrap(), 2);
        assert_eq!(store.pending_ids(&keys).unwrap(), vec![id("a"), id("b")]);
        assert_eq!(store.promote_due(&keys, at(30), 2).await.unwrap(), 1);
        assert_eq!(store.scheduled_ids(&keys).unwrap(), vec![id("d")]);
    }

    #[tokio::test]
    async fn reclaim_returns_active_ids_oldest_claim_first() {
        let store = InMemoryQueueStore::new();
        let keys = keys();
        let dead = consumer("dead");

        for n in ["m1", "m2", "m3"] {
            store.publish(&keys, &id(n), b"", None).await.unwrap();
        }
        store.heartbeat(&keys, &dead, at(0)).await.unwrap();
        store.claim(&keys, &dead).await.unwrap();
        store.claim(&keys, &dead).await.unwrap();

        assert_eq!(store.dead_consumers(&keys, at(10)).await.unwrap(), vec![dead.clone()]);
        assert_eq!(store.reclaim(&keys, &dead, at(10)).await.unwrap(), Some(2));

        assert_eq!(
            store.pending_ids(&keys).unwrap(),
            vec![id("m1"), id("m2"), id("m3")]
        );
        assert!(store.active_ids(&keys, &dead).unwrap().is_empty());
        assert_eq!(store.heartbeat_score(&keys, &dead).unwrap(), None);
    }

    #[tokio::test]
    async fn reclaim_aborts_if_consumer_heartbeated_since() {
        let store = InMemoryQueueStore::new();
        let keys = keys();
        let c = consumer("c1");

        store.publish(&keys, &id("m1"), b"", None).await.unwrap();
        store.heartbeat(&keys, &c, at(0)).await.unwrap();
        store.claim(&keys, &c).await.unwrap();

        // Discovered dead at cutoff 10, then heartbeats before reclamation runs.
        store.heartbeat(&keys, &c, at(15)).await.unwrap();
        assert_eq!(store.reclaim(&keys, &c, at(10)).await.unwrap(), None);
        assert_eq!(store.active_ids(&keys, &c).unwrap(), vec![id("m1")]);
    }

    #[tokio::test]
    async fn orphaned_active_lists_are_found_and_reclaimable() {
        let store = InMemoryQueueStore::new();
        let keys = keys();
        let orphan = consumer("orphan");
        let live = consumer("live");

        store.publish(&keys, &id("m1"), b"", None).await.unwrap();
        store.publish(&keys, &id("m2"), b"", None).await.unwrap();
        store.claim(&keys, &orphan).await.unwrap();
        store.heartbeat(&keys, &live, at(0)).await.unwrap();
        store.claim(&keys, &live).await.unwrap();

        assert_eq!(store.orphaned_consumers(&keys).await.unwrap(), vec![orphan.clone()]);
        assert_eq!(store.reclaim(&keys, &orphan, at(0)).await.unwrap(), Some(1));
        assert!(store.orphaned_consumers(&keys).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_are_transient_and_counted() {
        let store = InMemoryQueueStore::new();
        let keys = keys();
        store.fail_next(StoreOp::Heartbeat, 2).unwrap();

        let c = consumer("c1");
        for _ in 0..2 {
            let err = store.heartbeat(&keys, &c, at(1)).await.unwrap_err();
            assert!(err.is_transient());
        }
        store.heartbeat(&keys, &c, at(1)).await.unwrap();
        assert_eq!(store.heartbeat_score(&keys, &c).unwrap(), Some(1.0));
    }

    #[tokio::test]
    async fn wrong_type_is_a_command_error() {
        let store = InMemoryQueueStore::new();
        let keys = keys();
        store
            .lock()
            .unwrap()
            .entries
            .insert(keys.pending().to_string(), Entry::Hash(HashMap::new()));

        let err = store.claim(&keys, &consumer("c1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Command(_)));
        assert!(err.is_transient());
    }
}
