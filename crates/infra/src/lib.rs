//! Infrastructure layer: queue storage and the reliable queue runtime.
//!
//! - `store`: the [`QueueStore`] trait, an in-memory store and a Redis store
//!   (feature `redis`).
//! - `queue`: [`Producer`] and [`Consumer`].
//! - `retries`: the retry/backoff policy every store call goes through.

pub mod error;
pub mod queue;
pub mod retries;
pub mod store;

pub use error::{Component, QueueError};
pub use queue::{Consumer, ConsumerConfig, ConsumerOptions, Producer, ProducerConfig};
pub use store::{InMemoryQueueStore, QueueStats, QueueStore, StoreError};

#[cfg(feature = "redis")]
pub use store::RedisQueueStore;


#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, TimeZone, Utc};
    use tokio::time::Instant;

    use brignext_core::Clock;

    /// Wall clock that advances with tokio's (possibly paused) time.
    #[derive(Debug)]
    pub struct TestClock {
        start: DateTime<Utc>,
        origin: Instant,
    }

    impl TestClock {
        pub fn new() -> Self {
            Self {
                start: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                origin: Instant::now(),
            }
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            self.start + chrono::Duration::from_std(self.origin.elapsed()).unwrap()
        }
    }
}
