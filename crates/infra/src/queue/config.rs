//! Producer and consumer configuration.
//!
//! [`ConsumerOptions`] is what callers write: every field optional, builder
//! methods, deserializable from larger configuration documents. It is
//! normalized exactly once into [`ConsumerConfig`], clamping each value into
//! its documented range. Invalid values never fail; they are pulled to the
//! nearest bound.

use std::time::Duration;

use serde::Deserialize;

use crate::retries::max_cumulative_backoff;

/// Extra slack added to the dead-consumer threshold for clock drift between
/// hosts.
pub const CLOCK_DRIFT_TOLERANCE: Duration = Duration::from_secs(5);

/// `[min, default, max]` for one option.
#[derive(Debug, Clone, Copy)]
struct Bounds<T> {
    min: T,
    default: T,
    max: T,
}

impl<T: PartialOrd + Copy> Bounds<T> {
    const fn new(min: T, default: T, max: T) -> Self {
        Self { min, default, max }
    }

    fn apply(&self, value: Option<T>) -> T {
        match value {
            None => self.default,
            Some(v) if v < self.min => self.min,
            Some(v) if v > self.max => self.max,
            Some(v) => v,
        }
    }
}

const fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

const MAX_ATTEMPTS: Bounds<u32> = Bounds::new(1, 5, 10);
const MAX_BACKOFF: Bounds<Duration> = Bounds::new(secs(1), secs(10), secs(60));
const CLEANER_INTERVAL: Bounds<Duration> = Bounds::new(secs(5), secs(60), secs(300));
const HEARTBEAT_INTERVAL: Bounds<Duration> = Bounds::new(secs(5), secs(30), secs(300));
const SCHEDULER_INTERVAL: Bounds<Duration> = Bounds::new(secs(5), secs(5), secs(300));
const SCHEDULER_BATCH_SIZE: Bounds<usize> = Bounds::new(1, 100, 1000);
const RECEIVER_PAUSE_INTERVAL: Bounds<Duration> = Bounds::new(secs(1), secs(5), secs(60));
const CONCURRENT_RECEIVERS: Bounds<u8> = Bounds::new(1, 1, 255);
const CONCURRENT_HANDLERS: Bounds<u8> = Bounds::new(1, 5, 255);
const SHUTDOWN_GRACE_PERIOD: Bounds<Duration> = Bounds::new(secs(0), secs(10), secs(600));

/// Consumer options as supplied by callers. `None` means "use the default".
///
/// Durations deserialize from whole seconds.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerOptions {
    /// Attempts per store operation before the failure is fatal. `[1, 5, 10]`
    pub store_operation_max_attempts: Option<u32>,
    /// Cap on a single backoff sleep. `[1s, 10s, 60s]`
    #[serde(with = "opt_secs")]
    pub store_operation_max_backoff: Option<Duration>,
    /// Operator guarantees no other consumer of this queue runs concurrently.
    pub lone_consumer: Option<bool>,
    /// `[5s, 60s, 5m]`
    #[serde(with = "opt_secs")]
    pub cleaner_interval: Option<Duration>,
    /// `[5s, 30s, 5m]`
    #[serde(with = "opt_secs")]
    pub heartbeat_interval: Option<Duration>,
    /// `[5s, 5s, 5m]`
    #[serde(with = "opt_secs")]
    pub scheduler_interval: Option<Duration>,
    /// Scheduled IDs promoted per atomic step. `[1, 100, 1000]`
    pub scheduler_batch_size: Option<usize>,
    /// Receiver sleep when nothing is pending. `[1s, 5s, 60s]`
    #[serde(with = "opt_secs")]
    pub receiver_pause_interval: Option<Duration>,
    /// `[1, 1, 255]`
    pub concurrent_receivers: Option<u8>,
    /// `[1, 5, 255]`
    pub concurrent_handlers: Option<u8>,
    /// How long `run` waits for tasks to wind down. `[0, 10s, 10m]`
    #[serde(with = "opt_secs")]
    pub shutdown_grace_period: Option<Duration>,
    /// Namespace prepended to every key. Default empty.
    pub prefix: Option<String>,
}

impl ConsumerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store_operation_max_attempts(mut self, attempts: u32) -> Self {
        self.store_operation_max_attempts = Some(attempts);
        self
    }

    pub fn with_store_operation_max_backoff(mut self, backoff: Duration) -> Self {
        self.store_operation_max_backoff = Some(backoff);
        self
    }

    pub fn with_lone_consumer(mut self, lone: bool) -> Self {
        self.lone_consumer = Some(lone);
        self
    }

    pub fn with_cleaner_interval(mut self, interval: Duration) -> Self {
        self.cleaner_interval = Some(interval);
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    pub fn with_scheduler_interval(mut self, interval: Duration) -> Self {
        self.scheduler_interval = Some(interval);
        self
    }

    pub fn with_scheduler_batch_size(mut self, size: usize) -> Self {
        self.scheduler_batch_size = Some(size);
        self
    }

    pub fn with_receiver_pause_interval(mut self, interval: Duration) -> Self {
        self.receiver_pause_interval = Some(interval);
        self
    }

    pub fn with_concurrent_receivers(mut self, count: u8) -> Self {
        self.concurrent_receivers = Some(count);
        self
    }

    pub fn with_concurrent_handlers(mut self, count: u8) -> Self {
        self.concurrent_handlers = Some(count);
        self
    }

    pub fn with_shutdown_grace_period(mut self, grace: Duration) -> Self {
        self.shutdown_grace_period = Some(grace);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Clamp every field into range and fill in defaults.
    pub fn normalize(self) -> ConsumerConfig {
        ConsumerConfig {
            store_operation_max_attempts: MAX_ATTEMPTS.apply(self.store_operation_max_attempts),
            store_operation_max_backoff: MAX_BACKOFF.apply(self.store_operation_max_backoff),
            lone_consumer: self.lone_consumer.unwrap_or(false),
            cleaner_interval: CLEANER_INTERVAL.apply(self.cleaner_interval),
            heartbeat_interval: HEARTBEAT_INTERVAL.apply(self.heartbeat_interval),
            scheduler_interval: SCHEDULER_INTERVAL.apply(self.scheduler_interval),
            scheduler_batch_size: SCHEDULER_BATCH_SIZE.apply(self.scheduler_batch_size),
            receiver_pause_interval: RECEIVER_PAUSE_INTERVAL.apply(self.receiver_pause_interval),
            concurrent_receivers: CONCURRENT_RECEIVERS.apply(self.concurrent_receivers),
            concurrent_handlers: CONCURRENT_HANDLERS.apply(self.concurrent_handlers),
            shutdown_grace_period: SHUTDOWN_GRACE_PERIOD.apply(self.shutdown_grace_period),
            prefix: self.prefix.unwrap_or_default(),
        }
    }
}

/// Normalized consumer configuration. Every value is within range.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    pub store_operation_max_attempts: u32,
    pub store_operation_max_backoff: Duration,
    pub lone_consumer: bool,
    pub cleaner_interval: Duration,
    pub heartbeat_interval: Duration,
    pub scheduler_interval: Duration,
    pub scheduler_batch_size: usize,
    pub receiver_pause_interval: Duration,
    pub concurrent_receivers: u8,
    pub concurrent_handlers: u8,
    pub shutdown_grace_period: Duration,
    pub prefix: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerOptions::default().normalize()
    }
}

impl From<ConsumerOptions> for ConsumerConfig {
    fn from(options: ConsumerOptions) -> Self {
        options.normalize()
    }
}

impl ConsumerConfig {
    /// How long a consumer may go without heartbeating before siblings
    /// consider it dead.
    ///
    /// One heartbeat interval, plus the longest a heartbeat can spend retrying,
    /// plus [`CLOCK_DRIFT_TOLERANCE`].
    pub fn dead_consumer_threshold(&self) -> Duration {
        self.heartbeat_interval
            + max_cumulative_backoff(
                self.store_operation_max_attempts,
                self.store_operation_max_backoff,
            )
            + CLOCK_DRIFT_TOLERANCE
    }
}

/// Producer configuration.
///
/// Publishing is not retried unless `max_attempts` is raised; the caller
/// decides what a failed publish means.
///
/// Deserialized values are clamped the same way the builders clamp them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "ProducerFields")]
pub struct ProducerConfig {
    pub max_attempts: u32,
    pub max_backoff: Duration,
    pub prefix: String,
}

/// Wire form of [`ProducerConfig`]; durations in whole seconds.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ProducerFields {
    max_attempts: Option<u32>,
    #[serde(with = "opt_secs")]
    max_backoff: Option<Duration>,
    prefix: Option<String>,
}

impl From<ProducerFields> for ProducerConfig {
    fn from(fields: ProducerFields) -> Self {
        let mut config = ProducerConfig::default();
        if let Some(attempts) = fields.max_attempts {
            config = config.with_max_attempts(attempts);
        }
        if let Some(backoff) = fields.max_backoff {
            config = config.with_max_backoff(backoff);
        }
        if let Some(prefix) = fields.prefix {
            config = config.with_prefix(prefix);
        }
        config
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            max_backoff: MAX_BACKOFF.default,
            prefix: String::new(),
        }
    }
}

impl ProducerConfig {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = MAX_ATTEMPTS.apply(Some(attempts));
        self
    }

    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = MAX_BACKOFF.apply(Some(backoff));
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|secs| secs.map(Duration::from_secs))
    }
}
