//! Environment configuration for the worker process.
//!
//! | Variable | Default |
//! |---|---|
//! | `REDIS_URL` | `redis://127.0.0.1:6379` |
//! | `QUEUE_NAME` | `workers` |
//! | `QUEUE_PREFIX` | empty |
//! | `LONE_CONSUMER` | `false` |
//! | `CONCURRENT_RECEIVERS` / `CONCURRENT_HANDLERS` | 1 / 5 |
//! | `STORE_MAX_ATTEMPTS` / `STORE_MAX_BACKOFF_SECS` | 5 / 10 |
//! | `HEARTBEAT_INTERVAL_SECS` / `CLEANER_INTERVAL_SECS` | 30 / 60 |
//! | `SCHEDULER_INTERVAL_SECS` / `SCHEDULER_BATCH_SIZE` | 5 / 100 |
//! | `RECEIVER_PAUSE_INTERVAL_SECS` | 5 |
//! | `SHUTDOWN_GRACE_PERIOD_SECS` | 10 |
//!
//! Unset numeric variables leave the queue defaults in place; out-of-range
//! values are clamped by [`ConsumerOptions`]. Unparseable values are logged and
//! ignored.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use brignext_infra::ConsumerOptions;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_QUEUE: &str = "workers";

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub redis_url: String,
    pub queue: String,
    pub options: ConsumerOptions,
}

impl WorkerSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let redis_url = lookup("REDIS_URL").unwrap_or_else(|| {
            warn!(default = DEFAULT_REDIS_URL, "REDIS_URL not set; using local default");
            DEFAULT_REDIS_URL.to_string()
        });
        let queue = lookup("QUEUE_NAME")
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| {
                warn!(default = DEFAULT_QUEUE, "QUEUE_NAME not set; using default");
                DEFAULT_QUEUE.to_string()
            });

        let mut options = ConsumerOptions::new();
        if let Some(prefix) = lookup("QUEUE_PREFIX") {
            options = options.with_prefix(prefix);
        }
        if let Some(lone) = parsed(&lookup, "LONE_CONSUMER") {
            options = options.with_lone_consumer(lone);
        }
        if let Some(n) = parsed(&lookup, "CONCURRENT_RECEIVERS") {
            options = options.with_concurrent_receivers(n);
        }
        if let Some(n) = parsed(&lookup, "CONCURRENT_HANDLERS") {
            options = options.with_concurrent_handlers(n);
        }
        if let Some(n) = parsed(&lookup, "STORE_MAX_ATTEMPTS") {
            options = options.with_store_operation_max_attempts(n);
        }
        if let Some(d) = secs(&lookup, "STORE_MAX_BACKOFF_SECS") {
            options = options.with_store_operation_max_backoff(d);
        }
        if let Some(d) = secs(&lookup, "HEARTBEAT_INTERVAL_SECS") {
            options = options.with_heartbeat_interval(d);
        }
        if let Some(d) = secs(&lookup, "CLEANER_INTERVAL_SECS") {
            options = options.with_cleaner_interval(d);
        }
        if let Some(d) = secs(&lookup, "SCHEDULER_INTERVAL_SECS") {
            options = options.with_scheduler_interval(d);
        }
        if let Some(n) = parsed(&lookup, "SCHEDULER_BATCH_SIZE") {
            options = options.with_scheduler_batch_size(n);
        }
        if let Some(d) = secs(&lookup, "RECEIVER_PAUSE_INTERVAL_SECS") {
            options = options.with_receiver_pause_interval(d);
        }
        if let Some(d) = secs(&lookup, "SHUTDOWN_GRACE_PERIOD_SECS") {
            options = options.with_shutdown_grace_period(d);
        }

        Self {
            redis_url,
            queue,
            options,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = key, value = %raw, "invalid value; using default");
            None
        }
    }
}

fn secs(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    parsed::<u64>(lookup, key).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> WorkerSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let s = settings(&[]);
        assert_eq!(s.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(s.queue, DEFAULT_QUEUE);
        assert_eq!(s.options, ConsumerOptions::new());
    }

    #[test]
    fn variables_map_onto_options() {
        let s = settings(&[
            ("REDIS_URL", "redis://queue:6379/2"),
            ("QUEUE_NAME", "jobs"),
            ("QUEUE_PREFIX", "brignext:"),
            ("LONE_CONSUMER", "true"),
            ("CONCURRENT_HANDLERS", "12"),
            ("HEARTBEAT_INTERVAL_SECS", "15"),
        ]);
        assert_eq!(s.redis_url, "redis://queue:6379/2");
        assert_eq!(s.queue, "jobs");

        let config = s.options.normalize();
        assert_eq!(config.prefix, "brignext:");
        assert!(config.lone_consumer);
        assert_eq!(config.concurrent_handlers, 12);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
    }

    #[test]
    fn unparseable_values_are_ignored() {
        let s = settings(&[("CONCURRENT_RECEIVERS", "many"), ("LONE_CONSUMER", "yes")]);
        assert_eq!(s.options.concurrent_receivers, None);
        assert_eq!(s.options.lone_consumer, None);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let s = settings(&[("CONCURRENT_HANDLERS", "0"), ("CLEANER_INTERVAL_SECS", "1")]);
        let config = s.options.normalize();
        assert_eq!(config.concurrent_handlers, 1);
        assert_eq!(config.cleaner_interval, Duration::from_secs(5));
    }
}
