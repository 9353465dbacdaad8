//! Wall-clock abstraction.
//!
//! Scores written to the shared store (handle times, heartbeats) must come from
//! wall-clock time so that consumers on different hosts agree on them. Tests
//! substitute a clock driven by tokio's paused time.

use chrono::{DateTime, Utc};

/// Source of "now" for everything that is compared across processes.
pub trait Clock: Send + Sync + core::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Store score for an instant: Unix epoch seconds with millisecond precision.
pub fn epoch_score(at: &DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn epoch_score_keeps_milliseconds() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(epoch_score(&at), 1_700_000_000.123);
    }

    #[test]
    fn epoch_score_is_monotonic() {
        let a = Utc.timestamp_millis_opt(1_000).unwrap();
        let b = Utc.timestamp_millis_opt(1_001).unwrap();
        assert!(epoch_score(&a) < epoch_score(&b));
    }
}
