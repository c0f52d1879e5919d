//! Time Utilities
//!
//! Salience and scheduling read time through a [`Clock`] so tests can move it.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.write() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.write() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Fractional days from `from` to `to`, never negative
pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let millis = (to - from).num_milliseconds().max(0);
    millis as f64 / 86_400_000.0
}

/// Convert stored epoch milliseconds back to a timestamp
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = from_millis(1_700_000_000_000);
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::days(61));
        assert_eq!(days_between(start, clock.now()), 61.0);
    }

    #[test]
    fn test_days_between_clamps_negative() {
        let now = Utc::now();
        assert_eq!(days_between(now, now - Duration::hours(5)), 0.0);
        assert_eq!(days_between(now, now + Duration::hours(12)), 0.5);
    }

    #[test]
    fn test_millis_roundtrip() {
        let now = SystemClock.now();
        assert_eq!(from_millis(now.timestamp_millis()).timestamp_millis(), now.timestamp_millis());
    }
}
