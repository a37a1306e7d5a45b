use core::fmt;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Days, FixedOffset, Local, NaiveDate, TimeDelta};

/// Source of "now" in the operator's local timezone. Day boundaries for the daily cap and the
/// midnight reset are taken from this.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<FixedOffset>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

/// Starts at a fixed instant and moves forward with the tokio clock, so paused-time tests see
/// wall time and timers advance together. `advance` adds a manual offset on top.
#[derive(Debug)]
pub struct ManualClock {
    base: DateTime<FixedOffset>,
    origin: tokio::time::Instant,
    offset: Mutex<TimeDelta>,
}

impl ManualClock {
    pub fn new(base: DateTime<FixedOffset>) -> Self {
        Self {
            base,
            origin: tokio::time::Instant::now(),
            offset: Mutex::new(TimeDelta::zero()),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        let elapsed = TimeDelta::from_std(self.origin.elapsed()).unwrap_or(TimeDelta::zero());
        let offset = *self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.base + elapsed + offset
    }
}

/// Time left until the next local midnight after `now`
pub fn until_next_midnight(now: DateTime<FixedOffset>) -> Duration {
    let next_midnight = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|dt| dt.and_local_timezone(*now.offset()).single());

    match next_midnight {
        Some(at) => (at - now).to_std().unwrap_or(Duration::ZERO),
        None => Duration::from_secs(24 * 60 * 60),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn at(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn test_until_next_midnight() {
        let wait = until_next_midnight(at("2026-03-04T23:59:30+02:00"));
        assert_eq!(wait, Duration::from_secs(30));

        let wait = until_next_midnight(at("2026-03-04T00:00:00+00:00"));
        assert_eq!(wait, Duration::from_secs(24 * 60 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_clock_follows_tokio_time() {
        let clock = ManualClock::new(at("2026-03-04T23:00:00+00:00"));
        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        clock.advance(TimeDelta::minutes(45));

        assert_eq!(clock.now(), at("2026-03-05T00:15:00+00:00"));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2026, 3, 5).unwrap());
    }
}
