//! Wall-clock seam for period keys and the per-minute window.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, FixedOffset, Local, Offset, TimeDelta, Utc};

/// Source of the current instant and the local calendar offset.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;

    /// Offset used to derive calendar dates and months.
    fn offset(&self) -> FixedOffset {
        Utc.fix()
    }

    fn period_keys(&self) -> PeriodKeys {
        PeriodKeys::at(self.now(), self.offset())
    }
}

/// Calendar keys for the daily and monthly scopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodKeys {
    /// `YYYY-MM-DD`
    pub date: String,
    /// `YYYY-MM`
    pub month: String,
}

impl PeriodKeys {
    pub fn at(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let local = now.with_timezone(&offset);
        Self {
            date: local.format("%Y-%m-%d").to_string(),
            month: local.format("%Y-%m").to_string(),
        }
    }
}

/// Real time, with calendar periods in the host's local time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn offset(&self) -> FixedOffset {
        *Local::now().offset()
    }
}

/// Manually driven clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
    offset: FixedOffset,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
            offset: Utc.fix(),
        }
    }

    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.millis.store(now.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: TimeDelta) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}
