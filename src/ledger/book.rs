//! The usage ledger: daily, monthly, per-minute and lifetime scopes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::clock::{Clock, PeriodKeys};
use super::scope::{DailyScope, LifetimeScope, MinuteWindow, MonthlyScope};
use crate::types::Usage;

/// Which counters a reset clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetScope {
    Minute,
    Daily,
    Monthly,
    Lifetime,
    All,
}

/// Persisted usage counters.
///
/// Plain data: callers are expected to serialize access (see
/// [`LedgerHandle`](super::LedgerHandle)). Every read or write goes through
/// [`rollover_if_needed`](Self::rollover_if_needed) first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageLedger {
    pub(crate) daily: DailyScope,
    pub(crate) monthly: MonthlyScope,
    pub(crate) minutely: MinuteWindow,
    pub(crate) lifetime: LifetimeScope,
}

impl UsageLedger {
    /// Empty ledger keyed to the clock's current period.
    pub fn new(clock: &dyn Clock) -> Self {
        let keys = clock.period_keys();
        Self {
            lifetime: LifetimeScope::new(keys.date.clone()),
            daily: DailyScope::new(keys.date),
            monthly: MonthlyScope::new(keys.month),
            minutely: MinuteWindow::default(),
        }
    }

    pub fn daily(&self) -> &DailyScope {
        &self.daily
    }

    pub fn monthly(&self) -> &MonthlyScope {
        &self.monthly
    }

    pub fn lifetime(&self) -> &LifetimeScope {
        &self.lifetime
    }

    pub fn minutely(&self) -> &MinuteWindow {
        &self.minutely
    }

    /// Replaces any scope whose period key is stale with a zeroed scope for the
    /// current period. Returns true if anything changed.
    pub fn rollover_if_needed(&mut self, clock: &dyn Clock) -> bool {
        let PeriodKeys { date, month } = clock.period_keys();
        let mut changed = false;

        if self.daily.date != date {
            tracing::debug!(from = %self.daily.date, to = %date, "daily usage rolled over");
            self.daily = DailyScope::new(date.clone());
            changed = true;
        }
        if self.monthly.month != month {
            tracing::debug!(from = %self.monthly.month, to = %month, "monthly usage rolled over");
            self.monthly = MonthlyScope::new(month);
            changed = true;
        }
        if self.lifetime.start_date.is_empty() {
            self.lifetime.start_date = date;
            changed = true;
        }
        changed
    }

    /// Adds one request's usage to every scope and the per-minute window.
    pub fn record(&mut self, model: &str, usage: &Usage, cost: Decimal, clock: &dyn Clock) {
        self.rollover_if_needed(clock);
        self.daily.usage.add(model, usage, cost);
        self.monthly.usage.add(model, usage, cost);
        self.lifetime.usage.add(model, usage, cost);
        self.minutely.push(clock.now());
    }

    pub fn minute_requests(&self, now: DateTime<Utc>) -> usize {
        self.minutely.count(now)
    }

    pub fn retry_after(&self, now: DateTime<Utc>) -> Option<u64> {
        self.minutely.retry_after(now)
    }

    pub fn reset(&mut self, scope: ResetScope, clock: &dyn Clock) {
        let keys = clock.period_keys();
        match scope {
            ResetScope::Minute => self.minutely.clear(),
            ResetScope::Daily => self.daily = DailyScope::new(keys.date),
            ResetScope::Monthly => self.monthly = MonthlyScope::new(keys.month),
            ResetScope::Lifetime => self.lifetime = LifetimeScope::new(keys.date),
            ResetScope::All => *self = Self::new(clock),
        }
    }

    /// Repairs derived fields of an imported or loaded snapshot.
    pub fn normalize(&mut self, clock: &dyn Clock) {
        self.daily.usage.normalize();
        self.monthly.usage.normalize();
        self.lifetime.usage.normalize();
        self.minutely.prune(clock.now());
        self.rollover_if_needed(clock);
    }
}
