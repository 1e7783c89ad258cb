//! Usage statistics relative to the quota policy.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use super::book::UsageLedger;
use super::scope::ScopeUsage;
use crate::quota::{PeriodLimits, QuotaPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Daily,
    Monthly,
    Lifetime,
}

/// Share of each configured limit already used, as a percentage.
///
/// A field is `None` when the corresponding limit is unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsagePercentages {
    pub tokens: Option<f64>,
    pub requests: Option<f64>,
    pub cost: Option<f64>,
}

impl UsagePercentages {
    fn compute(usage: &ScopeUsage, limits: &PeriodLimits) -> Self {
        Self {
            tokens: limits
                .tokens
                .map(|limit| percent(usage.tokens.total() as f64, limit as f64)),
            requests: limits
                .requests
                .map(|limit| percent(usage.requests as f64, limit as f64)),
            cost: limits.cost.map(|limit| {
                percent(
                    usage.cost.to_f64().unwrap_or(0.0),
                    limit.to_f64().unwrap_or(0.0),
                )
            }),
        }
    }
}

fn percent(used: f64, limit: f64) -> f64 {
    if limit <= 0.0 {
        return 100.0;
    }
    used / limit * 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodStats {
    pub period: Period,
    /// Date, month, or lifetime start date
    pub period_key: String,
    pub usage: ScopeUsage,
    /// `None` for the lifetime scope, which has no limits
    pub limits: Option<PeriodLimits>,
    pub percentages: UsagePercentages,
}

impl PeriodStats {
    pub fn compute(ledger: &UsageLedger, policy: &QuotaPolicy, period: Period) -> Self {
        let (period_key, usage, limits) = match period {
            Period::Daily => (&ledger.daily.date, &ledger.daily.usage, Some(policy.daily)),
            Period::Monthly => (
                &ledger.monthly.month,
                &ledger.monthly.usage,
                Some(policy.monthly),
            ),
            Period::Lifetime => (&ledger.lifetime.start_date, &ledger.lifetime.usage, None),
        };
        let percentages = limits
            .as_ref()
            .map(|l| UsagePercentages::compute(usage, l))
            .unwrap_or_default();

        Self {
            period,
            period_key: period_key.clone(),
            usage: usage.clone(),
            limits,
            percentages,
        }
    }

    pub fn cost(&self) -> Decimal {
        self.usage.cost
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub daily: PeriodStats,
    pub monthly: PeriodStats,
    pub lifetime: PeriodStats,
    pub current_minute_requests: usize,
    pub per_minute_limit: Option<u32>,
}

impl UsageStats {
    pub fn compute(ledger: &UsageLedger, policy: &QuotaPolicy, now: DateTime<Utc>) -> Self {
        Self {
            daily: PeriodStats::compute(ledger, policy, Period::Daily),
            monthly: PeriodStats::compute(ledger, policy, Period::Monthly),
            lifetime: PeriodStats::compute(ledger, policy, Period::Lifetime),
            current_minute_requests: ledger.minute_requests(now),
            per_minute_limit: policy.per_minute.requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Clock, ManualClock};
    use crate::types::Usage;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_percentages_only_for_set_limits() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 2, 10, 8, 0, 0).unwrap());
        let mut ledger = UsageLedger::new(&clock);
        ledger.record("m", &Usage::new(30, 20), dec!(0.5), &clock);

        let policy = QuotaPolicy::default().daily(PeriodLimits {
            tokens: Some(200),
            requests: None,
            cost: Some(dec!(2)),
        });
        let stats = UsageStats::compute(&ledger, &policy, clock.now());

        assert_eq!(stats.daily.period_key, "2024-02-10");
        assert_eq!(stats.daily.percentages.tokens, Some(25.0));
        assert_eq!(stats.daily.percentages.requests, None);
        assert_eq!(stats.daily.percentages.cost, Some(25.0));
        assert_eq!(stats.monthly.percentages, UsagePercentages::default());
        assert!(stats.lifetime.limits.is_none());
        assert_eq!(stats.current_minute_requests, 1);
    }

    #[test]
    fn test_zero_limit_is_full() {
        assert_eq!(percent(0.0, 0.0), 100.0);
    }
}
