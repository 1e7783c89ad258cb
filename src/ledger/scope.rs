//! Counter scopes held by the usage ledger.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Usage;

/// Width of the sliding per-minute request window.
pub const MINUTE_WINDOW: TimeDelta = TimeDelta::seconds(60);

/// Prompt, completion and total token counters. `total` is always the sum
/// of the other two.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenCounts {
    prompt: u64,
    completion: u64,
    total: u64,
}

impl TokenCounts {
    pub fn prompt(&self) -> u64 {
        self.prompt
    }

    pub fn completion(&self) -> u64 {
        self.completion
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn add(&mut self, usage: &Usage) {
        self.prompt += usage.prompt_tokens;
        self.completion += usage.completion_tokens;
        self.total = self.prompt + self.completion;
    }

    fn normalize(&mut self) {
        self.total = self.prompt + self.completion;
    }
}

/// Per-model slice of a scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelUsage {
    pub tokens: TokenCounts,
    pub requests: u64,
    pub cost: Decimal,
}

/// Counters shared by the daily, monthly and lifetime scopes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScopeUsage {
    pub tokens: TokenCounts,
    pub requests: u64,
    pub cost: Decimal,
    pub model_breakdown: BTreeMap<String, ModelUsage>,
}

impl ScopeUsage {
    pub fn add(&mut self, model: &str, usage: &Usage, cost: Decimal) {
        self.tokens.add(usage);
        self.requests += 1;
        self.cost += cost;

        let entry = self.model_breakdown.entry(model.to_string()).or_default();
        entry.tokens.add(usage);
        entry.requests += 1;
        entry.cost += cost;
    }

    pub(crate) fn normalize(&mut self) {
        self.tokens.normalize();
        for entry in self.model_breakdown.values_mut() {
            entry.tokens.normalize();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyScope {
    pub date: String,
    #[serde(flatten)]
    pub usage: ScopeUsage,
}

impl DailyScope {
    pub fn new(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            usage: ScopeUsage::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonthlyScope {
    pub month: String,
    #[serde(flatten)]
    pub usage: ScopeUsage,
}

impl MonthlyScope {
    pub fn new(month: impl Into<String>) -> Self {
        Self {
            month: month.into(),
            usage: ScopeUsage::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LifetimeScope {
    pub start_date: String,
    #[serde(flatten)]
    pub usage: ScopeUsage,
}

impl LifetimeScope {
    pub fn new(start_date: impl Into<String>) -> Self {
        Self {
            start_date: start_date.into(),
            usage: ScopeUsage::default(),
        }
    }
}

/// Sliding window of request timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinuteWindow {
    pub requests: Vec<DateTime<Utc>>,
}

impl MinuteWindow {
    pub fn push(&mut self, at: DateTime<Utc>) {
        self.requests.push(at);
        self.prune(at);
    }

    /// Drops timestamps that have aged out of the window.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        self.requests.retain(|t| now - *t < MINUTE_WINDOW);
    }

    pub fn count(&self, now: DateTime<Utc>) -> usize {
        self.requests
            .iter()
            .filter(|t| now - **t < MINUTE_WINDOW)
            .count()
    }

    /// Whole seconds until the oldest in-window request ages out, at least 1.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Option<u64> {
        let oldest = self
            .requests
            .iter()
            .filter(|t| now - **t < MINUTE_WINDOW)
            .min()?;
        let remaining_ms = (*oldest + MINUTE_WINDOW - now).num_milliseconds().max(0) as u64;
        Some(remaining_ms.div_ceil(1000).max(1))
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }
}
