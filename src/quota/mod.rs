//! Quota policy: configured ceilings per resource and period.
//!
//! Every limit is optional; `None` means unlimited. Policies are updated with a
//! [`QuotaPolicyPatch`], where an explicit `null` clears a limit and an absent
//! field leaves it untouched.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaPolicy {
    pub per_minute: MinuteLimits,
    pub daily: PeriodLimits,
    pub monthly: PeriodLimits,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinuteLimits {
    pub requests: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodLimits {
    pub tokens: Option<u64>,
    pub requests: Option<u64>,
    pub cost: Option<Decimal>,
}

impl PeriodLimits {
    pub fn is_unlimited(&self) -> bool {
        self.tokens.is_none() && self.requests.is_none() && self.cost.is_none()
    }

    fn sanitized(self, period: &'static str) -> Self {
        let cost = match self.cost {
            Some(c) if c.is_sign_negative() => {
                tracing::warn!(period, cost = %c, "negative cost limit ignored");
                None
            }
            other => other,
        };
        Self { cost, ..self }
    }
}

impl QuotaPolicy {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn per_minute_requests(mut self, limit: u32) -> Self {
        self.per_minute.requests = Some(limit);
        self
    }

    pub fn daily(mut self, limits: PeriodLimits) -> Self {
        self.daily = limits;
        self
    }

    pub fn monthly(mut self, limits: PeriodLimits) -> Self {
        self.monthly = limits;
        self
    }

    /// Drops malformed values (negative cost ceilings) instead of rejecting the policy.
    pub fn sanitized(self) -> Self {
        Self {
            per_minute: self.per_minute,
            daily: self.daily.sanitized("daily"),
            monthly: self.monthly.sanitized("monthly"),
        }
    }

    pub fn apply(&mut self, patch: &QuotaPolicyPatch) {
        if let Some(minute) = &patch.per_minute
            && let Some(requests) = minute.requests
        {
            self.per_minute.requests = requests;
        }
        if let Some(daily) = &patch.daily {
            daily.apply_to(&mut self.daily);
        }
        if let Some(monthly) = &patch.monthly {
            monthly.apply_to(&mut self.monthly);
        }
        *self = self.clone().sanitized();
    }
}

/// Partial update of a [`QuotaPolicy`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaPolicyPatch {
    pub per_minute: Option<MinuteLimitsPatch>,
    pub daily: Option<PeriodLimitsPatch>,
    pub monthly: Option<PeriodLimitsPatch>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinuteLimitsPatch {
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub requests: Option<Option<u32>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodLimitsPatch {
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub tokens: Option<Option<u64>>,
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub requests: Option<Option<u64>>,
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub cost: Option<Option<Decimal>>,
}

impl PeriodLimitsPatch {
    fn apply_to(&self, limits: &mut PeriodLimits) {
        if let Some(tokens) = self.tokens {
            limits.tokens = tokens;
        }
        if let Some(requests) = self.requests {
            limits.requests = requests;
        }
        if let Some(cost) = self.cost {
            limits.cost = cost;
        }
    }
}

impl QuotaPolicyPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn per_minute_requests(mut self, limit: Option<u32>) -> Self {
        self.per_minute = Some(MinuteLimitsPatch {
            requests: Some(limit),
        });
        self
    }

    pub fn daily_tokens(mut self, limit: Option<u64>) -> Self {
        self.daily.get_or_insert_with(Default::default).tokens = Some(limit);
        self
    }

    pub fn daily_requests(mut self, limit: Option<u64>) -> Self {
        self.daily.get_or_insert_with(Default::default).requests = Some(limit);
        self
    }

    pub fn daily_cost(mut self, limit: Option<Decimal>) -> Self {
        self.daily.get_or_insert_with(Default::default).cost = Some(limit);
        self
    }

    pub fn monthly_tokens(mut self, limit: Option<u64>) -> Self {
        self.monthly.get_or_insert_with(Default::default).tokens = Some(limit);
        self
    }

    pub fn monthly_requests(mut self, limit: Option<u64>) -> Self {
        self.monthly.get_or_insert_with(Default::default).requests = Some(limit);
        self
    }

    pub fn monthly_cost(mut self, limit: Option<Decimal>) -> Self {
        self.monthly.get_or_insert_with(Default::default).cost = Some(limit);
        self
    }
}

// Distinguishes an absent field (outer None) from an explicit null (Some(None)).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
