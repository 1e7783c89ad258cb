//! Admission control: may a prospective request proceed under current quotas?
//!
//! Checks run in a fixed order and the first violation wins:
//! per-minute rate, daily limits, monthly limits, then the model's context
//! window. Within a period, tokens are checked before requests before cost.
//! The controller never fails; every outcome is an [`AdmissionDecision`].

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::{Clock, ScopeUsage, TokenEstimator, UsageLedger};
use crate::pricing::PricingTable;
use crate::quota::{PeriodLimits, QuotaPolicy};
use crate::types::FailureKind;

/// Fallback wait when the rate limit is zero and the window is empty.
const FULL_WINDOW_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionRequest {
    pub model: String,
    pub prompt_text: String,
    pub estimated_completion_tokens: u64,
}

impl AdmissionRequest {
    pub fn new(
        model: impl Into<String>,
        prompt_text: impl Into<String>,
        estimated_completion_tokens: u64,
    ) -> Self {
        Self {
            model: model.into(),
            prompt_text: prompt_text.into(),
            estimated_completion_tokens,
        }
    }
}

/// Estimates attached to an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    pub prompt_tokens: u64,
    pub estimated_tokens: u64,
    pub estimated_cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    pub kind: FailureKind,
    pub message: String,
    /// Seconds until a retry may succeed, for per-minute denials
    pub retry_after: Option<u64>,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AdmissionDecision {
    Allow(Admission),
    Deny(Denial),
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Self::Deny(denial) => Some(denial),
            Self::Allow(_) => None,
        }
    }

    pub fn into_result(self) -> Result<Admission, Denial> {
        match self {
            Self::Allow(admission) => Ok(admission),
            Self::Deny(denial) => Err(denial),
        }
    }
}

/// Everything a decision reads.
pub struct AdmissionContext<'a> {
    pub ledger: &'a mut UsageLedger,
    pub policy: &'a QuotaPolicy,
    pub pricing: &'a PricingTable,
    pub estimator: &'a dyn TokenEstimator,
    pub clock: &'a dyn Clock,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AdmissionController;

impl AdmissionController {
    pub fn new() -> Self {
        Self
    }

    pub fn check(
        &self,
        ctx: AdmissionContext<'_>,
        request: &AdmissionRequest,
    ) -> AdmissionDecision {
        ctx.ledger.rollover_if_needed(ctx.clock);

        let prompt_tokens = ctx.estimator.estimate(&request.prompt_text);
        let estimated_tokens = prompt_tokens + request.estimated_completion_tokens;
        let estimated_cost = ctx.pricing.cost(
            &request.model,
            prompt_tokens,
            request.estimated_completion_tokens,
        );

        let now = ctx.clock.now();
        if let Some(limit) = ctx.policy.per_minute.requests {
            let current = ctx.ledger.minute_requests(now);
            if current >= limit as usize {
                let retry_after = ctx.ledger.retry_after(now).unwrap_or(FULL_WINDOW_SECS);
                return deny(
                    FailureKind::Rate,
                    format!(
                        "Rate limit reached: {limit} requests per minute. Try again in {retry_after} seconds."
                    ),
                    Some(retry_after),
                );
            }
        }

        let periods = [
            (PeriodKind::Daily, &ctx.ledger.daily().usage, &ctx.policy.daily),
            (PeriodKind::Monthly, &ctx.ledger.monthly().usage, &ctx.policy.monthly),
        ];
        for (period, used, limits) in periods {
            if let Some(denial) =
                check_period(period, used, limits, estimated_tokens, estimated_cost)
            {
                return AdmissionDecision::Deny(denial);
            }
        }

        if let Some(window) = ctx.pricing.context_window(&request.model)
            && prompt_tokens > window
        {
            return deny(
                FailureKind::Context,
                format!(
                    "Prompt of about {prompt_tokens} tokens exceeds the {window}-token context window of {}.",
                    request.model
                ),
                None,
            );
        }

        AdmissionDecision::Allow(Admission {
            prompt_tokens,
            estimated_tokens,
            estimated_cost,
        })
    }
}

#[derive(Clone, Copy)]
enum PeriodKind {
    Daily,
    Monthly,
}

impl PeriodKind {
    fn label(self) -> &'static str {
        match self {
            Self::Daily => "Daily",
            Self::Monthly => "Monthly",
        }
    }

    fn reset(self) -> &'static str {
        match self {
            Self::Daily => "Resets at the start of the next day.",
            Self::Monthly => "Resets at the start of the next month.",
        }
    }

    fn kinds(self) -> [FailureKind; 3] {
        match self {
            Self::Daily => [
                FailureKind::DailyTokens,
                FailureKind::DailyRequests,
                FailureKind::DailyCost,
            ],
            Self::Monthly => [
                FailureKind::MonthlyTokens,
                FailureKind::MonthlyRequests,
                FailureKind::MonthlyCost,
            ],
        }
    }
}

fn check_period(
    period: PeriodKind,
    used: &ScopeUsage,
    limits: &PeriodLimits,
    estimated_tokens: u64,
    estimated_cost: Decimal,
) -> Option<Denial> {
    let [tokens_kind, requests_kind, cost_kind] = period.kinds();
    let (label, reset) = (period.label(), period.reset());

    if let Some(limit) = limits.tokens
        && used.tokens.total() + estimated_tokens > limit
    {
        return Some(denial(
            tokens_kind,
            format!(
                "{label} token limit reached: {} of {limit} tokens used, this request needs about {estimated_tokens}. {reset}",
                used.tokens.total()
            ),
        ));
    }
    if let Some(limit) = limits.requests
        && used.requests + 1 > limit
    {
        return Some(denial(
            requests_kind,
            format!(
                "{label} request limit reached: {} of {limit} requests used. {reset}",
                used.requests
            ),
        ));
    }
    if let Some(limit) = limits.cost
        && used.cost + estimated_cost > limit
    {
        return Some(denial(
            cost_kind,
            format!(
                "{label} cost limit reached: ${} of ${limit} spent, this request costs about ${}. {reset}",
                used.cost.round_dp(4),
                estimated_cost.round_dp(4)
            ),
        ));
    }
    None
}

fn denial(kind: FailureKind, message: String) -> Denial {
    Denial {
        kind,
        message,
        retry_after: None,
    }
}

fn deny(kind: FailureKind, message: String, retry_after: Option<u64>) -> AdmissionDecision {
    AdmissionDecision::Deny(Denial {
        kind,
        message,
        retry_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{HeuristicEstimator, ManualClock};
    use crate::pricing::ModelPricing;
    use crate::types::Usage;
    use chrono::{TimeDelta, TimeZone, Utc};
    use rust_decimal_macros::dec;

    struct Fixture {
        ledger: UsageLedger,
        policy: QuotaPolicy,
        pricing: PricingTable,
        clock: ManualClock,
    }

    impl Fixture {
        fn new(policy: QuotaPolicy) -> Self {
            let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 15, 10, 0, 0).unwrap());
            Self {
                ledger: UsageLedger::new(&clock),
                policy,
                pricing: PricingTable::builder()
                    .model("m", ModelPricing::new(dec!(0.03), dec!(0.06), 50))
                    .build(),
                clock,
            }
        }

        fn record(&mut self, usage: Usage, cost: Decimal) {
            self.ledger.record("m", &usage, cost, &self.clock);
        }

        fn check(&mut self, request: &AdmissionRequest) -> AdmissionDecision {
            AdmissionController::new().check(
                AdmissionContext {
                    ledger: &mut self.ledger,
                    policy: &self.policy,
                    pricing: &self.pricing,
                    estimator: &HeuristicEstimator,
                    clock: &self.clock,
                },
                request,
            )
        }
    }

    fn kind(decision: &AdmissionDecision) -> Option<FailureKind> {
        decision.denial().map(|d| d.kind)
    }

    #[test]
    fn test_allow_with_estimates() {
        let mut fx = Fixture::new(QuotaPolicy::unlimited());
        let decision = fx.check(&AdmissionRequest::new("m", "hello world", 100));
        let admission = decision.into_result().unwrap();
        assert_eq!(admission.prompt_tokens, 3);
        assert_eq!(admission.estimated_tokens, 103);
        assert_eq!(admission.estimated_cost, dec!(0.00609));
    }

    #[test]
    fn test_daily_tokens_denied() {
        let mut fx = Fixture::new(QuotaPolicy::default().daily(PeriodLimits {
            tokens: Some(100),
            ..Default::default()
        }));
        fx.record(Usage::new(95, 0), Decimal::ZERO);

        let decision = fx.check(&AdmissionRequest::new("m", "", 10));
        assert_eq!(kind(&decision), Some(FailureKind::DailyTokens));
        let message = &decision.denial().unwrap().message;
        assert!(message.contains("token"));
        assert!(message.contains("next day"));
    }

    #[test]
    fn test_rate_denied_with_retry_after() {
        let mut fx = Fixture::new(QuotaPolicy::default().per_minute_requests(2));
        fx.record(Usage::new(1, 1), Decimal::ZERO);
        fx.clock.advance(TimeDelta::seconds(5));
        fx.record(Usage::new(1, 1), Decimal::ZERO);
        fx.clock.advance(TimeDelta::seconds(5));

        let decision = fx.check(&AdmissionRequest::new("m", "hi", 1));
        let denial = decision.denial().unwrap();
        assert_eq!(denial.kind, FailureKind::Rate);
        assert_eq!(denial.retry_after, Some(50));
        assert!(denial.message.contains("50 seconds"));

        fx.clock.advance(TimeDelta::seconds(51));
        assert!(fx.check(&AdmissionRequest::new("m", "hi", 1)).is_allowed());
    }

    #[test]
    fn test_precedence_tokens_before_requests_before_cost() {
        let limits = PeriodLimits {
            tokens: Some(10),
            requests: Some(1),
            cost: Some(dec!(0.0001)),
        };
        let mut fx = Fixture::new(QuotaPolicy::default().daily(limits).monthly(limits));
        fx.record(Usage::new(10, 0), dec!(1));

        let decision = fx.check(&AdmissionRequest::new("m", "", 1));
        assert_eq!(kind(&decision), Some(FailureKind::DailyTokens));

        fx.policy.daily.tokens = None;
        let decision = fx.check(&AdmissionRequest::new("m", "", 1));
        assert_eq!(kind(&decision), Some(FailureKind::DailyRequests));

        fx.policy.daily.requests = None;
        let decision = fx.check(&AdmissionRequest::new("m", "", 1));
        assert_eq!(kind(&decision), Some(FailureKind::DailyCost));

        fx.policy.daily = PeriodLimits::default();
        let decision = fx.check(&AdmissionRequest::new("m", "", 1));
        assert_eq!(kind(&decision), Some(FailureKind::MonthlyTokens));
        assert!(decision.denial().unwrap().message.contains("next month"));
    }

    #[test]
    fn test_context_window() {
        let mut fx = Fixture::new(QuotaPolicy::unlimited());
        let long_prompt = "word ".repeat(200);
        let decision = fx.check(&AdmissionRequest::new("m", long_prompt.clone(), 1));
        assert_eq!(kind(&decision), Some(FailureKind::Context));

        let decision = fx.check(&AdmissionRequest::new("unknown-model", long_prompt, 1));
        assert!(decision.is_allowed());
    }

    #[test]
    fn test_stale_period_is_not_counted() {
        let mut fx = Fixture::new(QuotaPolicy::default().daily(PeriodLimits {
            requests: Some(1),
            ..Default::default()
        }));
        fx.record(Usage::new(1, 1), Decimal::ZERO);
        assert_eq!(
            kind(&fx.check(&AdmissionRequest::new("m", "", 1))),
            Some(FailureKind::DailyRequests)
        );

        fx.clock.advance(TimeDelta::days(1));
        assert!(fx.check(&AdmissionRequest::new("m", "", 1)).is_allowed());
        assert_eq!(fx.ledger.daily().date, "2024-05-16");
    }
}
