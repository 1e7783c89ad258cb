//! Admission decisions against live ledger state.

use std::sync::Arc;

use chrono::{TimeDelta, TimeZone, Utc};
use rust_decimal_macros::dec;
use tollgate::{
    AdmissionDecision, FailureKind, Governor, GovernorConfig, ManualClock, ModelPricing,
    PeriodLimits, PricingTable, QuotaPolicy, QuotaPolicyPatch, Usage,
};

fn pricing() -> PricingTable {
    PricingTable::builder()
        .model("m", ModelPricing::new(dec!(0.03), dec!(0.06), 8_192))
        .model("tiny", ModelPricing::new(dec!(0.001), dec!(0.002), 10))
        .build()
}

async fn governor_with(policy: QuotaPolicy) -> (Governor, Arc<ManualClock>) {
    governor_priced(policy, pricing()).await
}

async fn governor_priced(
    policy: QuotaPolicy,
    pricing: PricingTable,
) -> (Governor, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 4, 10, 12, 0, 0).unwrap(),
    ));
    let config = GovernorConfig {
        model: "m".into(),
        quota: policy,
        ..Default::default()
    };
    let governor = Governor::builder()
        .config(config)
        .pricing(pricing)
        .clock(clock.clone())
        .in_memory()
        .build()
        .await
        .unwrap();
    (governor, clock)
}

fn denied_kind(decision: &AdmissionDecision) -> Option<FailureKind> {
    decision.denial().map(|d| d.kind)
}

// ============================================================================
// Quota limits
// ============================================================================

mod quota_tests {
    use super::*;

    #[tokio::test]
    async fn test_daily_token_limit() {
        let (governor, _) = governor_with(QuotaPolicy::default().daily(PeriodLimits {
            tokens: Some(100),
            ..Default::default()
        }))
        .await;
        governor.ledger().record("m", Usage::new(95, 0)).await.unwrap();

        let decision = governor.check_admission("m", "", 10).await.unwrap();
        assert_eq!(denied_kind(&decision), Some(FailureKind::DailyTokens));
        let denial = decision.denial().unwrap();
        assert!(denial.message.contains("next day"));
        assert_eq!(denial.retry_after, None);

        let decision = governor.check_admission("m", "", 5).await.unwrap();
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn test_daily_request_limit() {
        let (governor, _) = governor_with(QuotaPolicy::default().daily(PeriodLimits {
            requests: Some(2),
            ..Default::default()
        }))
        .await;

        governor.ledger().record("m", Usage::new(1, 1)).await.unwrap();
        assert!(governor.check_admission("m", "hi", 1).await.unwrap().is_allowed());

        governor.ledger().record("m", Usage::new(1, 1)).await.unwrap();
        let decision = governor.check_admission("m", "hi", 1).await.unwrap();
        assert_eq!(denied_kind(&decision), Some(FailureKind::DailyRequests));
    }

    #[tokio::test]
    async fn test_monthly_cost_limit() {
        let (governor, _) = governor_with(QuotaPolicy::default().monthly(PeriodLimits {
            cost: Some(dec!(0.05)),
            ..Default::default()
        }))
        .await;

        let recorded = governor.ledger().record("m", Usage::new(1000, 500)).await.unwrap();
        assert_eq!(recorded.cost, dec!(0.06));

        let decision = governor.check_admission("m", "", 0).await.unwrap();
        assert_eq!(denied_kind(&decision), Some(FailureKind::MonthlyCost));
        assert!(decision.denial().unwrap().message.contains("next month"));
    }

    #[tokio::test]
    async fn test_daily_checked_before_monthly() {
        let limits = PeriodLimits {
            tokens: Some(10),
            ..Default::default()
        };
        let policy = QuotaPolicy::default().daily(limits).monthly(limits);
        let (governor, _) = governor_with(policy).await;

        let decision = governor.check_admission("m", "", 50).await.unwrap();
        assert_eq!(denied_kind(&decision), Some(FailureKind::DailyTokens));
    }

    #[tokio::test]
    async fn test_new_day_lifts_daily_limit() {
        let (governor, clock) = governor_with(QuotaPolicy::default().daily(PeriodLimits {
            requests: Some(1),
            ..Default::default()
        }))
        .await;
        governor.ledger().record("m", Usage::new(1, 1)).await.unwrap();
        assert!(!governor.check_admission("m", "", 1).await.unwrap().is_allowed());

        clock.advance(TimeDelta::days(1));
        assert!(governor.check_admission("m", "", 1).await.unwrap().is_allowed());
    }
}

// ============================================================================
// Per-minute rate
// ============================================================================

mod rate_tests {
    use super::*;

    #[tokio::test]
    async fn test_third_request_in_window_denied() {
        let (governor, clock) = governor_with(QuotaPolicy::default().per_minute_requests(2)).await;

        governor.ledger().record("m", Usage::new(1, 1)).await.unwrap();
        clock.advance(TimeDelta::seconds(20));
        governor.ledger().record("m", Usage::new(1, 1)).await.unwrap();
        clock.advance(TimeDelta::seconds(5));

        let decision = governor.check_admission("m", "hello", 8).await.unwrap();
        let denial = decision.denial().unwrap();
        assert_eq!(denial.kind, FailureKind::Rate);
        // Oldest request ages out 35s from now.
        assert_eq!(denial.retry_after, Some(35));
        assert!(denial.message.contains("Try again in 35 seconds"));

        clock.advance(TimeDelta::seconds(35));
        assert!(governor.check_admission("m", "hello", 8).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_rate_checked_before_period_limits() {
        let policy = QuotaPolicy::default()
            .per_minute_requests(1)
            .daily(PeriodLimits {
                requests: Some(1),
                ..Default::default()
            });
        let (governor, _) = governor_with(policy).await;
        governor.ledger().record("m", Usage::new(1, 1)).await.unwrap();

        let decision = governor.check_admission("m", "", 1).await.unwrap();
        assert_eq!(denied_kind(&decision), Some(FailureKind::Rate));
    }

    #[tokio::test]
    async fn test_zero_rate_limit_denies_everything() {
        let (governor, _) = governor_with(QuotaPolicy::default().per_minute_requests(0)).await;

        let decision = governor.check_admission("m", "", 1).await.unwrap();
        let denial = decision.denial().unwrap();
        assert_eq!(denial.kind, FailureKind::Rate);
        assert!(denial.retry_after.unwrap() >= 1);
    }
}

// ============================================================================
// Context window and policy updates
// ============================================================================

mod context_tests {
    use super::*;

    #[tokio::test]
    async fn test_prompt_over_context_window() {
        let (governor, _) = governor_with(QuotaPolicy::unlimited()).await;
        let prompt = "lorem ipsum dolor sit amet ".repeat(10);

        let decision = governor.check_admission("tiny", &*prompt, 1).await.unwrap();
        assert_eq!(denied_kind(&decision), Some(FailureKind::Context));

        let decision = governor.check_admission("m", &*prompt, 1).await.unwrap();
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn test_unknown_model_is_admitted_at_zero_cost() {
        let (governor, _) = governor_with(QuotaPolicy::default().daily(PeriodLimits {
            cost: Some(dec!(0)),
            ..Default::default()
        }))
        .await;

        let decision = governor
            .check_admission("mystery-model", "a long prompt here", 100)
            .await
            .unwrap();
        let admission = decision.into_result().unwrap();
        assert_eq!(admission.estimated_cost, dec!(0));
        assert_eq!(admission.estimated_tokens, admission.prompt_tokens + 100);
    }

    #[tokio::test]
    async fn test_unlisted_sibling_model_admitted_without_context_check() {
        let table = PricingTable::builder().with_defaults().build();
        let (governor, _) = governor_priced(QuotaPolicy::unlimited(), table).await;
        let prompt = "word ".repeat(20_000);

        let decision = governor.check_admission("gpt-4.1", &*prompt, 10).await.unwrap();
        let admission = decision.into_result().unwrap();
        assert_eq!(admission.estimated_cost, dec!(0));

        let decision = governor.check_admission("gpt-4", &*prompt, 10).await.unwrap();
        assert_eq!(denied_kind(&decision), Some(FailureKind::Context));
    }

    #[tokio::test]
    async fn test_policy_patch_lifts_limit() {
        let (governor, _) = governor_with(QuotaPolicy::default().daily(PeriodLimits {
            tokens: Some(5),
            requests: Some(100),
            ..Default::default()
        }))
        .await;
        assert!(!governor.check_admission("m", "", 10).await.unwrap().is_allowed());

        let policy = governor
            .update_quota_policy(QuotaPolicyPatch::new().daily_tokens(None))
            .await
            .unwrap();
        assert_eq!(policy.daily.tokens, None);
        assert_eq!(policy.daily.requests, Some(100));
        assert!(governor.check_admission("m", "", 10).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_check_does_not_consume_quota() {
        let (governor, _) = governor_with(QuotaPolicy::default().per_minute_requests(1)).await;

        for _ in 0..3 {
            assert!(governor.check_admission("m", "hi", 1).await.unwrap().is_allowed());
        }
        let stats = governor.get_usage_stats().await.unwrap();
        assert_eq!(stats.current_minute_requests, 0);
        assert_eq!(stats.daily.usage.requests, 0);
    }
}
