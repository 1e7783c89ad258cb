//! Single-owner ledger task.
//!
//! All ledger and policy access goes through one mpsc queue consumed by one
//! task, so admission reads and usage writes never interleave their
//! read-modify-write. Each mutation is persisted before the next command is
//! taken; persistence failures are logged and the in-memory state stays
//! authoritative.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};

use super::book::{ResetScope, UsageLedger};
use super::clock::Clock;
use super::estimate::TokenEstimator;
use super::stats::{Period, PeriodStats, UsageStats};
use crate::admission::{
    AdmissionContext, AdmissionController, AdmissionDecision, AdmissionRequest,
};
use crate::observability::ledger_record_span;
use crate::pricing::PricingTable;
use crate::quota::{QuotaPolicy, QuotaPolicyPatch};
use crate::store::{KeyValueStore, KeyValueStoreExt};
use crate::types::Usage;
use crate::{Error, Result};

pub const LEDGER_KEY: &str = "usage_ledger";
pub const POLICY_KEY: &str = "quota_policy";

const COMMAND_BUFFER: usize = 64;

/// Usage and cost as written to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedUsage {
    pub usage: Usage,
    pub cost: Decimal,
}

/// Start-up inputs for the ledger task.
pub struct LedgerOptions {
    pub policy: QuotaPolicy,
    pub pricing: PricingTable,
    pub estimator: Arc<dyn TokenEstimator>,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn KeyValueStore>,
}

enum Command {
    Admit {
        request: AdmissionRequest,
        reply: oneshot::Sender<AdmissionDecision>,
    },
    Record {
        model: String,
        usage: Usage,
        reply: oneshot::Sender<RecordedUsage>,
    },
    Stats {
        reply: oneshot::Sender<UsageStats>,
    },
    PeriodStats {
        period: Period,
        reply: oneshot::Sender<PeriodStats>,
    },
    Policy {
        reply: oneshot::Sender<QuotaPolicy>,
    },
    UpdatePolicy {
        patch: QuotaPolicyPatch,
        reply: oneshot::Sender<QuotaPolicy>,
    },
    Reset {
        scope: ResetScope,
        reply: oneshot::Sender<()>,
    },
    Export {
        reply: oneshot::Sender<UsageLedger>,
    },
    Import {
        snapshot: Box<UsageLedger>,
        reply: oneshot::Sender<()>,
    },
    ReloadPricing {
        pricing: PricingTable,
        reply: oneshot::Sender<()>,
    },
    Rollover {
        reply: oneshot::Sender<bool>,
    },
}

/// Cloneable handle to the ledger task.
///
/// Every method fails with [`Error::LedgerUnavailable`] once the task is gone.
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    tx: mpsc::Sender<Command>,
}

impl LedgerHandle {
    /// Loads the persisted ledger and policy, then starts the ledger task.
    ///
    /// A persisted policy takes precedence over `options.policy`. Unreadable
    /// snapshots are logged and replaced with empty state.
    pub async fn spawn(options: LedgerOptions) -> Self {
        let LedgerOptions {
            policy,
            pricing,
            estimator,
            clock,
            store,
        } = options;

        let ledger = match store.get::<UsageLedger>(LEDGER_KEY).await {
            Ok(Some(mut ledger)) => {
                ledger.normalize(clock.as_ref());
                ledger
            }
            Ok(None) => UsageLedger::new(clock.as_ref()),
            Err(e) => {
                tracing::warn!(
                    store = store.name(),
                    error = %e,
                    "unreadable usage ledger, starting empty"
                );
                UsageLedger::new(clock.as_ref())
            }
        };

        let policy = match store.get::<QuotaPolicy>(POLICY_KEY).await {
            Ok(Some(saved)) => saved.sanitized(),
            Ok(None) => policy.sanitized(),
            Err(e) => {
                tracing::warn!(
                    store = store.name(),
                    error = %e,
                    "unreadable quota policy, using configured policy"
                );
                policy.sanitized()
            }
        };

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let actor = LedgerActor {
            ledger,
            policy,
            pricing,
            estimator,
            clock,
            store,
            rx,
        };
        tokio::spawn(actor.run());

        Self { tx }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| Error::LedgerUnavailable)?;
        rx.await.map_err(|_| Error::LedgerUnavailable)
    }

    pub async fn check_admission(&self, request: AdmissionRequest) -> Result<AdmissionDecision> {
        self.request(|reply| Command::Admit { request, reply }).await
    }

    /// Records one request's usage and returns the cost charged for it.
    pub async fn record(&self, model: impl Into<String>, usage: Usage) -> Result<RecordedUsage> {
        let model = model.into();
        self.request(|reply| Command::Record {
            model,
            usage,
            reply,
        })
        .await
    }

    pub async fn stats(&self) -> Result<UsageStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    pub async fn period_stats(&self, period: Period) -> Result<PeriodStats> {
        self.request(|reply| Command::PeriodStats { period, reply })
            .await
    }

    pub async fn policy(&self) -> Result<QuotaPolicy> {
        self.request(|reply| Command::Policy { reply }).await
    }

    /// Applies a partial policy update and returns the resulting policy.
    pub async fn update_policy(&self, patch: QuotaPolicyPatch) -> Result<QuotaPolicy> {
        self.request(|reply| Command::UpdatePolicy { patch, reply })
            .await
    }

    pub async fn reset(&self, scope: ResetScope) -> Result<()> {
        self.request(|reply| Command::Reset { scope, reply }).await
    }

    pub async fn export(&self) -> Result<UsageLedger> {
        self.request(|reply| Command::Export { reply }).await
    }

    pub async fn import(&self, snapshot: UsageLedger) -> Result<()> {
        self.request(|reply| Command::Import {
            snapshot: Box::new(snapshot),
            reply,
        })
        .await
    }

    pub async fn reload_pricing(&self, pricing: PricingTable) -> Result<()> {
        self.request(|reply| Command::ReloadPricing { pricing, reply })
            .await
    }

    /// Forces a period rollover check. Returns true if a scope was reset.
    pub async fn rollover(&self) -> Result<bool> {
        self.request(|reply| Command::Rollover { reply }).await
    }
}

struct LedgerActor {
    ledger: UsageLedger,
    policy: QuotaPolicy,
    pricing: PricingTable,
    estimator: Arc<dyn TokenEstimator>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,
    rx: mpsc::Receiver<Command>,
}

impl LedgerActor {
    async fn run(mut self) {
        tracing::debug!(store = self.store.name(), "ledger task started");
        while let Some(command) = self.rx.recv().await {
            self.handle(command).await;
        }
        tracing::debug!("ledger task stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Admit { request, reply } => {
                let rolled = self.ledger.rollover_if_needed(self.clock.as_ref());
                let decision = AdmissionController::new().check(
                    AdmissionContext {
                        ledger: &mut self.ledger,
                        policy: &self.policy,
                        pricing: &self.pricing,
                        estimator: self.estimator.as_ref(),
                        clock: self.clock.as_ref(),
                    },
                    &request,
                );
                if rolled {
                    self.persist_ledger().await;
                }
                let _ = reply.send(decision);
            }
            Command::Record {
                model,
                usage,
                reply,
            } => {
                let recorded = self.record(&model, usage);
                self.persist_ledger().await;
                let _ = reply.send(recorded);
            }
            Command::Stats { reply } => {
                self.rollover_and_persist().await;
                let stats = UsageStats::compute(&self.ledger, &self.policy, self.clock.now());
                let _ = reply.send(stats);
            }
            Command::PeriodStats { period, reply } => {
                self.rollover_and_persist().await;
                let _ = reply.send(PeriodStats::compute(&self.ledger, &self.policy, period));
            }
            Command::Policy { reply } => {
                let _ = reply.send(self.policy.clone());
            }
            Command::UpdatePolicy { patch, reply } => {
                self.policy.apply(&patch);
                tracing::info!(policy = ?self.policy, "quota policy updated");
                if let Err(e) = self.store.set(POLICY_KEY, &self.policy).await {
                    tracing::warn!(error = %e, "failed to persist quota policy");
                }
                let _ = reply.send(self.policy.clone());
            }
            Command::Reset { scope, reply } => {
                self.ledger.reset(scope, self.clock.as_ref());
                tracing::info!(?scope, "usage reset");
                self.persist_ledger().await;
                let _ = reply.send(());
            }
            Command::Export { reply } => {
                self.rollover_and_persist().await;
                let _ = reply.send(self.ledger.clone());
            }
            Command::Import { snapshot, reply } => {
                let mut ledger = *snapshot;
                ledger.normalize(self.clock.as_ref());
                self.ledger = ledger;
                self.persist_ledger().await;
                let _ = reply.send(());
            }
            Command::ReloadPricing { pricing, reply } => {
                tracing::info!(models = pricing.len(), "pricing table reloaded");
                self.pricing = pricing;
                let _ = reply.send(());
            }
            Command::Rollover { reply } => {
                let rolled = self.rollover_and_persist().await;
                let _ = reply.send(rolled);
            }
        }
    }

    fn record(&mut self, model: &str, usage: Usage) -> RecordedUsage {
        let span = ledger_record_span(model, &usage);
        let _enter = span.enter();

        let cost = self
            .pricing
            .cost(model, usage.prompt_tokens, usage.completion_tokens);
        self.ledger.record(model, &usage, cost, self.clock.as_ref());
        span.record("cost", tracing::field::display(cost));
        tracing::debug!(
            daily_tokens = self.ledger.daily().usage.tokens.total(),
            daily_requests = self.ledger.daily().usage.requests,
            "usage recorded"
        );

        RecordedUsage { usage, cost }
    }

    async fn rollover_and_persist(&mut self) -> bool {
        let rolled = self.ledger.rollover_if_needed(self.clock.as_ref());
        if rolled {
            self.persist_ledger().await;
        }
        rolled
    }

    async fn persist_ledger(&self) {
        if let Err(e) = self.store.set(LEDGER_KEY, &self.ledger).await {
            tracing::warn!(
                store = self.store.name(),
                error = %e,
                "failed to persist usage ledger"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{HeuristicEstimator, ManualClock};
    use crate::pricing::ModelPricing;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 8, 20, 12, 0, 0).unwrap(),
        ))
    }

    async fn spawn(
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        policy: QuotaPolicy,
    ) -> LedgerHandle {
        LedgerHandle::spawn(LedgerOptions {
            policy,
            pricing: PricingTable::builder()
                .model("m", ModelPricing::new(dec!(0.03), dec!(0.06), 8_192))
                .build(),
            estimator: Arc::new(HeuristicEstimator),
            clock,
            store,
        })
        .await
    }

    #[tokio::test]
    async fn test_record_returns_cost_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let handle = spawn(store.clone(), clock(), QuotaPolicy::unlimited()).await;

        let recorded = handle.record("m", Usage::new(1000, 500)).await.unwrap();
        assert_eq!(recorded.cost, dec!(0.06));

        let saved: UsageLedger = store.get(LEDGER_KEY).await.unwrap().unwrap();
        assert_eq!(saved.daily().usage.tokens.total(), 1500);
    }

    #[tokio::test]
    async fn test_concurrent_records_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let handle = spawn(store, clock(), QuotaPolicy::unlimited()).await;

        let a = handle.clone();
        let b = handle.clone();
        let (ra, rb) = tokio::join!(
            a.record("m", Usage::new(100, 0)),
            b.record("m", Usage::new(100, 0))
        );
        ra.unwrap();
        rb.unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.daily.usage.tokens.total(), 200);
        assert_eq!(stats.daily.usage.requests, 2);
    }

    #[tokio::test]
    async fn test_policy_update_persists_and_reloads() {
        let store = Arc::new(MemoryStore::new());
        let clock = clock();
        let handle = spawn(store.clone(), clock.clone(), QuotaPolicy::unlimited()).await;

        let policy = handle
            .update_policy(QuotaPolicyPatch::new().daily_requests(Some(1)))
            .await
            .unwrap();
        assert_eq!(policy.daily.requests, Some(1));

        let reopened = spawn(store, clock, QuotaPolicy::unlimited()).await;
        assert_eq!(reopened.policy().await.unwrap().daily.requests, Some(1));
    }

    #[tokio::test]
    async fn test_ledger_survives_restart() {
        let store = Arc::new(MemoryStore::new());
        let clock = clock();
        let handle = spawn(store.clone(), clock.clone(), QuotaPolicy::unlimited()).await;
        handle.record("m", Usage::new(3, 4)).await.unwrap();

        let reopened = spawn(store, clock, QuotaPolicy::unlimited()).await;
        let exported = reopened.export().await.unwrap();
        assert_eq!(exported, handle.export().await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_starts_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set_raw(LEDGER_KEY, "{not json").await.unwrap();

        let handle = spawn(store, clock(), QuotaPolicy::unlimited()).await;
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.lifetime.usage.requests, 0);
    }

    #[tokio::test]
    async fn test_reload_pricing_changes_cost() {
        let handle = spawn(Arc::new(MemoryStore::new()), clock(), QuotaPolicy::unlimited()).await;
        handle
            .reload_pricing(
                PricingTable::builder()
                    .model("m", ModelPricing::new(dec!(1), dec!(1), 8_192))
                    .build(),
            )
            .await
            .unwrap();

        let recorded = handle.record("m", Usage::new(1000, 1000)).await.unwrap();
        assert_eq!(recorded.cost, dec!(2));
    }
}
