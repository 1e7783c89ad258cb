//! Top-level facade wiring the ledger, admission and streaming together.

use std::path::Path;
use std::sync::Arc;

use crate::admission::{AdmissionDecision, AdmissionRequest};
use crate::client::{CompletionTransport, HttpTransport};
use crate::config::GovernorConfig;
use crate::coordinator::{
    CoordinatorSettings, DefaultMessageBuilder, GenerateOptions, Generation, MessageBuilder,
    StreamHandle, StreamingCoordinator,
};
use crate::ledger::{
    Clock, HeuristicEstimator, LedgerHandle, LedgerOptions, Period, PeriodStats, ResetScope,
    SystemClock, TokenEstimator, UsageLedger, UsageStats,
};
use crate::observability::{MetricsRegistry, MetricsSummary};
use crate::pricing::PricingTable;
use crate::quota::{QuotaPolicy, QuotaPolicyPatch};
use crate::store::{FileStore, KeyValueStore, MemoryStore};
use crate::stream::{StreamId, StreamInfo};
use crate::Result;

/// Usage-governed access to a chat-completion service.
///
/// Cheap to clone; clones share the same ledger and stream registry.
#[derive(Clone)]
pub struct Governor {
    ledger: LedgerHandle,
    coordinator: StreamingCoordinator,
    metrics: Arc<MetricsRegistry>,
}

impl Governor {
    pub fn builder() -> GovernorBuilder {
        GovernorBuilder::default()
    }

    /// Builds a governor from configuration with the default collaborators.
    pub async fn from_config(config: GovernorConfig) -> Result<Self> {
        Self::builder().config(config).build().await
    }

    /// Loads a JSON config file, applies `TOLLGATE_*` overrides and builds.
    ///
    /// A missing file yields the defaults; an unreadable or malformed one is
    /// an [`Error::Config`](crate::Error::Config).
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let config = GovernorConfig::load(path)?.with_env();
        Self::from_config(config).await
    }

    pub async fn check_admission(
        &self,
        model: impl Into<String>,
        prompt_text: impl Into<String>,
        estimated_completion_tokens: u64,
    ) -> Result<AdmissionDecision> {
        self.ledger
            .check_admission(AdmissionRequest::new(
                model,
                prompt_text,
                estimated_completion_tokens,
            ))
            .await
    }

    pub async fn start_stream(
        &self,
        conversation_id: &str,
        user_message: &str,
        context: Option<&str>,
    ) -> Result<StreamHandle> {
        self.coordinator
            .start_stream(conversation_id, user_message, context)
            .await
    }

    pub async fn generate(
        &self,
        conversation_id: &str,
        user_message: &str,
        context: Option<&str>,
        options: GenerateOptions,
    ) -> Result<Generation> {
        self.coordinator
            .generate(conversation_id, user_message, context, options)
            .await
    }

    /// Returns false when the stream is unknown or already settled.
    pub fn cancel_stream(&self, id: StreamId) -> bool {
        self.coordinator.cancel_stream(id)
    }

    pub fn cancel_all(&self) -> usize {
        self.coordinator.cancel_all()
    }

    pub fn active_streams(&self) -> Vec<StreamInfo> {
        self.coordinator.active_streams()
    }

    pub async fn get_usage_stats(&self) -> Result<UsageStats> {
        self.ledger.stats().await
    }

    pub async fn period_stats(&self, period: Period) -> Result<PeriodStats> {
        self.ledger.period_stats(period).await
    }

    pub async fn quota_policy(&self) -> Result<QuotaPolicy> {
        self.ledger.policy().await
    }

    pub async fn update_quota_policy(&self, patch: QuotaPolicyPatch) -> Result<QuotaPolicy> {
        self.ledger.update_policy(patch).await
    }

    pub async fn reset_usage(&self, scope: ResetScope) -> Result<()> {
        self.ledger.reset(scope).await
    }

    pub async fn export_ledger(&self) -> Result<UsageLedger> {
        self.ledger.export().await
    }

    pub async fn import_ledger(&self, snapshot: UsageLedger) -> Result<()> {
        self.ledger.import(snapshot).await
    }

    pub async fn reload_pricing(&self, pricing: PricingTable) -> Result<()> {
        self.ledger.reload_pricing(pricing).await
    }

    pub fn ledger(&self) -> &LedgerHandle {
        &self.ledger
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.metrics.summary()
    }
}

impl std::fmt::Debug for Governor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Governor")
            .field("settings", self.coordinator.settings())
            .field("active_streams", &self.coordinator.registry().len())
            .finish()
    }
}

/// Assembles a [`Governor`]. Every collaborator not set explicitly is
/// derived from the config.
#[derive(Default)]
pub struct GovernorBuilder {
    config: GovernorConfig,
    pricing: Option<PricingTable>,
    store: Option<Arc<dyn KeyValueStore>>,
    transport: Option<Arc<dyn CompletionTransport>>,
    clock: Option<Arc<dyn Clock>>,
    estimator: Option<Arc<dyn TokenEstimator>>,
    message_builder: Option<Arc<dyn MessageBuilder>>,
    metrics: Option<Arc<MetricsRegistry>>,
    settings: Option<CoordinatorSettings>,
    in_memory: bool,
}

impl GovernorBuilder {
    pub fn config(mut self, config: GovernorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = Some(pricing);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Keeps ledger state in memory only.
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn CompletionTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn message_builder(mut self, builder: Arc<dyn MessageBuilder>) -> Self {
        self.message_builder = Some(builder);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Overrides the model and timing settings derived from the config.
    pub fn coordinator_settings(mut self, settings: CoordinatorSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub async fn build(self) -> Result<Governor> {
        let config = self.config;

        let store: Arc<dyn KeyValueStore> = match self.store {
            Some(store) => store,
            None if self.in_memory => Arc::new(MemoryStore::new()),
            None => match config.store_path() {
                Some(path) => Arc::new(FileStore::new(path)),
                None => {
                    tracing::warn!("no data directory available, usage will not persist");
                    Arc::new(MemoryStore::new())
                }
            },
        };
        let transport: Arc<dyn CompletionTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(config.client_config())?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let estimator = self.estimator.unwrap_or_else(|| Arc::new(HeuristicEstimator));
        let builder = self.message_builder.unwrap_or_else(|| {
            let builder = match &config.system_prompt {
                Some(prompt) => DefaultMessageBuilder::new().system_prompt(prompt.clone()),
                None => DefaultMessageBuilder::new(),
            };
            Arc::new(builder)
        });
        let metrics = self.metrics.unwrap_or_default();
        let pricing = self.pricing.unwrap_or_else(|| config.pricing_table());

        tracing::debug!(
            store = store.name(),
            model = %config.model,
            "building governor"
        );

        let ledger = LedgerHandle::spawn(LedgerOptions {
            policy: config.quota.clone(),
            pricing,
            estimator: Arc::clone(&estimator),
            clock: Arc::clone(&clock),
            store,
        })
        .await;

        let coordinator = StreamingCoordinator::new(
            ledger.clone(),
            transport,
            builder,
            estimator,
            clock,
            Arc::clone(&metrics),
            self.settings.unwrap_or_else(|| config.coordinator_settings()),
        );

        Ok(Governor {
            ledger,
            coordinator,
            metrics,
        })
    }
}
