//! Streaming completion coordinator.
//!
//! Orchestrates one generation end to end: message assembly, admission,
//! transport, incremental decoding, ledger settlement and event emission.
//! Denied requests never open a transport. Streaming sessions emit chunk
//! events followed by exactly one terminal event; the coordinator never
//! retries on its own.

mod events;
mod prompt;
mod task;

pub use events::{StreamEvent, StreamHandle};
pub use prompt::{DefaultMessageBuilder, MessageBuilder};

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::admission::{AdmissionDecision, AdmissionRequest};
use crate::client::{CompletionRequest, CompletionTransport};
use crate::ledger::{Clock, LedgerHandle, TokenEstimator};
use crate::observability::{MetricsRegistry, StreamSpan};
use crate::stream::{StreamId, StreamInfo, StreamRegistry, StreamSession};
use crate::types::{Usage, prompt_text};
use crate::{Error, Result};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_COMPLETION_TOKENS: u32 = 1024;

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub model: String,
    /// Sent as `max_tokens` and used as the completion estimate at admission
    pub max_completion_tokens: u32,
    /// Longest silence tolerated while connecting or streaming
    pub idle_timeout: Duration,
}

impl CoordinatorSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_completion_tokens: DEFAULT_MAX_COMPLETION_TOKENS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerateOptions {
    pub streaming: bool,
}

impl GenerateOptions {
    pub fn streaming() -> Self {
        Self { streaming: true }
    }

    pub fn single() -> Self {
        Self { streaming: false }
    }
}

/// Result of a non-streaming generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub text: String,
    pub usage: Usage,
    pub cost: Decimal,
    pub model: String,
}

#[derive(Debug)]
pub enum Generation {
    Complete(CompletionResult),
    Stream(StreamHandle),
}

impl Generation {
    pub fn into_stream(self) -> Option<StreamHandle> {
        match self {
            Self::Stream(handle) => Some(handle),
            Self::Complete(_) => None,
        }
    }

    pub fn into_complete(self) -> Option<CompletionResult> {
        match self {
            Self::Complete(result) => Some(result),
            Self::Stream(_) => None,
        }
    }
}

/// Collaborators shared by the coordinator and its session tasks.
pub(crate) struct Shared {
    pub(crate) ledger: LedgerHandle,
    pub(crate) transport: Arc<dyn CompletionTransport>,
    pub(crate) registry: StreamRegistry,
    pub(crate) estimator: Arc<dyn TokenEstimator>,
    pub(crate) metrics: Arc<MetricsRegistry>,
    pub(crate) settings: CoordinatorSettings,
}

#[derive(Clone)]
pub struct StreamingCoordinator {
    shared: Arc<Shared>,
    builder: Arc<dyn MessageBuilder>,
    clock: Arc<dyn Clock>,
}

impl StreamingCoordinator {
    pub fn new(
        ledger: LedgerHandle,
        transport: Arc<dyn CompletionTransport>,
        builder: Arc<dyn MessageBuilder>,
        estimator: Arc<dyn TokenEstimator>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsRegistry>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                ledger,
                transport,
                registry: StreamRegistry::new(),
                estimator,
                metrics,
                settings,
            }),
            builder,
            clock,
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.shared.settings
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.shared.registry
    }

    pub async fn generate(
        &self,
        conversation_id: &str,
        user_message: &str,
        context: Option<&str>,
        options: GenerateOptions,
    ) -> Result<Generation> {
        if options.streaming {
            self.start_stream(conversation_id, user_message, context)
                .await
                .map(Generation::Stream)
        } else {
            self.complete(conversation_id, user_message, context)
                .await
                .map(Generation::Complete)
        }
    }

    /// Starts a streaming session.
    ///
    /// A denial is delivered as the handle's single terminal event. Only a
    /// lost ledger task is reported as an `Err`.
    pub async fn start_stream(
        &self,
        conversation_id: &str,
        user_message: &str,
        context: Option<&str>,
    ) -> Result<StreamHandle> {
        let settings = &self.shared.settings;
        let messages = self.builder.build(conversation_id, user_message, context);
        let prompt = prompt_text(&messages);

        let decision = self
            .shared
            .ledger
            .check_admission(AdmissionRequest::new(
                settings.model.clone(),
                prompt.clone(),
                u64::from(settings.max_completion_tokens),
            ))
            .await?;

        let mut session = StreamSession::new(conversation_id, self.clock.now());
        let (tx, rx) = mpsc::unbounded_channel();

        let admission = match decision {
            AdmissionDecision::Allow(admission) => admission,
            AdmissionDecision::Deny(denial) => {
                tracing::info!(
                    conversation_id,
                    kind = %denial.kind,
                    "stream denied at admission"
                );
                self.shared.metrics.record_denied();
                let _ = tx.send(StreamEvent::Error {
                    stream_id: session.id(),
                    kind: denial.kind,
                    message: denial.message,
                    retry_after: denial.retry_after,
                });
                return Ok(StreamHandle::new(session.id(), rx));
            }
        };

        session.admit(Usage::new(
            admission.prompt_tokens,
            u64::from(settings.max_completion_tokens),
        ))?;
        let (id, token) = self.shared.registry.register(session);
        self.shared.metrics.record_stream_start();

        let span = StreamSpan::new(conversation_id, &id.to_string(), &settings.model);
        let instrument = span.span().clone();
        let request = CompletionRequest::new(settings.model.clone(), messages)
            .max_tokens(settings.max_completion_tokens)
            .streaming();
        tracing::info!(stream_id = %id, conversation_id, "stream started");

        let run = task::SessionTask {
            shared: Arc::clone(&self.shared),
            id,
            token,
            request,
            prompt,
            events: tx,
            span,
        };
        tokio::spawn(run.run().instrument(instrument));

        Ok(StreamHandle::new(id, rx))
    }

    /// Non-streaming path: admission, one request, usage recorded from the
    /// service's report (or the estimate when it sends none).
    async fn complete(
        &self,
        conversation_id: &str,
        user_message: &str,
        context: Option<&str>,
    ) -> Result<CompletionResult> {
        let settings = &self.shared.settings;
        let messages = self.builder.build(conversation_id, user_message, context);
        let prompt = prompt_text(&messages);

        let decision = self
            .shared
            .ledger
            .check_admission(AdmissionRequest::new(
                settings.model.clone(),
                prompt.clone(),
                u64::from(settings.max_completion_tokens),
            ))
            .await?;
        if let AdmissionDecision::Deny(denial) = decision {
            self.shared.metrics.record_denied();
            return Err(Error::Denied(denial));
        }

        let request = CompletionRequest::new(settings.model.clone(), messages)
            .max_tokens(settings.max_completion_tokens);
        let response = self.shared.transport.complete(&request).await?;

        let text = response.text().to_string();
        let usage = response.usage.unwrap_or_else(|| {
            tracing::debug!("response carried no usage, estimating");
            Usage::new(
                self.shared.estimator.estimate(&prompt),
                self.shared.estimator.estimate(&text),
            )
        });
        let recorded = self.shared.ledger.record(settings.model.clone(), usage).await?;

        Ok(CompletionResult {
            text,
            usage: recorded.usage,
            cost: recorded.cost,
            model: response.model.unwrap_or_else(|| settings.model.clone()),
        })
    }

    /// Requests cancellation of a live stream.
    pub fn cancel_stream(&self, id: StreamId) -> bool {
        self.shared.registry.cancel(id)
    }

    pub fn cancel_all(&self) -> usize {
        self.shared.registry.cancel_all()
    }

    pub fn active_streams(&self) -> Vec<StreamInfo> {
        self.shared.registry.active_streams()
    }
}
