//! Per-session run loop: connect, decode, settle.

use std::sync::Arc;

use futures::StreamExt;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::Shared;
use super::events::StreamEvent;
use crate::client::{ClientError, CompletionRequest, FrameDecoder, StreamItem};
use crate::observability::StreamSpan;
use crate::stream::{StreamId, StreamState};
use crate::types::{FailureKind, Usage};

/// How the decode loop ended.
enum Outcome {
    /// Sentinel or end of body
    Completed,
    /// Caller cancelled; `streamed` is true once the transport was open
    Cancelled { streamed: bool },
    Failed {
        kind: FailureKind,
        message: String,
        retry_after: Option<u64>,
    },
}

impl Outcome {
    fn from_client_error(e: &ClientError) -> Self {
        Self::Failed {
            kind: e.kind(),
            message: e.to_string(),
            retry_after: e.retry_after().map(|d| d.as_secs().max(1)),
        }
    }
}

pub(super) struct SessionTask {
    pub(super) shared: Arc<Shared>,
    pub(super) id: StreamId,
    pub(super) token: CancellationToken,
    pub(super) request: CompletionRequest,
    pub(super) prompt: String,
    pub(super) events: mpsc::UnboundedSender<StreamEvent>,
    pub(super) span: StreamSpan,
}

impl SessionTask {
    pub(super) async fn run(self) {
        if let Err(e) = self.shared.registry.transition(self.id, StreamState::Connecting) {
            tracing::error!(stream_id = %self.id, error = %e, "stream vanished before connecting");
            return;
        }

        let idle = self.shared.settings.idle_timeout;
        let opened = tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            opened = timeout(idle, self.shared.transport.open_stream(&self.request)) => Some(opened),
        };

        let body = match opened {
            None => {
                return self.settle(Outcome::Cancelled { streamed: false }).await;
            }
            Some(Err(_)) => {
                return self
                    .fail_connect(Outcome::Failed {
                        kind: FailureKind::Timeout,
                        message: format!("No response within {:?}", idle),
                        retry_after: None,
                    })
                    .await;
            }
            Some(Ok(Err(e))) => {
                return self.fail_connect(Outcome::from_client_error(&e)).await;
            }
            Some(Ok(Ok(body))) => body,
        };

        if let Err(e) = self.shared.registry.transition(self.id, StreamState::Streaming) {
            tracing::error!(stream_id = %self.id, error = %e, "stream transition rejected");
            return;
        }

        let mut frames = Box::pin(FrameDecoder::new(body));
        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => break Outcome::Cancelled { streamed: true },
                next = timeout(idle, frames.next()) => next,
            };

            match next {
                Err(_) => {
                    break Outcome::Failed {
                        kind: FailureKind::Timeout,
                        message: format!("No data received for {:?}", idle),
                        retry_after: None,
                    };
                }
                Ok(None) | Ok(Some(Ok(StreamItem::Done))) => break Outcome::Completed,
                Ok(Some(Ok(StreamItem::Delta(delta)))) => {
                    if let Some(accumulated) = self.shared.registry.append(self.id, &delta) {
                        let _ = self.events.send(StreamEvent::Chunk {
                            stream_id: self.id,
                            delta,
                            accumulated,
                        });
                    }
                }
                Ok(Some(Ok(StreamItem::Usage(usage)))) => {
                    self.shared.registry.set_actual_usage(self.id, usage);
                }
                Ok(Some(Err(e))) => break Outcome::from_client_error(&e),
            }
        };

        let skipped = frames.skipped_frames();
        if skipped > 0 {
            self.shared.metrics.record_skipped_frames(skipped);
        }
        // Dropping the decoder closes the response body.
        drop(frames);

        self.settle(outcome).await;
    }

    /// Connect-phase failure: nothing was generated, nothing is billed.
    async fn fail_connect(self, outcome: Outcome) {
        let (kind, message, retry_after) = match outcome {
            Outcome::Failed {
                kind,
                message,
                retry_after,
            } => (kind, message, retry_after),
            other => return self.settle(other).await,
        };

        let state = StreamState::Failed(kind);
        if let Err(e) = self.shared.registry.transition(self.id, state) {
            tracing::error!(stream_id = %self.id, error = %e, "stream transition rejected");
        }
        tracing::warn!(stream_id = %self.id, %kind, %message, "stream failed to connect");
        let _ = self.events.send(StreamEvent::Error {
            stream_id: self.id,
            kind,
            message,
            retry_after,
        });
        self.finish(state);
    }

    async fn settle(self, outcome: Outcome) {
        if let Err(e) = self.shared.registry.transition(self.id, StreamState::Settling) {
            tracing::error!(stream_id = %self.id, error = %e, "stream transition rejected");
            return;
        }

        let (text, actual) = self.shared.registry.progress(self.id).unwrap_or_default();
        let billable = match &outcome {
            Outcome::Completed => true,
            Outcome::Cancelled { streamed } => *streamed,
            Outcome::Failed { .. } => !text.is_empty(),
        };

        let usage = actual.unwrap_or_else(|| self.estimate(&text));
        let cost = if billable {
            match self
                .shared
                .ledger
                .record(self.request.model.clone(), usage)
                .await
            {
                Ok(recorded) => {
                    self.span.record_usage(&recorded.usage, recorded.cost);
                    recorded.cost
                }
                Err(e) => {
                    tracing::error!(
                        stream_id = %self.id,
                        error = %e,
                        "failed to record stream usage"
                    );
                    Decimal::ZERO
                }
            }
        } else {
            Decimal::ZERO
        };

        let (state, event) = match outcome {
            Outcome::Completed => (
                StreamState::Succeeded,
                StreamEvent::Settled {
                    stream_id: self.id,
                    text,
                    usage,
                    cost,
                },
            ),
            Outcome::Cancelled { .. } => (
                StreamState::Aborted,
                StreamEvent::Error {
                    stream_id: self.id,
                    kind: FailureKind::Cancelled,
                    message: "Stream cancelled".to_string(),
                    retry_after: None,
                },
            ),
            Outcome::Failed {
                kind,
                message,
                retry_after,
            } => (
                StreamState::Failed(kind),
                StreamEvent::Error {
                    stream_id: self.id,
                    kind,
                    message,
                    retry_after,
                },
            ),
        };

        if let Err(e) = self.shared.registry.transition(self.id, state) {
            tracing::error!(stream_id = %self.id, error = %e, "stream transition rejected");
        }
        tracing::info!(stream_id = %self.id, outcome = %state, billable, "stream settled");
        let _ = self.events.send(event);
        self.finish(state);
    }

    /// Fallback when the service never reported usage.
    fn estimate(&self, text: &str) -> Usage {
        let estimator = &self.shared.estimator;
        Usage::new(estimator.estimate(&self.prompt), estimator.estimate(text))
    }

    fn finish(self, state: StreamState) {
        let chunks = self
            .shared
            .registry
            .remove(self.id)
            .map(|s| s.chunks())
            .unwrap_or_default();
        self.span.record_chunks(chunks);
        let elapsed = self.span.finish(state.as_str());
        self.shared.metrics.record_stream_end(&state, elapsed);
    }
}
