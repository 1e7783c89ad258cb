//! Events delivered to the caller of a streaming generation.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::stream::StreamId;
use crate::types::{FailureKind, Usage};

/// Per-session event. Chunk events arrive in order; exactly one terminal
/// event (`Settled` or `Error`) is always last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Chunk {
        stream_id: StreamId,
        delta: String,
        accumulated: String,
    },
    Settled {
        stream_id: StreamId,
        text: String,
        usage: Usage,
        cost: Decimal,
    },
    Error {
        stream_id: StreamId,
        kind: FailureKind,
        message: String,
        retry_after: Option<u64>,
    },
}

impl StreamEvent {
    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::Chunk { stream_id, .. }
            | Self::Settled { stream_id, .. }
            | Self::Error { stream_id, .. } => *stream_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }

    pub fn error_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Receiving end of one streaming session.
#[derive(Debug)]
pub struct StreamHandle {
    id: StreamId,
    events: mpsc::UnboundedReceiver<StreamEvent>,
}

impl StreamHandle {
    pub(crate) fn new(id: StreamId, events: mpsc::UnboundedReceiver<StreamEvent>) -> Self {
        Self { id, events }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Next event, or `None` after the terminal event has been taken.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Drains events until the terminal one, which is returned with the
    /// chunks that preceded it.
    pub async fn drain(mut self) -> (Vec<StreamEvent>, Option<StreamEvent>) {
        let mut chunks = Vec::new();
        while let Some(event) = self.events.recv().await {
            if event.is_terminal() {
                return (chunks, Some(event));
            }
            chunks.push(event);
        }
        (chunks, None)
    }
}

impl Stream for StreamHandle {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}
