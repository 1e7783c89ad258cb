//! Stream session and its state machine.
//!
//! ```text
//! Created -> Admitted -> Connecting -> Streaming -> Settling -> Succeeded
//!                            |  \                      |    \-> Aborted
//!                            |   \-> Settling          \-----> Failed
//!                            \-> Failed
//! ```
//!
//! Transitions are forward-only; anything else is rejected with a
//! [`TransitionError`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::types::{FailureKind, Usage};

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    #[default]
    Created,
    Admitted,
    Connecting,
    Streaming,
    Settling,
    Succeeded,
    Aborted,
    Failed(FailureKind),
}

impl StreamState {
    pub fn can_transition(&self, next: &StreamState) -> bool {
        use StreamState::*;
        matches!(
            (self, next),
            (Created, Admitted)
                | (Admitted, Connecting)
                | (Connecting, Streaming)
                | (Connecting, Settling)
                | (Connecting, Failed(_))
                | (Streaming, Settling)
                | (Settling, Succeeded)
                | (Settling, Aborted)
                | (Settling, Failed(_))
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Aborted | Self::Failed(_))
    }

    /// Settling and terminal sessions ignore further cancellation or timeout.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settling) || self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Admitted => "admitted",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Settling => "settling",
            Self::Succeeded => "succeeded",
            Self::Aborted => "aborted",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "failed({kind})"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Illegal stream transition {from} -> {to}")]
    Illegal { from: StreamState, to: StreamState },

    #[error("Unknown stream: {0}")]
    UnknownStream(StreamId),
}

/// One in-flight completion request.
#[derive(Debug)]
pub struct StreamSession {
    id: StreamId,
    owner_id: String,
    token: CancellationToken,
    state: StreamState,
    accumulated_text: String,
    estimated_usage: Usage,
    actual_usage: Option<Usage>,
    chunks: u64,
    started_at: DateTime<Utc>,
}

impl StreamSession {
    pub fn new(owner_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: StreamId::new(),
            owner_id: owner_id.into(),
            token: CancellationToken::new(),
            state: StreamState::Created,
            accumulated_text: String::new(),
            estimated_usage: Usage::default(),
            actual_usage: None,
            chunks: 0,
            started_at,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    pub fn estimated_usage(&self) -> Usage {
        self.estimated_usage
    }

    pub fn actual_usage(&self) -> Option<Usage> {
        self.actual_usage
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn transition(&mut self, next: StreamState) -> Result<StreamState, TransitionError> {
        if !self.state.can_transition(&next) {
            return Err(TransitionError::Illegal {
                from: self.state,
                to: next,
            });
        }
        let previous = std::mem::replace(&mut self.state, next);
        tracing::debug!(stream_id = %self.id, from = %previous, to = %next, "stream transition");
        Ok(previous)
    }

    /// Moves to Admitted with the admission estimate attached.
    pub fn admit(&mut self, estimated_usage: Usage) -> Result<(), TransitionError> {
        self.transition(StreamState::Admitted)?;
        self.estimated_usage = estimated_usage;
        Ok(())
    }

    pub fn append(&mut self, delta: &str) -> &str {
        self.accumulated_text.push_str(delta);
        self.chunks += 1;
        &self.accumulated_text
    }

    /// Replaces the estimate with usage reported by the service.
    pub fn set_actual_usage(&mut self, usage: Usage) {
        self.actual_usage = Some(usage);
    }

    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            id: self.id,
            owner_id: self.owner_id.clone(),
            state: self.state,
            started_at: self.started_at,
        }
    }
}

/// Read-only view of a registered session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub id: StreamId,
    pub owner_id: String,
    pub state: StreamState,
    pub started_at: DateTime<Utc>,
}
