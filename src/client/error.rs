//! Transport error classification.

use std::time::Duration;

use thiserror::Error;

use crate::types::FailureKind;

/// Failures talking to the completion service.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection, TLS, or I/O failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request exceeded its deadline
    #[error("Request timed out")]
    Timeout,

    /// Credentials missing or rejected
    #[error("Authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    /// Service is rate limiting or overloaded
    #[error("Service overloaded ({status}): {message}")]
    Overloaded {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Any other error reported by the service
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}

impl ClientError {
    /// Classifies a non-success HTTP status.
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => Self::Auth { status, message },
            429 | 503 | 529 => Self::Overloaded {
                status,
                message,
                retry_after,
            },
            _ => Self::Api { status, message },
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transport(_) => FailureKind::Transport,
            Self::Timeout => FailureKind::Timeout,
            Self::Auth { .. } => FailureKind::Auth,
            Self::Overloaded { .. } => FailureKind::RemoteOverload,
            Self::Api { .. } | Self::Decode(_) => FailureKind::RemoteError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Overloaded { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::from_status(status.as_u16(), e.to_string(), None)
        } else {
            Self::Transport(e.to_string())
        }
    }
}
