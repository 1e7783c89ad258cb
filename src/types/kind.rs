//! Machine-readable denial and failure kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of reasons a request is denied or a session fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Per-minute request limit reached
    Rate,
    DailyTokens,
    DailyRequests,
    DailyCost,
    MonthlyTokens,
    MonthlyRequests,
    MonthlyCost,
    /// Prompt exceeds the model's context window
    Context,
    /// Connection or I/O failure talking to the service
    Transport,
    /// Credentials rejected
    Auth,
    /// Service is rate limiting or overloaded
    RemoteOverload,
    /// Any other error reported by the service, including undecodable bodies
    RemoteError,
    /// No data within the inactivity window
    Timeout,
    /// Cancelled by the caller
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rate => "rate",
            Self::DailyTokens => "daily_tokens",
            Self::DailyRequests => "daily_requests",
            Self::DailyCost => "daily_cost",
            Self::MonthlyTokens => "monthly_tokens",
            Self::MonthlyRequests => "monthly_requests",
            Self::MonthlyCost => "monthly_cost",
            Self::Context => "context",
            Self::Transport => "transport",
            Self::Auth => "auth",
            Self::RemoteOverload => "remote_overload",
            Self::RemoteError => "remote_error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// True for quota and context denials produced before any transport is opened.
    pub fn is_admission_denial(&self) -> bool {
        matches!(
            self,
            Self::Rate
                | Self::DailyTokens
                | Self::DailyRequests
                | Self::DailyCost
                | Self::MonthlyTokens
                | Self::MonthlyRequests
                | Self::MonthlyCost
                | Self::Context
        )
    }

    /// Transient failures a caller may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Rate | Self::Transport | Self::RemoteOverload | Self::Timeout
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_matches_as_str() {
        for kind in [
            FailureKind::Rate,
            FailureKind::DailyTokens,
            FailureKind::MonthlyCost,
            FailureKind::RemoteOverload,
            FailureKind::Cancelled,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_classification() {
        assert!(FailureKind::Context.is_admission_denial());
        assert!(!FailureKind::Auth.is_admission_denial());
        assert!(FailureKind::Timeout.is_retryable());
        assert!(!FailureKind::Cancelled.is_retryable());
    }
}
