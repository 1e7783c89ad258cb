//! # tollgate
//!
//! Usage governance for chat-completion services: per-model pricing, a
//! persistent usage ledger with minute, daily, monthly and lifetime scopes,
//! quota-based admission control, and streaming sessions that are admitted
//! before they start and billed exactly once when they settle.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tollgate::{GenerateOptions, Governor, GovernorConfig, StreamEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tollgate::Error> {
//!     let governor = Governor::from_config(GovernorConfig::default().with_env()).await?;
//!
//!     let mut handle = governor
//!         .start_stream("conversation-1", "Summarize the release notes", None)
//!         .await?;
//!     while let Some(event) = handle.next_event().await {
//!         match event {
//!             StreamEvent::Chunk { delta, .. } => print!("{}", delta),
//!             StreamEvent::Settled { cost, .. } => println!("\ncost: ${}", cost),
//!             StreamEvent::Error { kind, message, .. } => eprintln!("{}: {}", kind, message),
//!         }
//!     }
//!
//!     let stats = governor.get_usage_stats().await?;
//!     println!("requests today: {}", stats.daily.usage.requests);
//!
//!     let _ = governor
//!         .generate("conversation-1", "One more question", None, GenerateOptions::single())
//!         .await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod admission;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod governor;
pub mod ledger;
pub mod observability;
pub mod pricing;
pub mod quota;
pub mod store;
pub mod stream;
pub mod types;

use std::time::Duration;

pub use admission::{
    Admission, AdmissionContext, AdmissionController, AdmissionDecision, AdmissionRequest, Denial,
};
pub use client::{ClientConfig, ClientError, CompletionTransport, HttpTransport};
pub use config::{ConfigError, EnvOverrides, GovernorConfig};
pub use coordinator::{
    CompletionResult, CoordinatorSettings, DefaultMessageBuilder, GenerateOptions, Generation,
    MessageBuilder, StreamEvent, StreamHandle, StreamingCoordinator,
};
pub use governor::{Governor, GovernorBuilder};
pub use ledger::{
    Clock, HeuristicEstimator, LedgerHandle, ManualClock, Period, PeriodStats, ResetScope,
    SystemClock, TokenEstimator, UsageLedger, UsageStats,
};
pub use observability::{MetricsRegistry, MetricsSummary};
pub use pricing::{ModelPricing, PricingError, PricingTable, PricingTableBuilder};
pub use quota::{MinuteLimits, PeriodLimits, QuotaPolicy, QuotaPolicyPatch};
pub use store::{FileStore, KeyValueStore, KeyValueStoreExt, MemoryStore, StoreError};
pub use stream::{StreamId, StreamInfo, StreamRegistry, StreamState, TransitionError};
pub use types::{FailureKind, Message, Role, Usage};

/// Error type for tollgate operations.
///
/// Admission denials surface here only on the non-streaming path; streams
/// report them as a terminal [`StreamEvent::Error`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Request refused by admission control.
    #[error("Request denied: {0}")]
    Denied(Denial),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A session was driven through an illegal state change.
    #[error("Invalid stream transition: {0}")]
    Transition(#[from] TransitionError),

    /// The ledger task has stopped; no usage can be checked or recorded.
    #[error("Usage ledger unavailable")]
    LedgerUnavailable,
}

impl Error {
    /// Machine-readable kind for denials and service failures.
    ///
    /// Local faults (configuration, internal state) have no kind.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Error::Denied(denial) => Some(denial.kind),
            Error::Client(e) => Some(e.kind()),
            Error::Config(_) | Error::Transition(_) | Error::LedgerUnavailable => None,
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Error::Denied(_))
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_some_and(|kind| kind.is_retryable())
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Denied(denial) => denial.retry_after.map(Duration::from_secs),
            Error::Client(e) => e.retry_after(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_kind_and_retry_after() {
        let err = Error::Denied(Denial {
            kind: FailureKind::Rate,
            message: "Rate limit exceeded. Try again in 12 seconds.".into(),
            retry_after: Some(12),
        });
        assert_eq!(err.kind(), Some(FailureKind::Rate));
        assert!(err.is_denied());
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
        assert!(err.to_string().contains("Try again in 12 seconds"));
    }

    #[test]
    fn test_client_error_kind() {
        let err: Error = ClientError::from_status(401, "bad key".into(), None).into();
        assert_eq!(err.kind(), Some(FailureKind::Auth));
        assert!(!err.is_retryable());

        let err: Error =
            ClientError::from_status(429, "slow down".into(), Some(Duration::from_secs(3))).into();
        assert_eq!(err.kind(), Some(FailureKind::RemoteOverload));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_local_faults_have_no_kind() {
        assert_eq!(Error::LedgerUnavailable.kind(), None);
        assert!(!Error::LedgerUnavailable.is_retryable());

        let err: Error = TransitionError::Illegal {
            from: StreamState::Succeeded,
            to: StreamState::Streaming,
        }
        .into();
        assert_eq!(err.kind(), None);
        assert_eq!(err.retry_after(), None);
    }
}
