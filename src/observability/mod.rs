//! Observability: structured tracing spans and in-process outcome metrics.
//!
//! Enable the `subscriber` feature for a ready-made `tracing` subscriber that
//! honours `RUST_LOG`:
//!
//! ```rust,ignore
//! tollgate::observability::init_tracing("tollgate=info");
//! ```

mod metrics;
mod spans;

pub use metrics::{Counter, DurationStats, MetricsRegistry, MetricsSummary};
pub use spans::{StreamSpan, ledger_record_span};

/// Installs a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Returns false if a subscriber was already installed.
#[cfg(feature = "subscriber")]
pub fn init_tracing(default_filter: &str) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(all(test, feature = "subscriber"))]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice() {
        let _ = init_tracing("debug");
        assert!(!init_tracing("debug"));
    }
}
