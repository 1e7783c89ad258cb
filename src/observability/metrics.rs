//! In-process outcome metrics.
//!
//! Plain atomics; a [`MetricsSummary`] is a point-in-time copy suitable for
//! logging or export.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::stream::StreamState;
use crate::types::FailureKind;

/// Monotonic event count.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Running count, total and maximum of stream wall-clock durations.
#[derive(Debug, Default)]
pub struct DurationStats {
    count: AtomicU64,
    total_us: AtomicU64,
    max_us: AtomicU64,
}

impl DurationStats {
    pub fn observe(&self, duration_ms: f64) {
        let micros = (duration_ms.max(0.0) * 1000.0) as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(micros, Ordering::Relaxed);
        self.max_us.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean_ms(&self) -> f64 {
        match self.count() {
            0 => 0.0,
            n => self.total_us.load(Ordering::Relaxed) as f64 / 1000.0 / n as f64,
        }
    }

    pub fn max_ms(&self) -> f64 {
        self.max_us.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

/// Stream and admission outcome counters.
///
/// Active streams are derived as started minus ended.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    streams_started: Counter,
    streams_succeeded: Counter,
    streams_aborted: Counter,
    failures: DashMap<FailureKind, Counter>,
    admissions_denied: Counter,
    frames_skipped: Counter,
    durations: DurationStats,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_denied(&self) {
        self.admissions_denied.inc();
    }

    pub fn record_stream_start(&self) {
        self.streams_started.inc();
    }

    /// Records a terminal state. Non-terminal states are ignored.
    pub fn record_stream_end(&self, state: &StreamState, duration_ms: f64) {
        match state {
            StreamState::Succeeded => self.streams_succeeded.inc(),
            StreamState::Aborted => self.streams_aborted.inc(),
            StreamState::Failed(kind) => self.failures.entry(*kind).or_default().inc(),
            other => {
                tracing::debug!(state = %other, "ignoring non-terminal stream end");
                return;
            }
        }
        self.durations.observe(duration_ms);
    }

    pub fn record_skipped_frames(&self, n: u64) {
        self.frames_skipped.add(n);
    }

    pub fn failures(&self, kind: FailureKind) -> u64 {
        self.failures.get(&kind).map(|c| c.get()).unwrap_or(0)
    }

    pub fn summary(&self) -> MetricsSummary {
        let failures_by_kind: HashMap<FailureKind, u64> = self
            .failures
            .iter()
            .map(|entry| (*entry.key(), entry.value().get()))
            .collect();
        let streams_failed: u64 = failures_by_kind.values().sum();
        let streams_succeeded = self.streams_succeeded.get();
        let streams_aborted = self.streams_aborted.get();
        let streams_started = self.streams_started.get();
        let ended = streams_succeeded + streams_aborted + streams_failed;

        MetricsSummary {
            streams_started,
            streams_succeeded,
            streams_aborted,
            streams_failed,
            failures_by_kind,
            admissions_denied: self.admissions_denied.get(),
            frames_skipped: self.frames_skipped.get(),
            active_streams: streams_started.saturating_sub(ended),
            avg_duration_ms: self.durations.mean_ms(),
            max_duration_ms: self.durations.max_ms(),
        }
    }
}

/// Snapshot of a [`MetricsRegistry`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSummary {
    pub streams_started: u64,
    pub streams_succeeded: u64,
    pub streams_aborted: u64,
    pub streams_failed: u64,
    pub failures_by_kind: HashMap<FailureKind, u64>,
    pub admissions_denied: u64,
    pub frames_skipped: u64,
    pub active_streams: u64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: f64,
}
