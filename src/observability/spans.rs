//! Structured span definitions for tracing.

use std::time::Instant;

use rust_decimal::Decimal;
use tracing::{Level, Span, field, span};

use crate::types::Usage;

/// Span covering one stream session, from admission to settlement.
pub struct StreamSpan {
    span: Span,
    start: Instant,
}

impl StreamSpan {
    pub fn new(conversation_id: &str, stream_id: &str, model: &str) -> Self {
        let span = span!(
            Level::INFO,
            "stream.session",
            conversation_id = conversation_id,
            stream_id = stream_id,
            model = model,
            outcome = field::Empty,
            prompt_tokens = field::Empty,
            completion_tokens = field::Empty,
            cost = field::Empty,
            chunks = field::Empty,
            duration_ms = field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
        }
    }

    pub fn record_usage(&self, usage: &Usage, cost: Decimal) {
        self.span.record("prompt_tokens", usage.prompt_tokens);
        self.span.record("completion_tokens", usage.completion_tokens);
        self.span.record("cost", field::display(cost));
    }

    pub fn record_chunks(&self, chunks: u64) {
        self.span.record("chunks", chunks);
    }

    /// Records the outcome and returns the elapsed time in milliseconds.
    pub fn finish(self, outcome: &str) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64() * 1000.0;
        self.span.record("outcome", outcome);
        self.span.record("duration_ms", elapsed as u64);
        elapsed
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

pub fn ledger_record_span(model: &str, usage: &Usage) -> Span {
    span!(
        Level::DEBUG,
        "ledger.record",
        model = model,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        cost = field::Empty,
    )
}
