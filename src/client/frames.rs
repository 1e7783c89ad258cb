//! Incremental decoder for newline-delimited `data:` frames.
//!
//! Bytes are buffered and split on `\n`; an incomplete trailing line is kept
//! until the next read. Blank lines, `:` comments and non-`data` fields are
//! ignored. A malformed frame is skipped with a warning and decoding
//! continues.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;

use super::error::ClientError;
use super::wire::ChunkFrame;
use crate::types::Usage;

/// Payload that ends the body.
pub const DONE_SENTINEL: &str = "[DONE]";

const COMPACT_THRESHOLD: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// Incremental content
    Delta(String),
    /// Actual usage reported by the service
    Usage(Usage),
    /// End sentinel reached
    Done,
}

pin_project! {
    pub struct FrameDecoder<S> {
        #[pin]
        inner: S,
        buffer: Vec<u8>,
        pos: usize,
        pending: VecDeque<Result<StreamItem, ClientError>>,
        skipped: u64,
        finished: bool,
    }
}

impl<S> FrameDecoder<S>
where
    S: Stream<Item = Result<Bytes, ClientError>>,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(4096),
            pos: 0,
            pending: VecDeque::new(),
            skipped: 0,
            finished: false,
        }
    }

    /// Number of malformed frames skipped so far.
    pub fn skipped_frames(&self) -> u64 {
        self.skipped
    }

    #[inline]
    fn find_newline(buf: &[u8]) -> Option<usize> {
        buf.iter().position(|&b| b == b'\n')
    }

    /// Decodes one line into zero or more items. Returns false if the line
    /// was a malformed frame.
    fn decode_line(line: &[u8], out: &mut VecDeque<Result<StreamItem, ClientError>>) -> bool {
        let Ok(line) = std::str::from_utf8(line) else {
            tracing::warn!("skipping frame with invalid UTF-8");
            return false;
        };
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with(':') {
            return true;
        }
        let Some(payload) = line.strip_prefix("data:") else {
            return true;
        };
        let payload = payload.trim();
        if payload.is_empty() {
            return true;
        }
        if payload == DONE_SENTINEL {
            out.push_back(Ok(StreamItem::Done));
            return true;
        }

        match serde_json::from_str::<ChunkFrame>(payload) {
            Ok(frame) => {
                if let Some(error) = frame.error {
                    out.push_back(Err(ClientError::Api {
                        status: 200,
                        message: error.message,
                    }));
                    return true;
                }
                if let Some(text) = frame.delta_text() {
                    out.push_back(Ok(StreamItem::Delta(text)));
                }
                if let Some(usage) = frame.usage {
                    out.push_back(Ok(StreamItem::Usage(usage)));
                }
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, data = payload, "skipping malformed stream frame");
                false
            }
        }
    }
}

impl<S> Stream for FrameDecoder<S>
where
    S: Stream<Item = Result<Bytes, ClientError>>,
{
    type Item = Result<StreamItem, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(item) = this.pending.pop_front() {
                return Poll::Ready(Some(item));
            }
            if *this.finished {
                return Poll::Ready(None);
            }

            let search_slice = &this.buffer[*this.pos..];
            if let Some(rel_pos) = Self::find_newline(search_slice) {
                let start = *this.pos;
                let end = start + rel_pos;
                if !Self::decode_line(&this.buffer[start..end], &mut *this.pending) {
                    *this.skipped += 1;
                }
                *this.pos = end + 1;

                if this.buffer.len() > COMPACT_THRESHOLD && *this.pos > this.buffer.len() / 2 {
                    this.buffer.drain(..*this.pos);
                    *this.pos = 0;
                }
                continue;
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    if *this.pos > 0 {
                        this.buffer.drain(..*this.pos);
                        *this.pos = 0;
                    }
                    this.buffer.extend_from_slice(&bytes);
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    *this.finished = true;
                    if *this.pos < this.buffer.len() {
                        let start = *this.pos;
                        if !Self::decode_line(&this.buffer[start..], &mut *this.pending) {
                            *this.skipped += 1;
                        }
                        *this.pos = this.buffer.len();
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
