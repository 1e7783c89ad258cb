//! Transport to the completion service.
//!
//! [`CompletionTransport`] is the seam the coordinator talks through;
//! [`HttpTransport`] implements it for OpenAI-compatible chat-completions
//! endpoints. [`FrameDecoder`] turns a streaming response body into
//! [`StreamItem`]s.

mod config;
mod error;
mod frames;
mod http;
mod wire;

pub use config::{
    ClientConfig, DEFAULT_BASE_URL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
};
pub use error::ClientError;
pub use frames::{DONE_SENTINEL, FrameDecoder, StreamItem};
pub use http::HttpTransport;
pub use wire::{
    ChunkChoice, ChunkDelta, ChunkFrame, Choice, CompletionRequest, CompletionResponse,
    ErrorDetail, ErrorResponse, ResponseMessage, StreamOptions,
};

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

/// Raw response body of a streaming call.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

#[async_trait::async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Issues a streaming request and returns its body once the service has
    /// accepted it. Non-success statuses are classified into [`ClientError`].
    async fn open_stream(&self, request: &CompletionRequest) -> Result<ByteStream, ClientError>;

    /// Issues a single non-streaming request.
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ClientError>;
}
