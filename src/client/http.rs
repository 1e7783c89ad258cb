//! reqwest-backed transport for OpenAI-compatible chat-completions endpoints.

use std::time::Duration;

use futures::StreamExt;
use secrecy::ExposeSecret;

use super::config::ClientConfig;
use super::error::ClientError;
use super::wire::{CompletionRequest, CompletionResponse, ErrorResponse};
use super::{ByteStream, CompletionTransport};

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn build_request(&self, request: &CompletionRequest) -> reqwest::RequestBuilder {
        let builder = self.http.post(self.config.completions_url()).json(request);
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ClientError> {
        let response = builder.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(Self::error_from_response(response).await)
    }

    async fn error_from_response(response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();

        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(error) => error.into_error(status, retry_after),
            Err(_) => {
                let message = if body.trim().is_empty() {
                    format!("HTTP {status}")
                } else {
                    body.chars().take(MAX_ERROR_BODY).collect()
                };
                ClientError::from_status(status, message, retry_after)
            }
        }
    }
}

#[async_trait::async_trait]
impl CompletionTransport for HttpTransport {
    async fn open_stream(&self, request: &CompletionRequest) -> Result<ByteStream, ClientError> {
        tracing::debug!(
            model = %request.model,
            url = %self.config.completions_url(),
            "opening stream"
        );
        let response = self.send(self.build_request(request)).await?;
        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(ClientError::from)),
        ))
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ClientError> {
        let builder = self
            .build_request(request)
            .timeout(self.config.request_timeout);
        let response = self.send(builder).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

/// Parses a `Retry-After` header given in whole seconds.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }
}
