use futures::StreamExt;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use std::time::Duration;
use thiserror::Error;

use crate::feed::FeedSource;
use crate::storage::Validator;

pub const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

const DEFAULT_USER_AGENT: &str = concat!("planet/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur while retrieving a feed.
///
/// None of these abort a run; each is recorded against the failing feed only.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request (connect, headers and body) exceeded the feed's timeout
    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Connection(#[from] reqwest::Error),
    /// HTTP response that is neither 2xx nor 304
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Headers arrived but the body stream broke off
    #[error("Failed to read response body: {0}")]
    BodyRead(#[source] reqwest::Error),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Successful answer from a feed server.
#[derive(Debug)]
pub enum FetchResponse {
    /// New content plus the validator to send next time.
    Modified { body: Vec<u8>, validator: Validator },
    /// 304: the stored validator is still current.
    NotModified,
}

/// HTTP side of polling: conditional GET with a hard timeout and size cap.
///
/// Holds no cache state; the caller supplies the validator from the
/// previous successful fetch.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    max_body: usize,
}

impl Fetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            max_body: MAX_FEED_SIZE,
        }
    }

    /// Build a fetcher with its own client sending `user_agent`
    /// (the crate default when `None`).
    pub fn with_user_agent(user_agent: Option<&str>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .build()?;
        Ok(Self::new(client))
    }

    #[cfg(test)]
    fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// Fetch a feed, bounded by `timeout` end to end.
    ///
    /// When the deadline passes the in-flight request is dropped and
    /// [`FetchError::Timeout`] is returned. There are no retries: the next
    /// scheduled run is the retry.
    pub async fn fetch(
        &self,
        source: &FeedSource,
        timeout: Duration,
        validator: &Validator,
    ) -> Result<FetchResponse, FetchError> {
        tokio::time::timeout(timeout, self.fetch_unbounded(source, validator))
            .await
            .map_err(|_| FetchError::Timeout(timeout))?
    }

    async fn fetch_unbounded(
        &self,
        source: &FeedSource,
        validator: &Validator,
    ) -> Result<FetchResponse, FetchError> {
        let mut request = self.client.get(&source.uri);
        if let Some(etag) = validator.etag.as_deref() {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(modified) = validator.last_modified.as_deref() {
            request = request.header(IF_MODIFIED_SINCE, modified);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_MODIFIED {
            tracing::debug!(feed = %source.uri, "Feed not modified");
            return Ok(FetchResponse::NotModified);
        }

        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let headers = response.headers();
        let validator = Validator {
            etag: header_string(headers, ETAG),
            last_modified: header_string(headers, LAST_MODIFIED),
        };

        let body = read_limited_bytes(response, self.max_body).await?;
        tracing::debug!(feed = %source.uri, bytes = body.len(), "Feed downloaded");

        Ok(FetchResponse::Modified { body, validator })
    }
}

fn header_string(
    headers: &reqwest::header::HeaderMap,
    name: reqwest::header::HeaderName,
) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Capture Content-Length for completeness check
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::BodyRead)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
