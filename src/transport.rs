//! Shared HTTP transport with bounded, linearly backed-off retries.
//!
//! Transient failures (5xx responses, connection errors, timeouts) are retried up to
//! `max_retries` times, waiting `base_delay × attempt` between tries. A 404 and every other
//! 4xx response propagate immediately, as do bodies that fail to decode.

use crate::error::ErrorKind;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`HttpTransport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),
    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    /// Upstream answered 404.
    #[error("Resource not found: {url}")]
    NotFound {
        /// Requested URL.
        url: String,
    },
    /// Upstream rejected the request with a non-retryable 4xx status.
    #[error("Request rejected ({status}): {body}")]
    Rejected {
        /// HTTP status returned upstream.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Upstream kept failing with 5xx responses until the retry budget ran out.
    #[error("Upstream failed ({status}) after {attempts} attempt(s): {body}")]
    Server {
        /// Last HTTP status observed.
        status: StatusCode,
        /// Body of the last failing response.
        body: String,
        /// Number of attempts made.
        attempts: u32,
    },
    /// Connection failure or timeout that persisted across every attempt.
    #[error("Request failed after {attempts} attempt(s): {source}")]
    Network {
        /// Underlying reqwest failure.
        #[source]
        source: reqwest::Error,
        /// Number of attempts made.
        attempts: u32,
    },
    /// Response body did not match the expected shape.
    #[error("Failed to decode response from {url}: {message}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Decoder message.
        message: String,
    },
}

impl TransportError {
    /// Classify the failure for callers.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl(_) | Self::Client(_) => ErrorKind::InvalidConfiguration,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Rejected { .. } | Self::Server { .. } | Self::Network { .. } => {
                ErrorKind::UpstreamUnavailable
            }
            Self::Decode { .. } => ErrorKind::MalformedUpstreamOutput,
        }
    }

    /// HTTP status reported by upstream, when one was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::NotFound { .. } => Some(StatusCode::NOT_FOUND),
            Self::Rejected { status, .. } | Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Bounded retry schedule with linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay multiplied by the attempt number before each retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Policy that never waits between attempts.
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
        }
    }

    /// Wait applied after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// reqwest client paired with a retry policy.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    policy: RetryPolicy,
}

impl HttpTransport {
    /// Build a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration, policy: RetryPolicy) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent("resume-forge/0.1")
            .timeout(timeout)
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self { client, policy })
    }

    /// Retry policy in effect.
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send a request produced by `build`, rebuilding it for every attempt.
    pub async fn send<F>(&self, build: F) -> Result<Response, TransportError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let retries_left = attempt <= self.policy.max_retries;
            match build(&self.client).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let url = response.url().to_string();
                    if status == StatusCode::NOT_FOUND {
                        return Err(TransportError::NotFound { url });
                    }
                    let body = response.text().await.unwrap_or_default();
                    if status.is_client_error() {
                        tracing::warn!(%url, %status, "Upstream rejected request");
                        return Err(TransportError::Rejected { status, body });
                    }
                    if !retries_left {
                        tracing::error!(%url, %status, attempts = attempt, "Upstream failed; retries exhausted");
                        return Err(TransportError::Server {
                            status,
                            body,
                            attempts: attempt,
                        });
                    }
                    tracing::warn!(%url, %status, attempt, "Upstream error; retrying");
                }
                Err(error) => {
                    if !retries_left || !is_transient(&error) {
                        tracing::error!(error = %error, attempts = attempt, "Request failed");
                        return Err(TransportError::Network {
                            source: error,
                            attempts: attempt,
                        });
                    }
                    tracing::warn!(error = %error, attempt, "Transient request failure; retrying");
                }
            }
            tokio::time::sleep(self.policy.delay_for(attempt)).await;
        }
    }

    /// POST a JSON body and decode a JSON response.
    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, TransportError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(|client| client.post(url).json(body)).await?;
        decode_json(url, response).await
    }

    /// GET a JSON document, mapping 404 to `None`.
    pub async fn get_json_optional<T>(&self, url: &str) -> Result<Option<T>, TransportError>
    where
        T: DeserializeOwned,
    {
        match self.send(|client| client.get(url)).await {
            Ok(response) => decode_json(url, response).await.map(Some),
            Err(TransportError::NotFound { .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }
}

/// Decode a JSON response body, logging the raw payload when it does not match `T`.
pub async fn decode_json<T>(url: &str, response: Response) -> Result<T, TransportError>
where
    T: DeserializeOwned,
{
    let raw = response.text().await.map_err(|source| TransportError::Network {
        source,
        attempts: 1,
    })?;
    serde_json::from_str(&raw).map_err(|error| {
        tracing::error!(%url, raw = %raw, error = %error, "Malformed upstream response");
        TransportError::Decode {
            url: url.to_string(),
            message: error.to_string(),
        }
    })
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Parse `url` and drop any trailing slash from its path.
pub fn normalize_base_url(url: &str) -> Result<String, TransportError> {
    let mut parsed =
        reqwest::Url::parse(url).map_err(|err| TransportError::InvalidUrl(format!("{url}: {err}")))?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

/// Join a base URL and a relative path with exactly one slash.
pub fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

/// Append `segments` to `base`, percent-encoding each one so reserved characters stay inside
/// their segment.
pub fn segment_endpoint(base: &str, segments: &[&str]) -> Result<String, TransportError> {
    let mut url =
        reqwest::Url::parse(base).map_err(|err| TransportError::InvalidUrl(format!("{base}: {err}")))?;
    url.path_segments_mut()
        .map_err(|()| TransportError::InvalidUrl(format!("{base}: cannot be a base")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url.to_string())
}
