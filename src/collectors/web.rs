//! Fetching source pages over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use crate::pipeline::retry::{with_backoff, RetryPolicy};

/// Longest body kept from a fetched page, in bytes.
const MAX_BODY_BYTES: usize = 512 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Fetching {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
}

impl FetchError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Request { .. } | FetchError::Timeout { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::InvalidUrl(_) => false,
        }
    }
}

/// A fetched page body.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// Source of page content. Implementations own their timeout.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// `reqwest`-backed fetcher with per-request timeout and transient retry.
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
    retry: RetryPolicy,
}

impl HttpFetcher {
    /// # Errors
    ///
    /// `FetchError::Request` if the HTTP client cannot be built.
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("demo-forge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Request {
                url: String::new(),
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            timeout,
            retry,
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                    timeout: self.timeout,
                }
            } else {
                FetchError::Request {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let mut body = response.text().await.map_err(|e| FetchError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        if body.len() > MAX_BODY_BYTES {
            let mut cut = MAX_BODY_BYTES;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        Ok(FetchedPage {
            url: url.to_string(),
            status,
            body,
        })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }
        let label = format!("fetch {}", url);
        with_backoff(&self.retry, &label, FetchError::is_transient, || {
            self.fetch_once(url)
        })
        .await
    }
}
