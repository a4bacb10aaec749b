//! HTTP transport built on an async `reqwest` client.

use std::future::Future;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::{RetrievalRequest, RetrievedData, Retriever};
use crate::error::RetrievalError;

/// Default request timeout in seconds.
pub const DEFAULT_RETRIEVAL_TIMEOUT_SECS: u64 = 30;

/// Fetches tile resources with HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpRetriever {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpRetriever {
    /// Creates a retriever with the default timeout.
    pub fn new() -> Result<Self, RetrievalError> {
        Self::with_timeout(DEFAULT_RETRIEVAL_TIMEOUT_SECS)
    }

    /// Creates a retriever with a custom timeout.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, RetrievalError> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                RetrievalError::Transport(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn map_error(&self, error: reqwest::Error) -> RetrievalError {
        if error.is_timeout() {
            RetrievalError::Timeout(self.timeout)
        } else {
            RetrievalError::Transport(error.to_string())
        }
    }

    async fn get(&self, url: String) -> Result<RetrievedData, RetrievalError> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            return Err(RetrievalError::Http {
                status: response.status().as_u16(),
                url,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(|e| self.map_error(e))?;

        Ok(RetrievedData {
            content_type,
            bytes,
        })
    }
}

impl Retriever for HttpRetriever {
    fn retrieve(
        &self,
        request: RetrievalRequest,
    ) -> impl Future<Output = Result<RetrievedData, RetrievalError>> + Send {
        let this = self.clone();
        async move { this.get(request.url).await }
    }
}
