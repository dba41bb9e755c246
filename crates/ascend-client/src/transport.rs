//! Transport to the remote store
//!
//! One request, one response. No streaming, no partial results.

use std::time::Duration;

use ascend_types::{SyncRequest, SyncResponse, SYNC_PATH};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use tracing::debug;

use crate::error::{Result, SyncError};

/// Carries one exchange to the remote store.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn exchange(&self, token: &str, request: &SyncRequest) -> Result<SyncResponse>;
}

/// JSON over HTTP with a bounded request timeout
pub struct HttpTransport {
    client: Client,
    url: String,
}

impl HttpTransport {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}{}", server_url.trim_end_matches('/'), SYNC_PATH),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn exchange(&self, token: &str, request: &SyncRequest) -> Result<SyncResponse> {
        let response = self
            .client
            .post(&self.url)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .json(request)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let status = response.status();
        debug!(status = status.as_u16(), url = %self.url, "Exchange response");

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Auth(format!("{}: {}", status, body)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Server {
                status: status.as_u16(),
                message: body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| SyncError::MalformedResponse(e.to_string()))
    }
}
