//! Remote object-store snapshot backend over HTTP.
//!
//! The snapshot is a single object: `PUT` replaces it, `GET` fetches it.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::SnapshotBackend;
use crate::error::{Error, Result};

/// Stores snapshots at a URL.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    url: String,
    bearer_token: Option<String>,
}

impl HttpBackend {
    pub fn new(url: impl Into<String>, bearer_token: Option<String>, timeout_ms: u64) -> Result<Self> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!("snapshot url must be http(s): {}", url)));
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            url,
            bearer_token,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl SnapshotBackend for HttpBackend {
    fn name(&self) -> String {
        format!("http:{}", self.url)
    }

    async fn write(&self, bytes: &[u8]) -> Result<()> {
        let request = self
            .client
            .put(&self.url)
            .header("content-type", "application/json")
            .body(bytes.to_vec());
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| Error::backend_write(self.name(), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::backend_write(
                self.name(),
                format!("status {}: {}", status, body),
            ));
        }

        debug!(url = %self.url, bytes = bytes.len(), "Uploaded snapshot");
        Ok(())
    }

    async fn read(&self) -> Result<Vec<u8>> {
        let response = self
            .authorize(self.client.get(&self.url))
            .send()
            .await
            .map_err(|e| Error::backend_read(self.name(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::backend_read(self.name(), format!("status {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::backend_read(self.name(), e))?;
        Ok(bytes.to_vec())
    }
}
