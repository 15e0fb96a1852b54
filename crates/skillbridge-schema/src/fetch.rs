//! Schema document retrieval.

use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;

use crate::error::{SchemaError, SchemaResult};

/// Source of raw schema bytes.
#[async_trait]
pub trait SchemaFetcher: Send + Sync {
    /// Fetch the document at `url` (fragment already stripped).
    async fn fetch(&self, url: &Url) -> SchemaResult<Vec<u8>>;
}

/// Reads `file://` URLs from disk and `http(s)://` URLs over the network.
pub struct DefaultFetcher {
    client: Client,
    timeout: Duration,
}

impl DefaultFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, timeout }
    }
}

impl Default for DefaultFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(skillbridge_core::defaults::SCHEMA_FETCH_TIMEOUT_SECS))
    }
}

#[async_trait]
impl SchemaFetcher for DefaultFetcher {
    async fn fetch(&self, url: &Url) -> SchemaResult<Vec<u8>> {
        let fetch_err = |message: String| SchemaError::Fetch {
            url: url.to_string(),
            message,
        };

        match url.scheme() {
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| SchemaError::InvalidReference(url.to_string()))?;
                tokio::fs::read(&path)
                    .await
                    .map_err(|e| fetch_err(e.to_string()))
            }
            "http" | "https" => {
                let response = self
                    .client
                    .get(url.clone())
                    .timeout(self.timeout)
                    .send()
                    .await
                    .map_err(|e| fetch_err(format!("HTTP request failed: {}", e)))?;

                if !response.status().is_success() {
                    return Err(fetch_err(format!("HTTP error: {}", response.status())));
                }

                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| fetch_err(e.to_string()))?;
                Ok(bytes.to_vec())
            }
            other => Err(SchemaError::UnsupportedScheme(other.to_string())),
        }
    }
}
