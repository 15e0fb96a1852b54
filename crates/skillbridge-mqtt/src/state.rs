//! Progress reporting for asynchronous skills.
//!
//! Long-running skills expose a `{skillName}.State` property on the shell
//! server. The bridge PATCHes it with `RUNNING` before publishing, with every
//! intermediate state reported by the device, and with `IDLE`/`TIMEOUT`/the
//! terminal state once the invocation ends.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::Client;
use skillbridge_core::AasConfig;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Progress values written by the bridge itself.
pub mod states {
    pub const RUNNING: &str = "RUNNING";
    pub const IDLE: &str = "IDLE";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const ERROR: &str = "ERROR";
}

/// Failure to write a progress value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateUpdateError {
    #[error("Progress update request failed: {0}")]
    Request(String),

    #[error("Progress update rejected with HTTP {0}")]
    Status(u16),
}

/// Sink for progress values of asynchronous invocations.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Write `state` to the property at `path`.
    async fn report(&self, path: &str, state: &str) -> Result<(), StateUpdateError>;
}

/// Default submodel holding the `{skill}.State` properties of an asset.
pub fn default_state_submodel_id(asset_id: &str) -> String {
    format!("urn:skillbridge:{}:submodel:Skills", asset_id)
}

/// Shell-server path of a skill's progress property value.
pub fn state_update_path(asset_id: &str, skill_name: &str, submodel_id: Option<&str>) -> String {
    let submodel_id = submodel_id
        .map(str::to_string)
        .unwrap_or_else(|| default_state_submodel_id(asset_id));
    format!(
        "/submodels/{}/submodel-elements/{}.State/$value",
        URL_SAFE_NO_PAD.encode(submodel_id.as_bytes()),
        skill_name
    )
}

/// HTTP client for the shell server's property value endpoint.
#[derive(Debug, Clone)]
pub struct AasStateUpdater {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl AasStateUpdater {
    pub fn new(config: &AasConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// PATCH a single string value at `path`.
    pub async fn update_state(&self, path: &str, state: &str) -> Result<(), StateUpdateError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("PATCH {} <- {}", url, state);

        let response = self
            .client
            .patch(&url)
            .timeout(self.timeout)
            .json(&state)
            .send()
            .await
            .map_err(|e| StateUpdateError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StateUpdateError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressReporter for AasStateUpdater {
    async fn report(&self, path: &str, state: &str) -> Result<(), StateUpdateError> {
        self.update_state(path, state).await
    }
}
