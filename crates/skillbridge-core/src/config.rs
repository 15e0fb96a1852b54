//! Process configuration.
//!
//! Values come from an optional TOML file and are then overridden by
//! environment variables. Every section has defaults so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Default values
pub mod defaults {
    pub const BIND: &str = "127.0.0.1:8089";
    pub const MQTT_HOST: &str = "localhost";
    pub const MQTT_PORT: u16 = 1883;
    pub const MQTT_CLIENT_ID: &str = "skillbridge";
    pub const MQTT_KEEP_ALIVE_SECS: u64 = 60;
    pub const MQTT_CHANNEL_CAPACITY: usize = 64;
    pub const AAS_URL: &str = "http://localhost:8081";
    pub const AAS_TIMEOUT_SECS: u64 = 5;
    /// Wait for a terminal response
    pub const INVOCATION_TIMEOUT_SECS: f64 = 30.0;
    pub const COMMAND_MARKER: &str = "cmd";
    pub const DATA_MARKER: &str = "data";
    pub const SCHEMA_FETCH_TIMEOUT_SECS: u64 = 5;
}

/// Environment variable names
pub mod env_vars {
    pub const BIND: &str = "SKILLBRIDGE_BIND";
    pub const MQTT_HOST: &str = "SKILLBRIDGE_MQTT_HOST";
    pub const MQTT_PORT: &str = "SKILLBRIDGE_MQTT_PORT";
    pub const MQTT_USERNAME: &str = "SKILLBRIDGE_MQTT_USERNAME";
    pub const MQTT_PASSWORD: &str = "SKILLBRIDGE_MQTT_PASSWORD";
    pub const AAS_URL: &str = "SKILLBRIDGE_AAS_URL";
    pub const SKILLS_FILE: &str = "SKILLBRIDGE_SKILLS_FILE";
    pub const LOG_JSON: &str = "SKILLBRIDGE_LOG_JSON";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::BIND.to_string(),
        }
    }
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    /// Request channel capacity of the MQTT client
    pub channel_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: defaults::MQTT_HOST.to_string(),
            port: defaults::MQTT_PORT,
            client_id: defaults::MQTT_CLIENT_ID.to_string(),
            username: None,
            password: None,
            keep_alive_secs: defaults::MQTT_KEEP_ALIVE_SECS,
            channel_capacity: defaults::MQTT_CHANNEL_CAPACITY,
        }
    }
}

impl MqttConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set MQTT authentication.
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Shell server used for progress updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AasConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for AasConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::AAS_URL.to_string(),
            timeout_secs: defaults::AAS_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationConfig {
    pub default_timeout_secs: f64,
    /// Topic segment marking a command topic
    pub command_marker: String,
    /// Topic segment replacing the command marker in response topics
    pub data_marker: String,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: defaults::INVOCATION_TIMEOUT_SECS,
            command_marker: defaults::COMMAND_MARKER.to_string(),
            data_marker: defaults::DATA_MARKER.to_string(),
        }
    }
}

impl InvocationConfig {
    pub fn default_timeout(&self) -> Duration {
        duration_from_secs(self.default_timeout_secs)
    }
}

/// Longest accepted wait (one day).
const MAX_TIMEOUT_SECS: f64 = 86_400.0;

/// Convert fractional seconds; negative or non-finite values become zero.
pub fn duration_from_secs(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs.min(MAX_TIMEOUT_SECS))
    } else {
        Duration::ZERO
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub fetch_timeout_secs: u64,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: defaults::SCHEMA_FETCH_TIMEOUT_SECS,
        }
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub mqtt: MqttConfig,
    pub aas: AasConfig,
    pub invocation: InvocationConfig,
    pub schema: SchemaConfig,
    /// JSON skill table loaded at startup
    pub skills_file: Option<PathBuf>,
}

impl BridgeConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| BridgeError::Validation(format!("Invalid config: {}", e)))
    }

    /// Load from an optional file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    BridgeError::Validation(format!("Cannot read {}: {}", path.display(), e))
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup(env_vars::BIND) {
            self.server.bind = bind;
        }
        if let Some(host) = lookup(env_vars::MQTT_HOST) {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup(env_vars::MQTT_PORT) {
            match port.parse() {
                Ok(port) => self.mqtt.port = port,
                Err(_) => tracing::warn!("Ignoring invalid {}: {}", env_vars::MQTT_PORT, port),
            }
        }
        if let Some(user) = lookup(env_vars::MQTT_USERNAME) {
            self.mqtt.username = Some(user);
        }
        if let Some(pass) = lookup(env_vars::MQTT_PASSWORD) {
            self.mqtt.password = Some(pass);
        }
        if let Some(url) = lookup(env_vars::AAS_URL) {
            self.aas.base_url = url;
        }
        if let Some(file) = lookup(env_vars::SKILLS_FILE) {
            self.skills_file = Some(PathBuf::from(file));
        }
    }
}
