//! Error taxonomy for operation delegation.

use thiserror::Error;

/// Bridge result type
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while delegating an Operation to a device.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// No terminal response arrived before the deadline
    #[error("No terminal response on '{topic}' within {timeout_ms} ms")]
    Timeout { topic: String, timeout_ms: u64 },

    /// Schema could not be fetched or parsed
    #[error("Schema load error: {0}")]
    SchemaLoad(String),

    /// Parameters could not be mapped onto the wire message
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Publish/subscribe or connection failure
    #[error("Broker error: {0}")]
    Broker(String),

    /// Malformed request
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Fieldless discriminant of [`BridgeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    SchemaLoad,
    Mapping,
    Broker,
    Validation,
}

impl BridgeError {
    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::SchemaLoad(_) => ErrorKind::SchemaLoad,
            Self::Mapping(_) => ErrorKind::Mapping,
            Self::Broker(_) => ErrorKind::Broker,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }

    /// Whether this error is the expected "device did not answer" outcome.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl ErrorKind {
    /// Machine-readable code used in HTTP error bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::SchemaLoad => "SCHEMA_LOAD_ERROR",
            Self::Mapping => "MAPPING_ERROR",
            Self::Broker => "BROKER_ERROR",
            Self::Validation => "VALIDATION_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Validation(e.to_string())
    }
}
