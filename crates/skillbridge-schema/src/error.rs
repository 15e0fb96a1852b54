//! Schema loading errors.

use skillbridge_core::BridgeError;
use thiserror::Error;

pub type SchemaResult<T> = std::result::Result<T, SchemaError>;

/// Errors raised while fetching or resolving a schema.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Invalid schema reference '{0}'")]
    InvalidReference(String),

    #[error("Unsupported schema location scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Failed to fetch schema {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Failed to parse schema {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Reference target not found: {0}")]
    PointerNotFound(String),
}

impl From<SchemaError> for BridgeError {
    fn from(e: SchemaError) -> Self {
        BridgeError::SchemaLoad(e.to_string())
    }
}
