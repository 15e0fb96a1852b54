//! Error responses of the delegation API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use skillbridge_core::{BridgeError, ErrorKind};
use std::fmt;

/// Error body `{"error": CODE, "message": text}` with its HTTP status.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    #[serde(rename = "error")]
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    #[serde(skip)]
    pub status: StatusCode,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status,
        }
    }

    /// Malformed request (500, like every non-timeout failure of the bridge).
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Validation.as_str(),
            message,
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    }

    /// Internal server error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message, StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// HTTP status for an error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::SchemaLoad | ErrorKind::Mapping | ErrorKind::Broker | ErrorKind::Validation => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<BridgeError> for ErrorResponse {
    fn from(e: BridgeError) -> Self {
        let kind = e.kind();
        Self::new(kind.as_str(), e.to_string(), status_for(kind))
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, axum::Json(self)).into_response()
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorResponse {}

/// Handler result type.
pub type ApiResult<T> = Result<T, ErrorResponse>;
