//! Request handlers.

pub mod basic;
pub mod invoke;
pub mod operations;

pub use crate::server::ServerState;

use axum::Json;
use axum::body::Bytes;
use axum::extract::Query;
use axum::extract::rejection::QueryRejection;
use serde::Deserialize;
use skillbridge_core::{OperationVariable, OperationVariableDto, duration_from_secs};
use std::time::Duration;

use crate::models::ErrorResponse;

/// Optional `?timeout=<seconds>` of the POST routes.
#[derive(Debug, Default, Deserialize)]
pub struct TimeoutQuery {
    pub timeout: Option<f64>,
}

/// Resolve the query timeout; a malformed query string is a validation error.
pub(crate) fn query_timeout(
    query: Result<Query<TimeoutQuery>, QueryRejection>,
) -> Result<Option<Duration>, ErrorResponse> {
    let Query(query) =
        query.map_err(|e| ErrorResponse::validation(format!("Invalid query: {}", e)))?;
    Ok(query.timeout.map(duration_from_secs))
}

/// Decode the input variable list. An empty body means no inputs.
pub(crate) fn parse_variables(body: &Bytes) -> Result<Vec<OperationVariable>, ErrorResponse> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let dtos: Vec<OperationVariableDto> = serde_json::from_slice(body).map_err(|e| {
        ErrorResponse::validation(format!("Body is not a list of operation variables: {}", e))
    })?;
    Ok(dtos.into_iter().map(OperationVariable::from).collect())
}

/// Encode output variables in the shell server's wire form.
pub(crate) fn render_outputs(outputs: Vec<OperationVariable>) -> Json<Vec<OperationVariableDto>> {
    Json(outputs.into_iter().map(OperationVariableDto::from).collect())
}
