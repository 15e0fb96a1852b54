//! Generic invoke with caller-supplied topics.

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use skillbridge_core::{OperationVariableDto, derive_response_topic};
use skillbridge_mqtt::InvocationRequest;

use super::{ServerState, TimeoutQuery, parse_variables, query_timeout, render_outputs};
use crate::models::{ApiResult, ErrorResponse};

pub const COMMAND_TOPIC_HEADER: &str = "x-command-topic";
pub const RESPONSE_TOPIC_HEADER: &str = "x-response-topic";
pub const INPUT_SCHEMA_HEADER: &str = "x-input-schema";
pub const OUTPUT_SCHEMA_HEADER: &str = "x-output-schema";

fn header(headers: &HeaderMap, name: &str) -> ApiResult<Option<String>> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|s| Some(s.trim().to_string()).filter(|s| !s.is_empty()))
            .map_err(|_| ErrorResponse::validation(format!("Header {} is not valid text", name))),
    }
}

/// `POST /invoke/{skillPath}`: synchronous invoke.
///
/// The command topic comes from `X-Command-Topic` (else the path itself); the
/// response topic from `X-Response-Topic` (else derived from the command topic).
pub async fn invoke_handler(
    State(state): State<ServerState>,
    Path(skill_path): Path<String>,
    headers: HeaderMap,
    query: Result<Query<TimeoutQuery>, QueryRejection>,
    body: Bytes,
) -> ApiResult<Json<Vec<OperationVariableDto>>> {
    let timeout = query_timeout(query)?;
    let variables = parse_variables(&body)?;

    let command_topic = match header(&headers, COMMAND_TOPIC_HEADER)? {
        Some(topic) => topic,
        None => skill_path.trim_matches('/').to_string(),
    };
    if command_topic.is_empty() {
        return Err(ErrorResponse::validation("No command topic given"));
    }
    let response_topic = match header(&headers, RESPONSE_TOPIC_HEADER)? {
        Some(topic) => topic,
        None => derive_response_topic(
            &command_topic,
            &state.invocation.command_marker,
            &state.invocation.data_marker,
        ),
    };

    let request = InvocationRequest::synchronous(command_topic, response_topic, variables)
        .with_schemas(
            header(&headers, INPUT_SCHEMA_HEADER)?,
            header(&headers, OUTPUT_SCHEMA_HEADER)?,
        )
        .with_timeout(timeout);

    let outputs = state.bridge.invoke(request).await?;
    Ok(render_outputs(outputs))
}
