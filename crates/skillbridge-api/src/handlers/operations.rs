//! Invocation of registered skills.

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use skillbridge_core::{
    InvocationConfig, OperationVariable, OperationVariableDto, SkillTopicConfig,
    conventional_topics, duration_from_secs,
};
use skillbridge_mqtt::{InvocationRequest, state_update_path};
use std::time::Duration;
use tracing::debug;

use super::{ServerState, TimeoutQuery, parse_variables, query_timeout, render_outputs};
use crate::models::ApiResult;

/// Turn a skill's table entry into an invocation.
///
/// - no entry: conventional topics, synchronous
/// - entry without response topic: one-way
/// - entry with `synchronous = false`: asynchronous with progress updates
/// - otherwise synchronous
pub fn classify(
    asset_id: &str,
    skill_name: &str,
    config: Option<&SkillTopicConfig>,
    invocation: &InvocationConfig,
    variables: Vec<OperationVariable>,
) -> InvocationRequest {
    let Some(config) = config else {
        let (command, response) = conventional_topics(
            asset_id,
            skill_name,
            &invocation.command_marker,
            &invocation.data_marker,
        );
        return InvocationRequest::synchronous(command, response, variables);
    };

    let request = match &config.response_topic {
        None => InvocationRequest::one_way(&config.command_topic, variables),
        Some(response) if !config.synchronous => InvocationRequest::asynchronous(
            &config.command_topic,
            response,
            state_update_path(asset_id, skill_name, config.state_submodel_id.as_deref()),
            variables,
        ),
        Some(response) => {
            InvocationRequest::synchronous(&config.command_topic, response, variables)
        }
    };

    request
        .with_schemas(
            config.input_schema_url.clone(),
            config.output_schema_url.clone(),
        )
        .with_array_override(config.array_mappings_override.clone())
        .with_timeout(config.timeout_secs.map(duration_from_secs))
}

/// `POST /operations/{assetId}/{skillName}`.
pub async fn operation_handler(
    State(state): State<ServerState>,
    Path((asset_id, skill_name)): Path<(String, String)>,
    query: Result<Query<TimeoutQuery>, QueryRejection>,
    body: Bytes,
) -> ApiResult<Json<Vec<OperationVariableDto>>> {
    let timeout: Option<Duration> = query_timeout(query)?;
    let variables = parse_variables(&body)?;

    let config = state.skills.get(&asset_id, &skill_name);
    if config.is_none() {
        debug!(
            "No topic configuration for {}/{}, using conventional topics",
            asset_id, skill_name
        );
    }

    let mut request = classify(
        &asset_id,
        &skill_name,
        config.as_ref(),
        &state.invocation,
        variables,
    );
    if timeout.is_some() {
        request.timeout = timeout;
    }

    let outputs = state.bridge.invoke(request).await?;
    Ok(render_outputs(outputs))
}
