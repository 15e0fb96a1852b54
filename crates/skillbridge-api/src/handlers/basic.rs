//! Health check.

use axum::{Json, extract::State};
use serde::Serialize;

use super::ServerState;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub mqtt_connected: bool,
    pub registered_asset_count: usize,
}

/// Health check handler. Always answers 200; broker state is reported, not enforced.
pub async fn health_handler(State(state): State<ServerState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        mqtt_connected: state.bridge.is_connected(),
        registered_asset_count: state.skills.asset_count(),
    })
}
