//! Shared state of the HTTP server.

use skillbridge_core::{InvocationConfig, SkillTopicTable};
use skillbridge_mqtt::MqttOperationBridge;
use std::sync::Arc;

/// Maximum accepted request body (1 MiB).
pub const MAX_REQUEST_BODY_SIZE: usize = 1024 * 1024;

/// State handed to every handler.
#[derive(Clone)]
pub struct ServerState {
    pub bridge: Arc<MqttOperationBridge>,
    /// Skill table, swapped wholesale by the registration flow
    pub skills: Arc<SkillTopicTable>,
    pub invocation: Arc<InvocationConfig>,
    /// Unix timestamp of server start
    pub started_at: i64,
}

impl ServerState {
    pub fn new(
        bridge: Arc<MqttOperationBridge>,
        skills: Arc<SkillTopicTable>,
        invocation: InvocationConfig,
    ) -> Self {
        Self {
            bridge,
            skills,
            invocation: Arc::new(invocation),
            started_at: chrono::Utc::now().timestamp(),
        }
    }
}
