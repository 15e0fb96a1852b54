//! MQTT side of operation delegation.
//!
//! Turns a blocking Operation invocation into a publish on a command topic
//! and a correlated wait on a response topic.
//!
//! ## Architecture
//!
//! - **PendingOperationRegistry**: correlation id -> waiter store shared by
//!   invoking callers and the MQTT receive task
//! - **MqttTransport**: publish/subscribe seam; `RumqttTransport` is the
//!   production implementation owning the receive loop
//! - **AasStateUpdater**: PATCHes the progress property of asynchronous skills
//! - **MqttOperationBridge**: runs one invocation end-to-end
//!
//! ```text
//! invoke ──build_command_message──→ publish(command topic)
//!    │                                       │
//!    └── register(id, response topic)        ▼
//!              ▲                          device
//!              │                             │
//!        complete(topic, payload, state) ◄── receive task ◄── response topic
//! ```

pub mod bridge;
pub mod message;
pub mod pending;
pub mod state;
pub mod transport;

pub use bridge::{InvocationMode, InvocationRequest, MqttOperationBridge};
pub use message::{
    CommandMessage, MappingWarning, MessageLayout, build_response_variables, coerce_to_schema,
    compose_command,
};
pub use pending::{
    CorrelationId, Dispatch, PendingHandle, PendingOperation, PendingOperationRegistry,
    TERMINAL_STATES, extract_state, is_success_state, is_terminal_state,
};
pub use state::{
    AasStateUpdater, ProgressReporter, StateUpdateError, default_state_submodel_id,
    state_update_path, states,
};
pub use transport::{DisconnectCallback, MqttTransport, RumqttTransport};
