//! Core types for the SkillBridge operation-delegation bridge.
//!
//! This crate holds everything the other crates share:
//! - **OperationVariable**: one typed, named parameter of a shell Operation
//! - **SkillTopicConfig / SkillTopicTable**: per-skill topic and schema bindings
//! - **BridgeError / ErrorKind**: the tagged error taxonomy
//! - **BridgeConfig**: process configuration (TOML file + environment)

pub mod config;
pub mod error;
pub mod operation;
pub mod skill;

pub use config::{
    AasConfig, BridgeConfig, InvocationConfig, MqttConfig, SchemaConfig, ServerConfig, defaults,
    duration_from_secs, env_vars,
};
pub use error::{BridgeError, ErrorKind, Result};
pub use operation::{
    OperationVariable, OperationVariableDto, PropertyDto, ValueType, coerce_integer_text,
    infer_value_type, value_to_text, value_type_for_schema, whole_f64_to_i64, xs,
};
pub use skill::{
    ArrayMappingsOverride, SkillKey, SkillMap, SkillTopicConfig, SkillTopicTable, conventional_topics,
    derive_response_topic,
};

/// Reserved command/response field carrying the correlation token.
pub const CORRELATION_FIELD: &str = "Uuid";

/// Response field whose value decides terminal vs. intermediate.
pub const STATE_FIELD: &str = "State";

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
