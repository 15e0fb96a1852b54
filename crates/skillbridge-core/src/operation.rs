//! Operation variables and their AAS wire representation.
//!
//! The shell server transports Operation parameters as
//! `{"value": {"modelType": "Property", "idShort", "valueType", "value"}}`.
//! Internally the bridge only needs the flat `{name, valueType, value}` triple.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// XSD value type names used by shell Properties.
pub mod xs {
    pub const STRING: &str = "xs:string";
    pub const INT: &str = "xs:int";
    pub const DOUBLE: &str = "xs:double";
    pub const BOOLEAN: &str = "xs:boolean";
    pub const DATE_TIME: &str = "xs:dateTime";
    pub const DATE: &str = "xs:date";
    pub const TIME: &str = "xs:time";
    pub const ANY_URI: &str = "xs:anyURI";
}

/// One named, typed Operation parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationVariable {
    pub name: String,
    pub value_type: String,
    pub value: String,
}

impl OperationVariable {
    pub fn new(
        name: impl Into<String>,
        value_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value_type: value_type.into(),
            value: value.into(),
        }
    }

    /// Shorthand for an `xs:string` variable.
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, xs::STRING, value)
    }

    /// Coerce the textual value according to the declared value type.
    pub fn coerced_value(&self) -> Value {
        ValueType::classify(&self.value_type).coerce(&self.value)
    }
}

/// Property payload inside an [`OperationVariableDto`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDto {
    #[serde(default = "default_model_type")]
    pub model_type: String,
    pub id_short: String,
    #[serde(default = "default_value_type")]
    pub value_type: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub value: String,
}

fn default_model_type() -> String {
    "Property".to_string()
}

fn default_value_type() -> String {
    xs::STRING.to_string()
}

/// Accept non-string JSON values and keep their textual form.
fn deserialize_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Wire form of one Operation variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationVariableDto {
    pub value: PropertyDto,
}

impl From<OperationVariableDto> for OperationVariable {
    fn from(dto: OperationVariableDto) -> Self {
        Self {
            name: dto.value.id_short,
            value_type: dto.value.value_type,
            value: dto.value.value,
        }
    }
}

impl From<OperationVariable> for OperationVariableDto {
    fn from(var: OperationVariable) -> Self {
        Self {
            value: PropertyDto {
                model_type: default_model_type(),
                id_short: var.name,
                value_type: var.value_type,
                value: var.value,
            },
        }
    }
}

/// Coercion family of an `xs:*` value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Integer,
    Float,
    Boolean,
    String,
}

impl ValueType {
    /// Classify an XSD type name (with or without the `xs:` prefix).
    pub fn classify(value_type: &str) -> Self {
        let name = value_type
            .rsplit(':')
            .next()
            .unwrap_or(value_type)
            .to_ascii_lowercase();
        match name.as_str() {
            "int" | "integer" | "long" | "short" | "byte" | "unsignedint" | "unsignedlong"
            | "unsignedshort" | "unsignedbyte" | "nonnegativeinteger" | "positiveinteger"
            | "nonpositiveinteger" | "negativeinteger" => Self::Integer,
            "double" | "float" | "decimal" => Self::Float,
            "boolean" | "bool" => Self::Boolean,
            _ => Self::String,
        }
    }

    /// Coerce text into a JSON value of this family. Unparseable text stays a string.
    pub fn coerce(&self, text: &str) -> Value {
        let trimmed = text.trim();
        match self {
            Self::Integer => coerce_integer_text(trimmed).unwrap_or_else(|| {
                if trimmed.parse::<f64>().is_ok() {
                    warn!("Integer value {} is out of range, sending it as text", trimmed);
                }
                Value::String(text.to_string())
            }),
            Self::Float => match trimmed.parse::<f64>() {
                Ok(f) if f.is_finite() => Value::from(f),
                _ => Value::String(text.to_string()),
            },
            Self::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => Value::String(text.to_string()),
            },
            Self::String => Value::String(text.to_string()),
        }
    }
}

/// Parse an integer literal without losing precision.
///
/// Accepts the full `i64` and `u64` ranges. Whole floats such as `"3.0"` or
/// `"1e3"` are accepted only when they fit in `i64`.
pub fn coerce_integer_text(text: &str) -> Option<Value> {
    if let Ok(n) = text.parse::<i64>() {
        return Some(Value::from(n));
    }
    if let Ok(n) = text.parse::<u64>() {
        return Some(Value::from(n));
    }
    let f = text.parse::<f64>().ok()?;
    whole_f64_to_i64(f).map(Value::from)
}

/// `f` as `i64` when it is a whole number inside the `i64` range.
pub fn whole_f64_to_i64(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive
    let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
    (f.is_finite() && f.fract() == 0.0 && in_range).then_some(f as i64)
}

/// Pick the output value type from a schema's declared `format`/`type`.
pub fn value_type_for_schema(schema_type: Option<&str>, format: Option<&str>) -> Option<&'static str> {
    let by_format = format.and_then(|f| match f {
        "date-time" => Some(xs::DATE_TIME),
        "date" => Some(xs::DATE),
        "time" => Some(xs::TIME),
        "uri" => Some(xs::ANY_URI),
        _ => None,
    });
    by_format.or_else(|| {
        schema_type.and_then(|t| match t {
            "integer" => Some(xs::INT),
            "number" => Some(xs::DOUBLE),
            "boolean" => Some(xs::BOOLEAN),
            "string" => Some(xs::STRING),
            _ => None,
        })
    })
}

/// Infer the output value type from a native JSON value.
pub fn infer_value_type(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => xs::BOOLEAN,
        Value::Number(n) if n.is_i64() || n.is_u64() => xs::INT,
        Value::Number(_) => xs::DOUBLE,
        _ => xs::STRING,
    }
}

/// Textual form of a JSON value as carried in a Property `value`.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
