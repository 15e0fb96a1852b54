//! Translation between Operation variables and MQTT JSON payloads.

use serde_json::{Map, Value};
use skillbridge_core::{
    ArrayMappingsOverride, CORRELATION_FIELD, OperationVariable, coerce_integer_text,
    infer_value_type, value_to_text, value_type_for_schema, whole_f64_to_i64,
};
use skillbridge_schema::{FieldMappingResolver, SchemaStructure};
use std::fmt;
use tracing::warn;

/// Outbound command payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandMessage {
    pub correlation_id: String,
    /// JSON object published on the command topic, `Uuid` included
    pub payload: Map<String, Value>,
    pub warnings: Vec<MappingWarning>,
}

impl CommandMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        // a Map<String, Value> always serializes
        serde_json::to_vec(&self.payload).unwrap_or_default()
    }
}

/// Non-fatal problem found while composing a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingWarning {
    /// Parameter matched no schema field and was left out
    Unmapped(String),
    /// Array left out because a position had no parameter
    IncompleteArray(String),
    /// Required schema field absent from the message
    MissingRequired(String),
    /// Text for an object field did not parse as a JSON object
    UncoercibleObject(String),
}

impl fmt::Display for MappingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unmapped(p) => write!(f, "parameter '{}' matches no schema field, dropped", p),
            Self::IncompleteArray(a) => {
                write!(f, "array '{}' has an unmatched required position, omitted", a)
            }
            Self::MissingRequired(field) => write!(f, "required field '{}' not supplied", field),
            Self::UncoercibleObject(field) => {
                write!(f, "field '{}' expects an object, value left unchanged", field)
            }
        }
    }
}

/// How parameters are laid out in the command payload.
#[derive(Debug, Clone, Copy)]
pub enum MessageLayout<'a> {
    /// Every parameter becomes a top-level field
    PassThrough,
    /// Explicit array packing; other parameters pass through
    Override(&'a ArrayMappingsOverride),
    /// Only schema-declared fields, arrays packed per the schema
    Schema(&'a SchemaStructure),
}

/// Build the command payload for `variables`.
pub fn compose_command(
    correlation_id: &str,
    variables: &[OperationVariable],
    layout: MessageLayout<'_>,
) -> CommandMessage {
    let mut warnings = Vec::new();
    let mut payload = match layout {
        MessageLayout::PassThrough => pass_through(variables, &[]),
        MessageLayout::Override(overrides) => apply_override(variables, overrides, &mut warnings),
        MessageLayout::Schema(structure) => apply_schema(variables, structure, &mut warnings),
    };

    payload.insert(
        CORRELATION_FIELD.to_string(),
        Value::String(correlation_id.to_string()),
    );

    CommandMessage {
        correlation_id: correlation_id.to_string(),
        payload,
        warnings,
    }
}

fn find<'v>(variables: &'v [OperationVariable], name: &str) -> Option<&'v OperationVariable> {
    variables.iter().find(|v| v.name.eq_ignore_ascii_case(name))
}

fn pass_through(variables: &[OperationVariable], consumed: &[&str]) -> Map<String, Value> {
    let mut payload = Map::new();
    for var in variables {
        if consumed.iter().any(|c| c.eq_ignore_ascii_case(&var.name)) {
            continue;
        }
        payload
            .entry(var.name.clone())
            .or_insert_with(|| var.coerced_value());
    }
    payload
}

fn apply_override(
    variables: &[OperationVariable],
    overrides: &ArrayMappingsOverride,
    warnings: &mut Vec<MappingWarning>,
) -> Map<String, Value> {
    let mut packed = Map::new();
    let mut consumed: Vec<&str> = Vec::new();

    for (array_name, params) in overrides {
        let found: Option<Vec<&OperationVariable>> =
            params.iter().map(|p| find(variables, p)).collect();
        match found {
            Some(vars) => {
                consumed.extend(params.iter().map(String::as_str));
                packed.insert(
                    array_name.clone(),
                    Value::Array(vars.iter().map(|v| v.coerced_value()).collect()),
                );
            }
            None => warnings.push(MappingWarning::IncompleteArray(array_name.clone())),
        }
    }

    let mut payload = pass_through(variables, &consumed);
    payload.extend(packed);
    payload
}

fn apply_schema(
    variables: &[OperationVariable],
    structure: &SchemaStructure,
    warnings: &mut Vec<MappingWarning>,
) -> Map<String, Value> {
    let names: Vec<&str> = variables.iter().map(|v| v.name.as_str()).collect();
    let plan = FieldMappingResolver::resolve(&names, structure);
    let mut payload = Map::new();

    for (array_name, entries) in &plan.array_mappings {
        let mut packed = Vec::with_capacity(entries.len());
        for entry in entries {
            let value = match entry.param_name.as_deref().and_then(|p| find(variables, p)) {
                Some(var) => coerce_to_schema(
                    &var.name,
                    var.coerced_value(),
                    entry.item_type.as_deref(),
                    warnings,
                ),
                None => entry.default.clone().unwrap_or(Value::Null),
            };
            packed.push(value);
        }
        payload.insert(array_name.clone(), Value::Array(packed));
    }

    for (field, mapping) in &plan.simple_mappings {
        if let Some(var) = find(variables, &mapping.param_name) {
            let value = coerce_to_schema(
                field,
                var.coerced_value(),
                mapping.field_type.as_deref(),
                warnings,
            );
            payload.insert(field.clone(), value);
        }
    }

    warnings.extend(
        plan.incomplete_arrays
            .into_iter()
            .map(MappingWarning::IncompleteArray),
    );
    warnings.extend(plan.unmapped_params.into_iter().map(MappingWarning::Unmapped));
    for required in &structure.required_fields {
        if required != CORRELATION_FIELD && !payload.contains_key(required) {
            warnings.push(MappingWarning::MissingRequired(required.clone()));
        }
    }

    payload
}

/// Best-effort conversion of `value` to the schema's declared `type`.
///
/// Values that cannot be converted are returned unchanged; object fields
/// additionally record an [`MappingWarning::UncoercibleObject`].
pub fn coerce_to_schema(
    field: &str,
    value: Value,
    schema_type: Option<&str>,
    warnings: &mut Vec<MappingWarning>,
) -> Value {
    let Some(schema_type) = schema_type else {
        return value;
    };

    match (schema_type, value) {
        ("integer", Value::Number(n)) if !n.is_i64() && !n.is_u64() => {
            match n.as_f64().and_then(whole_f64_to_i64) {
                Some(i) => Value::from(i),
                None => Value::Number(n),
            }
        }
        ("integer", Value::String(s)) => match coerce_integer_text(s.trim()) {
            Some(n) => n,
            None => {
                warn!("Field {} is not a representable integer: {}", field, s);
                Value::String(s)
            }
        },
        ("number", Value::Number(n)) => match n.as_f64() {
            Some(f) => Value::from(f),
            None => Value::Number(n),
        },
        ("number", Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => Value::from(f),
            _ => Value::String(s),
        },
        ("boolean", Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(s),
        },
        ("string", v @ (Value::Number(_) | Value::Bool(_))) => Value::String(v.to_string()),
        ("array", Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                if let Ok(parsed @ Value::Array(_)) = serde_json::from_str::<Value>(trimmed) {
                    return parsed;
                }
            }
            Value::Array(vec![Value::String(s)])
        }
        ("array", v @ (Value::Number(_) | Value::Bool(_))) => Value::Array(vec![v]),
        ("object", Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.starts_with('{') && trimmed.ends_with('}') {
                if let Ok(parsed @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
                    return parsed;
                }
            }
            warnings.push(MappingWarning::UncoercibleObject(field.to_string()));
            Value::String(s)
        }
        ("object", v @ (Value::Number(_) | Value::Bool(_))) => {
            warnings.push(MappingWarning::UncoercibleObject(field.to_string()));
            v
        }
        (_, v) => v,
    }
}

/// Turn a terminal response payload into output variables.
///
/// Array fields the output schema describes positionally are unpacked into
/// one variable per position. `Uuid` is not echoed back.
pub fn build_response_variables(
    payload: &Value,
    output: Option<&SchemaStructure>,
) -> Vec<OperationVariable> {
    let Some(fields) = payload.as_object() else {
        if payload.is_null() {
            return Vec::new();
        }
        return vec![OperationVariable::new(
            "value",
            infer_value_type(payload),
            value_to_text(payload),
        )];
    };

    let mut outputs = Vec::new();
    for (key, value) in fields {
        if key.eq_ignore_ascii_case(CORRELATION_FIELD) {
            continue;
        }

        let positional = output.and_then(|s| s.array(key));
        if let (Some((_, items)), Value::Array(elements)) = (positional, value) {
            for (index, element) in elements.iter().enumerate() {
                let item = items.iter().find(|i| i.index == index);
                let name = item
                    .map(|i| i.title.clone())
                    .unwrap_or_else(|| format!("{}_{}", key, index));
                let declared = item.and_then(|i| {
                    value_type_for_schema(i.item_type.as_deref(), i.format.as_deref())
                });
                outputs.push(OperationVariable::new(
                    name,
                    declared.unwrap_or_else(|| infer_value_type(element)),
                    value_to_text(element),
                ));
            }
            continue;
        }

        let declared = output
            .and_then(|s| s.field(key))
            .and_then(|(_, t)| value_type_for_schema(t.field_type.as_deref(), t.format.as_deref()));
        outputs.push(OperationVariable::new(
            key.clone(),
            declared.unwrap_or_else(|| infer_value_type(value)),
            value_to_text(value),
        ));
    }
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use skillbridge_core::xs;

    fn position_schema() -> SchemaStructure {
        SchemaStructure::from_schema(&json!({
            "required": ["Position"],
            "properties": {
                "Position": {
                    "type": "array",
                    "minItems": 2,
                    "prefixItems": [
                        {"title": "X", "type": "number"},
                        {"title": "Y", "type": "number"},
                        {"title": "Theta", "type": "number"}
                    ]
                },
                "Speed": {"type": "number"},
                "Label": {"type": "string"},
                "Options": {"type": "object"}
            }
        }))
    }

    #[test]
    fn test_pass_through_coerces_by_value_type() {
        let vars = vec![
            OperationVariable::new("Count", xs::INT, "4"),
            OperationVariable::new("Ratio", xs::DOUBLE, "0.5"),
            OperationVariable::new("Enabled", xs::BOOLEAN, "true"),
            OperationVariable::string("Name", "tray"),
        ];
        let msg = compose_command("abc", &vars, MessageLayout::PassThrough);
        assert_eq!(
            Value::Object(msg.payload),
            json!({"Uuid": "abc", "Count": 4, "Ratio": 0.5, "Enabled": true, "Name": "tray"})
        );
        assert!(msg.warnings.is_empty());
    }

    #[test]
    fn test_pass_through_keeps_out_of_range_integers() {
        let vars = vec![
            OperationVariable::new("Big", "xs:unsignedLong", "18446744073709551615"),
            OperationVariable::new("Sci", xs::INT, "1e20"),
        ];
        let msg = compose_command("abc", &vars, MessageLayout::PassThrough);
        assert_eq!(msg.payload["Big"], json!(18446744073709551615u64));
        assert_eq!(msg.payload["Sci"], json!("1e20"));
    }

    #[test]
    fn test_coerce_to_schema_integer_range() {
        let mut w = Vec::new();
        assert_eq!(
            coerce_to_schema("n", json!("18446744073709551615"), Some("integer"), &mut w),
            json!(18446744073709551615u64)
        );
        assert_eq!(coerce_to_schema("n", json!("1e20"), Some("integer"), &mut w), json!("1e20"));
        assert_eq!(coerce_to_schema("n", json!(1e20), Some("integer"), &mut w), json!(1e20));
        assert_eq!(coerce_to_schema("n", json!("2.0"), Some("integer"), &mut w), json!(2));
        assert!(w.is_empty());
    }

    #[test]
    fn test_position_scenario() {
        let vars = vec![
            OperationVariable::new("X", xs::DOUBLE, "1.0"),
            OperationVariable::new("Y", xs::DOUBLE, "2.0"),
        ];
        let schema = position_schema();
        let msg = compose_command("id", &vars, MessageLayout::Schema(&schema));
        assert_eq!(msg.payload["Position"], json!([1.0, 2.0]));
        assert_eq!(msg.payload["Uuid"], json!("id"));
        assert_eq!(msg.payload.len(), 2);
    }

    #[test]
    fn test_schema_layout_drops_undeclared() {
        let vars = vec![
            OperationVariable::string("Speed", "0.25"),
            OperationVariable::string("Colour", "red"),
        ];
        let schema = position_schema();
        let msg = compose_command("id", &vars, MessageLayout::Schema(&schema));
        let keys: Vec<&str> = msg.payload.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Speed", "Uuid"]);
        assert_eq!(msg.payload["Speed"], json!(0.25));
        assert!(msg.warnings.contains(&MappingWarning::Unmapped("Colour".into())));
        assert!(msg.warnings.contains(&MappingWarning::MissingRequired("Position".into())));
    }

    #[test]
    fn test_missing_required_position_omits_array() {
        let vars = vec![OperationVariable::new("X", xs::DOUBLE, "1.0")];
        let schema = position_schema();
        let msg = compose_command("id", &vars, MessageLayout::Schema(&schema));
        assert!(!msg.payload.contains_key("Position"));
        assert!(msg.warnings.contains(&MappingWarning::IncompleteArray("Position".into())));
    }

    #[test]
    fn test_override_packs_in_listed_order() {
        let mut overrides = ArrayMappingsOverride::new();
        overrides.insert("Target".into(), vec!["B".into(), "A".into()]);
        let vars = vec![
            OperationVariable::new("A", xs::INT, "1"),
            OperationVariable::new("B", xs::INT, "2"),
            OperationVariable::string("Note", "x"),
        ];
        let msg = compose_command("id", &vars, MessageLayout::Override(&overrides));
        assert_eq!(
            Value::Object(msg.payload),
            json!({"Uuid": "id", "Target": [2, 1], "Note": "x"})
        );
    }

    #[test]
    fn test_override_missing_param_omits_array() {
        let mut overrides = ArrayMappingsOverride::new();
        overrides.insert("Target".into(), vec!["A".into(), "B".into()]);
        let vars = vec![OperationVariable::new("A", xs::INT, "1")];
        let msg = compose_command("id", &vars, MessageLayout::Override(&overrides));
        assert!(!msg.payload.contains_key("Target"));
        assert_eq!(msg.payload["A"], json!(1));
        assert_eq!(msg.warnings, vec![MappingWarning::IncompleteArray("Target".into())]);
    }

    #[test]
    fn test_coerce_to_schema() {
        let mut w = Vec::new();
        assert_eq!(coerce_to_schema("f", json!("[1, 2]"), Some("array"), &mut w), json!([1, 2]));
        assert_eq!(coerce_to_schema("f", json!("solo"), Some("array"), &mut w), json!(["solo"]));
        assert_eq!(coerce_to_schema("f", json!(3), Some("array"), &mut w), json!([3]));
        assert_eq!(
            coerce_to_schema("f", json!(r#"{"a": 1}"#), Some("object"), &mut w),
            json!({"a": 1})
        );
        assert_eq!(coerce_to_schema("f", json!(3), Some("number"), &mut w), json!(3.0));
        assert_eq!(coerce_to_schema("f", json!(3.0), Some("integer"), &mut w), json!(3));
        assert_eq!(coerce_to_schema("f", json!(7), Some("string"), &mut w), json!("7"));
        assert_eq!(coerce_to_schema("f", json!("TRUE"), Some("boolean"), &mut w), json!(true));
        assert_eq!(coerce_to_schema("f", json!("x"), None, &mut w), json!("x"));
        assert!(w.is_empty());

        assert_eq!(coerce_to_schema("opts", json!("fast"), Some("object"), &mut w), json!("fast"));
        assert_eq!(w, vec![MappingWarning::UncoercibleObject("opts".into())]);
    }

    #[test]
    fn test_string_field_parsed_for_object_schema() {
        let vars = vec![OperationVariable::string("Options", r#"{"mode": "fast"}"#)];
        let schema = position_schema();
        let msg = compose_command("id", &vars, MessageLayout::Schema(&schema));
        assert_eq!(msg.payload["Options"], json!({"mode": "fast"}));
    }

    #[test]
    fn test_response_variables_typed() {
        let payload = json!({"Uuid": "id", "State": "SUCCESS", "Weight": 2.1, "Count": 3});
        let outputs = build_response_variables(&payload, None);
        let weight = outputs.iter().find(|v| v.name == "Weight").unwrap();
        assert_eq!(weight.value_type, xs::DOUBLE);
        assert_eq!(weight.value, "2.1");
        let count = outputs.iter().find(|v| v.name == "Count").unwrap();
        assert_eq!(count.value_type, xs::INT);
        assert!(outputs.iter().all(|v| v.name != "Uuid"));
        assert!(outputs.iter().any(|v| v.name == "State"));
    }

    #[test]
    fn test_response_unpacks_arrays_and_uses_schema_types() {
        let schema = SchemaStructure::from_schema(&json!({
            "properties": {
                "Position": {
                    "type": "array",
                    "prefixItems": [{"title": "X", "type": "number"}, {"title": "Y", "type": "number"}]
                },
                "FinishedAt": {"type": "string", "format": "date-time"}
            }
        }));
        let payload = json!({"Position": [1, 2.5, 9], "FinishedAt": "2024-01-01T00:00:00Z"});
        let outputs = build_response_variables(&payload, Some(&schema));

        let names: Vec<&str> = outputs.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["FinishedAt", "X", "Y", "Position_2"]);
        assert_eq!(outputs[0].value_type, xs::DATE_TIME);
        assert_eq!(outputs[1].value_type, xs::DOUBLE);
        assert_eq!(outputs[1].value, "1");
        assert_eq!(outputs[3].value_type, xs::INT);
    }

    #[test]
    fn test_round_trip_named_values() {
        let vars = vec![
            OperationVariable::new("X", xs::DOUBLE, "1.5"),
            OperationVariable::new("Y", xs::DOUBLE, "-2.25"),
            OperationVariable::new("Theta", xs::DOUBLE, "0.5"),
            OperationVariable::new("Speed", xs::DOUBLE, "3.5"),
        ];
        let schema = position_schema();
        let msg = compose_command("id", &vars, MessageLayout::Schema(&schema));
        let outputs = build_response_variables(&Value::Object(msg.payload), Some(&schema));

        for var in &vars {
            let out = outputs.iter().find(|o| o.name == var.name).unwrap();
            assert_eq!(out.value, var.value);
            assert_eq!(out.value_type, xs::DOUBLE);
        }
    }

    #[test]
    fn test_non_object_response() {
        let outputs = build_response_variables(&json!(42), None);
        assert_eq!(outputs, vec![OperationVariable::new("value", xs::INT, "42")]);
        assert!(build_response_variables(&Value::Null, None).is_empty());
    }
}
