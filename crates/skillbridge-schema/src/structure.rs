//! Flat structure description of a resolved schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Declared type of a simple (non-positional) field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldType {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// One position of a `prefixItems` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayItem {
    pub index: usize,
    /// Item `title`, or `{field}_{index}` when untitled
    pub title: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Position is at or beyond `minItems`
    pub optional: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Immutable view of a schema's top-level properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaStructure {
    pub required_fields: Vec<String>,
    pub field_types: BTreeMap<String, FieldType>,
    pub array_fields: BTreeMap<String, Vec<ArrayItem>>,
}

impl SchemaStructure {
    /// Build the structure of an already-resolved schema.
    pub fn from_schema(schema: &Value) -> Self {
        let required_fields = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|req| {
                req.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut field_types = BTreeMap::new();
        let mut array_fields = BTreeMap::new();

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (name, prop) in properties {
                match positional_items(prop) {
                    Some(items) => {
                        let min_items = prop
                            .get("minItems")
                            .and_then(Value::as_u64)
                            .unwrap_or(0) as usize;
                        let entries = items
                            .iter()
                            .enumerate()
                            .map(|(index, item)| ArrayItem {
                                index,
                                title: item
                                    .get("title")
                                    .and_then(Value::as_str)
                                    .map(str::to_string)
                                    .unwrap_or_else(|| format!("{}_{}", name, index)),
                                item_type: schema_type(item),
                                format: string_field(item, "format"),
                                optional: index >= min_items,
                                default: item.get("default").cloned(),
                            })
                            .collect();
                        array_fields.insert(name.clone(), entries);
                    }
                    None => {
                        field_types.insert(
                            name.clone(),
                            FieldType {
                                field_type: schema_type(prop),
                                format: string_field(prop, "format"),
                            },
                        );
                    }
                }
            }
        }

        Self {
            required_fields,
            field_types,
            array_fields,
        }
    }

    /// Case-insensitive lookup of a simple field.
    pub fn field(&self, name: &str) -> Option<(&str, &FieldType)> {
        self.field_types
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Case-insensitive lookup of a positional array field.
    pub fn array(&self, name: &str) -> Option<(&str, &[ArrayItem])> {
        self.array_fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Whether the schema declares no properties at all.
    pub fn is_empty(&self) -> bool {
        self.field_types.is_empty() && self.array_fields.is_empty()
    }
}

/// `prefixItems` of an array property (or the draft-07 tuple form `items: [...]`).
fn positional_items(prop: &Value) -> Option<&Vec<Value>> {
    if schema_type(prop).as_deref() != Some("array") {
        return None;
    }
    prop.get("prefixItems")
        .and_then(Value::as_array)
        .or_else(|| prop.get("items").and_then(Value::as_array))
}

/// Declared `type`; for type unions the first non-null member.
pub(crate) fn schema_type(node: &Value) -> Option<String> {
    match node.get("type") {
        Some(Value::String(t)) => Some(t.clone()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null")
            .map(str::to_string),
        _ => {
            if node.get("properties").is_some() {
                Some("object".to_string())
            } else if node.get("prefixItems").is_some() || node.get("items").is_some() {
                Some("array".to_string())
            } else {
                None
            }
        }
    }
}

fn string_field(node: &Value, key: &str) -> Option<String> {
    node.get(key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn move_schema() -> Value {
        json!({
            "type": "object",
            "required": ["Position"],
            "properties": {
                "Position": {
                    "type": "array",
                    "minItems": 2,
                    "prefixItems": [
                        {"title": "X", "type": "number"},
                        {"title": "Y", "type": "number"},
                        {"title": "Theta", "type": "number", "default": 0.0}
                    ]
                },
                "Speed": {"type": ["number", "null"]},
                "Deadline": {"type": "string", "format": "date-time"},
                "Tags": {"type": "array", "items": {"type": "string"}}
            }
        })
    }

    #[test]
    fn test_extracts_array_fields() {
        let s = SchemaStructure::from_schema(&move_schema());
        let items = &s.array_fields["Position"];
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].title, "X");
        assert!(!items[0].optional);
        assert!(!items[1].optional);
        assert!(items[2].optional);
        assert_eq!(items[2].default, Some(json!(0.0)));
        assert_eq!(items[2].item_type.as_deref(), Some("number"));
        assert!(!s.field_types.contains_key("Position"));
    }

    #[test]
    fn test_extracts_simple_fields() {
        let s = SchemaStructure::from_schema(&move_schema());
        assert_eq!(s.required_fields, vec!["Position"]);
        assert_eq!(s.field_types["Speed"].field_type.as_deref(), Some("number"));
        assert_eq!(s.field_types["Deadline"].format.as_deref(), Some("date-time"));
        // arrays without prefixItems stay simple fields
        assert_eq!(s.field_types["Tags"].field_type.as_deref(), Some("array"));
    }

    #[test]
    fn test_untitled_items_and_missing_min_items() {
        let schema = json!({
            "properties": {
                "Pose": {"type": "array", "prefixItems": [{"type": "number"}, {"type": "number"}]}
            }
        });
        let s = SchemaStructure::from_schema(&schema);
        let items = &s.array_fields["Pose"];
        assert_eq!(items[0].title, "Pose_0");
        assert_eq!(items[1].title, "Pose_1");
        assert!(items.iter().all(|i| i.optional));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let s = SchemaStructure::from_schema(&move_schema());
        assert_eq!(s.field("speed").map(|(k, _)| k), Some("Speed"));
        assert_eq!(s.array("POSITION").map(|(_, v)| v.len()), Some(3));
        assert!(s.field("unknown").is_none());
    }

    #[test]
    fn test_empty_schema() {
        let s = SchemaStructure::from_schema(&json!({"type": "object"}));
        assert!(s.is_empty());
        assert!(s.required_fields.is_empty());
    }
}
