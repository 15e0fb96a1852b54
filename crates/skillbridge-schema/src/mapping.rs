//! Parameter-name to schema-field mapping.
//!
//! Matching is exact but case-insensitive. Positional arrays are resolved
//! first, then the remaining simple fields. Resolution never fails: an
//! array with an unmatched required position is left out of the plan and
//! parameters nothing matched are reported as unmapped.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::structure::SchemaStructure;

/// One packed position of an array field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayMapping {
    /// Parameter supplying the value; `None` when the schema default fills the slot
    pub param_name: Option<String>,
    pub index: usize,
    pub optional: bool,
    pub default: Option<Value>,
    pub item_type: Option<String>,
}

/// Mapping of a simple schema field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleMapping {
    pub param_name: String,
    pub field_type: Option<String>,
    pub format: Option<String>,
}

/// Per-invocation packing plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMappingPlan {
    /// Array field -> positions in index order
    pub array_mappings: BTreeMap<String, Vec<ArrayMapping>>,
    /// Schema field -> parameter
    pub simple_mappings: BTreeMap<String, SimpleMapping>,
    /// Parameters excluded from the message, in input order
    pub unmapped_params: Vec<String>,
    /// Arrays dropped because a required position had no parameter
    pub incomplete_arrays: Vec<String>,
}

impl FieldMappingPlan {
    /// Whether the plan puts nothing on the wire besides the correlation id.
    pub fn is_empty(&self) -> bool {
        self.array_mappings.is_empty() && self.simple_mappings.is_empty()
    }
}

/// Builds [`FieldMappingPlan`]s.
pub struct FieldMappingResolver;

impl FieldMappingResolver {
    /// Map `param_names` onto `structure`.
    pub fn resolve<S: AsRef<str>>(param_names: &[S], structure: &SchemaStructure) -> FieldMappingPlan {
        // lower-case name -> original name; first occurrence wins
        let mut by_lower: HashMap<String, &str> = HashMap::new();
        for name in param_names {
            by_lower
                .entry(name.as_ref().to_lowercase())
                .or_insert(name.as_ref());
        }

        let mut used: HashSet<&str> = HashSet::new();
        let mut plan = FieldMappingPlan::default();

        for (array_name, items) in &structure.array_fields {
            // A parameter named like the array itself carries the whole array
            if let Some(&param) = by_lower.get(&array_name.to_lowercase()) {
                if used.insert(param) {
                    plan.simple_mappings.insert(
                        array_name.clone(),
                        SimpleMapping {
                            param_name: param.to_string(),
                            field_type: Some("array".to_string()),
                            format: None,
                        },
                    );
                    continue;
                }
            }

            let mut ordered: Vec<_> = items.iter().collect();
            ordered.sort_by_key(|item| item.index);

            let mut entries = Vec::new();
            let mut claimed = Vec::new();
            let mut complete = true;

            for item in ordered {
                let matched = by_lower
                    .get(&item.title.to_lowercase())
                    .copied()
                    .filter(|p| !used.contains(p) && !claimed.contains(p));

                match matched {
                    Some(param) => {
                        claimed.push(param);
                        entries.push(ArrayMapping {
                            param_name: Some(param.to_string()),
                            index: item.index,
                            optional: item.optional,
                            default: item.default.clone(),
                            item_type: item.item_type.clone(),
                        });
                    }
                    None if !item.optional => {
                        complete = false;
                        break;
                    }
                    None if item.default.is_some() => entries.push(ArrayMapping {
                        param_name: None,
                        index: item.index,
                        optional: true,
                        default: item.default.clone(),
                        item_type: item.item_type.clone(),
                    }),
                    // later positions cannot be placed without this one
                    None => break,
                }
            }

            if !complete {
                if !claimed.is_empty() {
                    plan.incomplete_arrays.push(array_name.clone());
                }
                continue;
            }
            if claimed.is_empty() {
                continue;
            }

            // trailing default-only slots carry no caller data
            while entries
                .last()
                .is_some_and(|e| e.param_name.is_none() && e.optional)
            {
                entries.pop();
            }

            used.extend(claimed);
            plan.array_mappings.insert(array_name.clone(), entries);
        }

        for (field, field_type) in &structure.field_types {
            if let Some(&param) = by_lower.get(&field.to_lowercase()) {
                if used.insert(param) {
                    plan.simple_mappings.insert(
                        field.clone(),
                        SimpleMapping {
                            param_name: param.to_string(),
                            field_type: field_type.field_type.clone(),
                            format: field_type.format.clone(),
                        },
                    );
                }
            }
        }

        plan.unmapped_params = param_names
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| !used.contains(name))
            .map(str::to_string)
            .collect();

        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn structure() -> SchemaStructure {
        SchemaStructure::from_schema(&json!({
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
                "Mode": {"type": "string"}
            }
        }))
    }

    #[test]
    fn test_packs_required_positions() {
        let plan = FieldMappingResolver::resolve(&["X", "Y"], &structure());
        let pos = &plan.array_mappings["Position"];
        assert_eq!(pos.len(), 2);
        assert_eq!(pos[0].param_name.as_deref(), Some("X"));
        assert_eq!(pos[1].param_name.as_deref(), Some("Y"));
        assert!(plan.unmapped_params.is_empty());
    }

    #[test]
    fn test_missing_required_position_omits_array() {
        let plan = FieldMappingResolver::resolve(&["X", "Theta", "Speed"], &structure());
        assert!(!plan.array_mappings.contains_key("Position"));
        assert_eq!(plan.incomplete_arrays, vec!["Position"]);
        assert_eq!(plan.unmapped_params, vec!["X", "Theta"]);
        assert!(plan.simple_mappings.contains_key("Speed"));
    }

    #[test]
    fn test_case_insensitive_simple_fields_and_unmapped() {
        let plan = FieldMappingResolver::resolve(&["speed", "MODE", "Colour"], &structure());
        assert_eq!(plan.simple_mappings["Speed"].param_name, "speed");
        assert_eq!(plan.simple_mappings["Speed"].field_type.as_deref(), Some("number"));
        assert_eq!(plan.simple_mappings["Mode"].param_name, "MODE");
        assert_eq!(plan.unmapped_params, vec!["Colour"]);
    }

    #[test]
    fn test_array_name_parameter_is_simple() {
        let plan = FieldMappingResolver::resolve(&["Position", "X"], &structure());
        assert_eq!(plan.simple_mappings["Position"].field_type.as_deref(), Some("array"));
        assert!(plan.array_mappings.is_empty());
        assert_eq!(plan.unmapped_params, vec!["X"]);
    }

    #[test]
    fn test_defaults_fill_gaps() {
        let s = SchemaStructure::from_schema(&json!({
            "properties": {
                "Pose": {
                    "type": "array",
                    "minItems": 1,
                    "prefixItems": [
                        {"title": "X", "type": "number"},
                        {"title": "Y", "type": "number", "default": 0},
                        {"title": "Z", "type": "number"},
                        {"title": "W", "type": "number", "default": 1}
                    ]
                }
            }
        }));
        let plan = FieldMappingResolver::resolve(&["X", "Z"], &s);
        let pose = &plan.array_mappings["Pose"];
        assert_eq!(pose.len(), 3);
        assert!(pose[1].param_name.is_none());
        assert_eq!(pose[1].default, Some(json!(0)));
        assert_eq!(pose[2].param_name.as_deref(), Some("Z"));
    }

    #[test]
    fn test_gap_without_default_stops_packing() {
        let plan = FieldMappingResolver::resolve(&["X", "Y", "Extra"], &structure());
        assert_eq!(plan.array_mappings["Position"].len(), 2);

        let s = SchemaStructure::from_schema(&json!({
            "properties": {
                "P": {"type": "array", "prefixItems": [{"title": "A"}, {"title": "B"}, {"title": "C"}]}
            }
        }));
        let plan = FieldMappingResolver::resolve(&["A", "C"], &s);
        assert_eq!(plan.array_mappings["P"].len(), 1);
        assert_eq!(plan.unmapped_params, vec!["C"]);
    }

    #[test]
    fn test_no_array_fields_only_declared_fields() {
        let s = SchemaStructure::from_schema(&json!({
            "properties": {"A": {"type": "string"}, "B": {"type": "integer"}}
        }));
        let params = ["A", "B", "C", "D"];
        let plan = FieldMappingResolver::resolve(&params, &s);
        let mapped: Vec<_> = plan.simple_mappings.keys().cloned().collect();
        assert_eq!(mapped, vec!["A", "B"]);
        assert_eq!(plan.unmapped_params, vec!["C", "D"]);
    }

    #[test]
    fn test_empty_inputs() {
        let plan = FieldMappingResolver::resolve::<&str>(&[], &structure());
        assert!(plan.is_empty());
        assert!(plan.unmapped_params.is_empty());
    }
}
