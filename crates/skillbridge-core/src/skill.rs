//! Per-skill topic and schema bindings.
//!
//! The table is populated wholesale by an external registration flow.
//! Readers always see a complete snapshot: writers build a new map and swap
//! the `Arc`, they never mutate the map a reader holds.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::{BridgeError, Result};

/// Explicit array packing: array field name -> ordered parameter names.
pub type ArrayMappingsOverride = BTreeMap<String, Vec<String>>;

/// Topic and schema configuration of one skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillTopicConfig {
    /// Topic the command message is published on
    pub command_topic: String,
    /// Topic the device answers on; absent means the skill is one-way
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema_url: Option<String>,
    /// `false` marks a long-running skill that reports progress
    #[serde(default = "default_synchronous")]
    pub synchronous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_mappings_override: Option<ArrayMappingsOverride>,
    /// Submodel holding the progress property of an asynchronous skill
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_submodel_id: Option<String>,
    /// Per-skill wait override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,
}

fn default_synchronous() -> bool {
    true
}

impl SkillTopicConfig {
    /// Create a synchronous skill configuration.
    pub fn new(command_topic: impl Into<String>, response_topic: Option<String>) -> Self {
        Self {
            command_topic: command_topic.into(),
            response_topic,
            input_schema_url: None,
            output_schema_url: None,
            synchronous: true,
            array_mappings_override: None,
            state_submodel_id: None,
            timeout_secs: None,
        }
    }

    /// Set the input/output schema references.
    pub fn with_schemas(mut self, input: Option<String>, output: Option<String>) -> Self {
        self.input_schema_url = input;
        self.output_schema_url = output;
        self
    }

    /// Mark the skill as asynchronous (progress-reporting).
    pub fn asynchronous(mut self) -> Self {
        self.synchronous = false;
        self
    }
}

/// Lookup key of the topic table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SkillKey {
    pub asset_id: String,
    pub skill_name: String,
}

impl SkillKey {
    pub fn new(asset_id: impl Into<String>, skill_name: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            skill_name: skill_name.into(),
        }
    }
}

pub type SkillMap = HashMap<SkillKey, SkillTopicConfig>;

/// `(assetId, skillName) -> SkillTopicConfig` table, swapped atomically.
#[derive(Debug, Default)]
pub struct SkillTopicTable {
    inner: RwLock<Arc<SkillMap>>,
}

impl SkillTopicTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table pre-populated with entries.
    pub fn with_entries(entries: SkillMap) -> Self {
        Self {
            inner: RwLock::new(Arc::new(entries)),
        }
    }

    /// Look up one skill.
    pub fn get(&self, asset_id: &str, skill_name: &str) -> Option<SkillTopicConfig> {
        let snapshot = self.snapshot();
        snapshot.get(&SkillKey::new(asset_id, skill_name)).cloned()
    }

    /// Current immutable snapshot.
    pub fn snapshot(&self) -> Arc<SkillMap> {
        self.inner.read().clone()
    }

    /// Replace the whole table.
    pub fn replace(&self, entries: SkillMap) {
        let count = entries.len();
        *self.inner.write() = Arc::new(entries);
        info!("Skill topic table replaced ({} skills)", count);
    }

    /// Merge entries into the table; existing keys are overwritten.
    pub fn merge(&self, entries: SkillMap) {
        let mut guard = self.inner.write();
        let mut next: SkillMap = (**guard).clone();
        let added = entries.len();
        next.extend(entries);
        *guard = Arc::new(next);
        info!("Skill topic table merged {} skills ({} total)", added, guard.len());
    }

    /// Number of configured skills.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct assets with at least one configured skill.
    pub fn asset_count(&self) -> usize {
        let snapshot = self.snapshot();
        snapshot
            .keys()
            .map(|k| k.asset_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Parse the nested `{assetId: {skillName: config}}` JSON form.
    pub fn parse_json(text: &str) -> Result<SkillMap> {
        let nested: BTreeMap<String, BTreeMap<String, SkillTopicConfig>> =
            serde_json::from_str(text)
                .map_err(|e| BridgeError::Validation(format!("Invalid skill table: {}", e)))?;

        Ok(nested
            .into_iter()
            .flat_map(|(asset_id, skills)| {
                skills
                    .into_iter()
                    .map(move |(skill, cfg)| (SkillKey::new(asset_id.clone(), skill), cfg))
            })
            .collect())
    }

    /// Read a skill table file.
    pub fn load_json_file(path: impl AsRef<Path>) -> Result<SkillMap> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Validation(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::parse_json(&text)
    }
}

/// Derive a response topic by replacing the command marker segment with the data marker.
///
/// If no segment equals the command marker, the data marker is appended.
pub fn derive_response_topic(command_topic: &str, command_marker: &str, data_marker: &str) -> String {
    let mut replaced = false;
    let segments: Vec<&str> = command_topic
        .split('/')
        .map(|segment| {
            if segment == command_marker {
                replaced = true;
                data_marker
            } else {
                segment
            }
        })
        .collect();

    if replaced {
        segments.join("/")
    } else {
        format!("{}/{}", command_topic.trim_end_matches('/'), data_marker)
    }
}

/// Conventional `(command, response)` topics of a skill with no registered configuration.
pub fn conventional_topics(
    asset_id: &str,
    skill_name: &str,
    command_marker: &str,
    data_marker: &str,
) -> (String, String) {
    let prefix = format!("{}/skills/{}", asset_id, skill_name);
    (
        format!("{}/{}", prefix, command_marker),
        format!("{}/{}", prefix, data_marker),
    )
}
