use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SyncError};

/// Plugin id plus its free-form settings table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub plugin: String,
    #[serde(default)]
    pub settings: Value,
}

impl PluginConfig {
    pub fn new(plugin: impl Into<String>, settings: Value) -> Self {
        Self {
            plugin: plugin.into(),
            settings,
        }
    }

    /// Overlays `key = value` onto the settings, turning null settings into a table.
    pub fn with_setting(mut self, key: &str, value: Value) -> Self {
        if !self.settings.is_object() {
            self.settings = Value::Object(Default::default());
        }
        if let Value::Object(map) = &mut self.settings {
            map.insert(key.to_string(), value);
        }
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_cron() -> String {
    "00:00".to_string()
}

fn default_days() -> String {
    "mon,tue,wed,thu,fri".to_string()
}

fn default_resource() -> PluginConfig {
    PluginConfig::new("mapped", Value::Null)
}

/// Static configuration of one sync resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_true")]
    pub status: bool,
    pub entity_type: String,
    #[serde(default)]
    pub bundle: String,
    /// Group whose stale identities cleanup removes. Defaults to the resource id.
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub cleanup: bool,
    #[serde(default)]
    pub reset: bool,
    /// Comma separated `HH:MM` times; empty disables scheduling.
    #[serde(default = "default_cron")]
    pub cron: String,
    #[serde(default = "default_days")]
    pub day: String,
    #[serde(default)]
    pub no_ui: bool,
    #[serde(default)]
    pub weight: i32,
    #[serde(default)]
    pub run_on_empty: bool,
    pub fetcher: PluginConfig,
    pub parser: PluginConfig,
    #[serde(default = "default_resource")]
    pub resource: PluginConfig,
}

impl ResourceDefinition {
    pub fn label(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }

    /// Bundle for new records; falls back to the entity type.
    pub fn bundle(&self) -> &str {
        if self.bundle.is_empty() {
            &self.entity_type
        } else {
            &self.bundle
        }
    }

    pub fn group(&self) -> &str {
        self.group.as_deref().unwrap_or(&self.id)
    }

    pub fn queue_name(&self) -> String {
        format!("sync_{}", self.id)
    }

    pub fn cron_times(&self) -> Vec<&str> {
        split_list(&self.cron)
    }

    pub fn cron_days(&self) -> Vec<&str> {
        split_list(&self.day)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(SyncError::MissingField("resource.id".to_string()));
        }
        if self.entity_type.trim().is_empty() {
            return Err(SyncError::Config(format!(
                "resource '{}' has no entity_type",
                self.id
            )));
        }
        if self.fetcher.plugin.is_empty() || self.parser.plugin.is_empty() {
            return Err(SyncError::Config(format!(
                "resource '{}' needs both a fetcher and a parser plugin",
                self.id
            )));
        }
        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<&str> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Enabled first, scheduled first, then weight, then label.
fn compare(a: &ResourceDefinition, b: &ResourceDefinition) -> Ordering {
    b.status
        .cmp(&a.status)
        .then_with(|| a.cron.is_empty().cmp(&b.cron.is_empty()))
        .then_with(|| a.weight.cmp(&b.weight))
        .then_with(|| a.label().cmp(b.label()))
}

/// The configured resources in display order.
#[derive(Debug, Clone, Default)]
pub struct ResourceManager {
    definitions: Vec<ResourceDefinition>,
}

impl ResourceManager {
    pub fn new(mut definitions: Vec<ResourceDefinition>) -> Result<Self> {
        for (i, definition) in definitions.iter().enumerate() {
            definition.validate()?;
            if definitions[..i].iter().any(|d| d.id == definition.id) {
                return Err(SyncError::Config(format!(
                    "duplicate resource id '{}'",
                    definition.id
                )));
            }
        }
        definitions.sort_by(compare);
        Ok(Self { definitions })
    }

    pub fn definitions(&self) -> &[ResourceDefinition] {
        &self.definitions
    }

    pub fn get(&self, id: &str) -> Option<&ResourceDefinition> {
        self.definitions.iter().find(|d| d.id == id)
    }

    pub fn require(&self, id: &str) -> Result<&ResourceDefinition> {
        self.get(id)
            .ok_or_else(|| SyncError::Config(format!("unknown resource '{}'", id)))
    }

    pub fn active(&self) -> impl Iterator<Item = &ResourceDefinition> {
        self.definitions.iter().filter(|d| d.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(value: Value) -> ResourceDefinition {
        serde_json::from_value(value).unwrap()
    }

    fn minimal(id: &str) -> Value {
        json!({
            "id": id,
            "entity_type": "node",
            "fetcher": {"plugin": "http"},
            "parser": {"plugin": "json"}
        })
    }

    #[test]
    fn defaults_are_applied() {
        let def = definition(minimal("people"));
        assert!(def.status);
        assert_eq!(def.cron, "00:00");
        assert_eq!(def.cron_days(), vec!["mon", "tue", "wed", "thu", "fri"]);
        assert_eq!(def.resource.plugin, "mapped");
        assert_eq!(def.label(), "people");
        assert_eq!(def.bundle(), "node");
        assert_eq!(def.group(), "people");
        assert_eq!(def.queue_name(), "sync_people");
    }

    #[test]
    fn manager_sorts_and_rejects_duplicates() {
        let mut disabled = minimal("a");
        disabled["status"] = json!(false);
        let mut manual = minimal("b");
        manual["cron"] = json!("");
        let mut heavy = minimal("c");
        heavy["weight"] = json!(5);
        let light = minimal("d");

        let manager = ResourceManager::new(
            [disabled, manual, heavy, light]
                .into_iter()
                .map(definition)
                .collect(),
        )
        .unwrap();
        let order: Vec<_> = manager.definitions().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(order, vec!["d", "c", "b", "a"]);
        assert_eq!(manager.active().count(), 3);

        let dupes = vec![definition(minimal("x")), definition(minimal("x"))];
        assert!(ResourceManager::new(dupes).is_err());
    }

    #[test]
    fn settings_overlay_creates_a_table() {
        let config = PluginConfig::new("file_upload", Value::Null)
            .with_setting("path", json!("/tmp/upload.csv"));
        assert_eq!(config.settings, json!({"path": "/tmp/upload.csv"}));
    }
}
