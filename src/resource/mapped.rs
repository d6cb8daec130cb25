use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::Resource;
use crate::error::{Result, SyncError};
use crate::item::{SyncItem, SYNC_KEY};
use crate::storage::Record;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MappedSettings {
    /// Item path holding the source identity.
    pub id_field: String,
    pub id_prefix: String,
    /// Record field name to item path. Empty copies every item field.
    pub fields: BTreeMap<String, String>,
    /// Record fields whose mapped values seed and match records on first sight.
    pub match_fields: Vec<String>,
    /// Item paths that must be non-empty, otherwise the item is skipped.
    pub required: Vec<String>,
    /// Item path to value; an item equal on any entry is ignored.
    pub skip_when: BTreeMap<String, Value>,
    pub bundle_field: Option<String>,
}

impl Default for MappedSettings {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            id_prefix: String::new(),
            fields: BTreeMap::new(),
            match_fields: Vec::new(),
            required: Vec::new(),
            skip_when: BTreeMap::new(),
            bundle_field: None,
        }
    }
}

/// Config-driven resource: field mapping, required fields and ignore rules.
pub struct MappedResource {
    settings: MappedSettings,
}

impl MappedResource {
    pub fn new(settings: MappedSettings) -> Self {
        Self { settings }
    }

    fn mapped_value(&self, field: &str, item: &SyncItem) -> Option<Value> {
        let path = self
            .settings
            .fields
            .get(field)
            .map(String::as_str)
            .unwrap_or(field);
        item.get(path).cloned()
    }
}

#[async_trait]
impl Resource for MappedResource {
    fn id(&self, item: &SyncItem) -> Result<String> {
        match item.get_string(&self.settings.id_field) {
            Some(id) if !id.is_empty() => Ok(format!("{}{}", self.settings.id_prefix, id)),
            _ => Err(SyncError::fail(format!(
                "Item has no value for id field '{}'.",
                self.settings.id_field
            ))),
        }
    }

    fn bundle(&self, item: &SyncItem) -> Option<String> {
        self.settings
            .bundle_field
            .as_deref()
            .and_then(|path| item.get_string(path))
            .filter(|b| !b.is_empty())
    }

    fn initial_values(&self, item: &SyncItem) -> Map<String, Value> {
        self.settings
            .match_fields
            .iter()
            .filter_map(|field| {
                self.mapped_value(field, item)
                    .map(|value| (field.clone(), value))
            })
            .collect()
    }

    async fn prepare_item(&self, item: &mut SyncItem) -> Result<()> {
        for (path, expected) in &self.settings.skip_when {
            if item.get(path) == Some(expected) {
                return Err(SyncError::ignore(format!("{} is {}", path, expected)));
            }
        }
        for path in &self.settings.required {
            if item.is_empty_at(path) {
                return Err(SyncError::skip(format!(
                    "Missing required field '{}'.",
                    path
                )));
            }
        }
        Ok(())
    }

    async fn process_item(&self, record: &mut Record, item: &SyncItem) -> Result<()> {
        if self.settings.fields.is_empty() {
            for (key, value) in item.fields() {
                if key != SYNC_KEY {
                    record.set(key, value.clone());
                }
            }
            return Ok(());
        }
        for (field, path) in &self.settings.fields {
            record.set(field, item.get(path).cloned().unwrap_or(Value::Null));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resource(settings: Value) -> MappedResource {
        MappedResource::new(serde_json::from_value(settings).unwrap())
    }

    fn item(value: Value) -> SyncItem {
        SyncItem::from_value(value)
    }

    #[tokio::test]
    async fn maps_fields_by_path() {
        let mapped = resource(json!({
            "id_field": "code",
            "id_prefix": "crm-",
            "fields": {"title": "name", "city": "address.city"}
        }));
        let source = item(json!({"code": 12, "name": "Acme", "address": {"city": "Delft"}}));
        assert_eq!(mapped.id(&source).unwrap(), "crm-12");

        let mut record = Record::new("company", "company", Map::new());
        mapped.process_item(&mut record, &source).await.unwrap();
        assert_eq!(record.fields, *json!({"city": "Delft", "title": "Acme"}).as_object().unwrap());
    }

    #[tokio::test]
    async fn copies_everything_without_a_mapping() {
        let mapped = resource(json!({}));
        let mut source = item(json!({"id": "a", "n": 1}));
        source.set(SYNC_KEY, "0");
        let mut record = Record::new("node", "node", Map::new());
        mapped.process_item(&mut record, &source).await.unwrap();
        assert_eq!(record.get("n"), Some(&json!(1)));
        assert!(record.get(SYNC_KEY).is_none());
    }

    #[tokio::test]
    async fn prepare_classifies_unusable_items() {
        let mapped = resource(json!({
            "required": ["email"],
            "skip_when": {"status": "deleted"}
        }));
        let mut gone = item(json!({"id": "1", "status": "deleted"}));
        assert!(matches!(mapped.prepare_item(&mut gone).await, Err(SyncError::Ignore(_))));
        let mut missing = item(json!({"id": "2", "email": ""}));
        assert!(matches!(mapped.prepare_item(&mut missing).await, Err(SyncError::Skip(_))));
        let mut fine = item(json!({"id": "3", "email": "x@y.z"}));
        assert!(mapped.prepare_item(&mut fine).await.is_ok());
        assert!(matches!(mapped.id(&item(json!({}))), Err(SyncError::Fail(_))));
    }

    #[test]
    fn match_fields_use_mapped_values() {
        let mapped = resource(json!({
            "fields": {"email": "contact.email"},
            "match_fields": ["email"]
        }));
        let values = mapped.initial_values(&item(json!({"contact": {"email": "a@b.c"}})));
        assert_eq!(values.get("email"), Some(&json!("a@b.c")));
    }
}
