use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{Fetcher, Paging, Payload};
use crate::error::{Result, SyncError};
use crate::item::SyncItemCollection;
use crate::storage::EntityStore;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EntitySettings {
    pub entity_type: String,
    pub bundle: Option<String>,
    pub properties: Map<String, Value>,
    #[serde(flatten)]
    pub paging: Paging,
}

/// Feeds local records back into a resource, one `{ "entity": ... }` item per match.
pub struct EntityFetcher {
    settings: EntitySettings,
    entities: Arc<dyn EntityStore>,
}

impl EntityFetcher {
    pub fn new(settings: EntitySettings, entities: Arc<dyn EntityStore>) -> Result<Self> {
        if settings.entity_type.is_empty() {
            return Err(SyncError::MissingField("entity_type".to_string()));
        }
        Ok(Self { settings, entities })
    }
}

#[async_trait]
impl Fetcher for EntityFetcher {
    fn paging(&self) -> &Paging {
        &self.settings.paging
    }

    async fn fetch(&self, _page: u32, _previous: &SyncItemCollection) -> Result<Payload> {
        let records = self
            .entities
            .load_by_properties(
                &self.settings.entity_type,
                self.settings.bundle.as_deref(),
                &self.settings.properties,
            )
            .await?;
        debug!(
            "EntityFetcher: {} matches for {}",
            records.len(),
            self.settings.entity_type
        );
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            out.push(json!({ "entity": serde_json::to_value(&record)? }));
        }
        Ok(Payload::Records(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, Record, SqliteEntityStore};

    #[tokio::test]
    async fn matching_records_are_wrapped() {
        let store = Arc::new(SqliteEntityStore::new(Database::open_in_memory().unwrap()));
        for status in ["open", "closed", "open"] {
            let mut fields = Map::new();
            fields.insert("status".to_string(), json!(status));
            let mut record = Record::new("ticket", "ticket", fields);
            store.save(&mut record, 1).await.unwrap();
        }
        let mut properties = Map::new();
        properties.insert("status".to_string(), json!("open"));
        let fetcher = EntityFetcher::new(
            EntitySettings {
                entity_type: "ticket".to_string(),
                properties,
                ..EntitySettings::default()
            },
            store,
        )
        .unwrap();

        let Payload::Records(records) = fetcher
            .fetch(1, &SyncItemCollection::default())
            .await
            .unwrap()
        else {
            panic!("expected records");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["entity"]["fields"]["status"], json!("open"));
    }
}
