use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use super::{EntityStore, LinkWrite, Record, SaveStatus, SyncStorage};
use crate::clock::Clock;
use crate::error::{Result, SyncError};

/// Sync context for a resolved record. It travels next to the record and is never stored on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncLink {
    pub id: String,
    pub group: String,
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntity {
    pub record: Record,
    pub link: SyncLink,
}

/// Finds, creates and saves local records for source identities.
#[derive(Clone)]
pub struct EntityProvider {
    sync: Arc<dyn SyncStorage>,
    entities: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
}

impl EntityProvider {
    pub fn new(
        sync: Arc<dyn SyncStorage>,
        entities: Arc<dyn EntityStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sync,
            entities,
            clock,
        }
    }

    /// Resolves an identity through the `sync` table first, then by matching `values`.
    pub async fn get(
        &self,
        id: &str,
        entity_type: &str,
        bundle: &str,
        values: &Map<String, Value>,
        group: &str,
    ) -> Result<Option<ResolvedEntity>> {
        if let Some(row) = self.sync.load_identity(id, entity_type).await? {
            if let Some(mut record) = self.entities.load(entity_type, row.entity_id).await? {
                record.changed = self.clock.now();
                return Ok(Some(ResolvedEntity {
                    record,
                    link: SyncLink {
                        id: id.to_string(),
                        group: group.to_string(),
                        locked: row.locked,
                    },
                }));
            }
            debug!(
                "Identity {} points at missing {}:{}",
                id, entity_type, row.entity_id
            );
        }

        if values.is_empty() {
            return Ok(None);
        }
        let bundle = (!bundle.is_empty()).then_some(bundle);
        let mut matches = self
            .entities
            .load_by_properties(entity_type, bundle, values)
            .await?;
        if matches.is_empty() {
            return Ok(None);
        }
        let mut record = matches.swap_remove(0);
        record.changed = self.clock.now();
        debug!("Matched {} to existing {} by properties", id, record.label());
        Ok(Some(ResolvedEntity {
            record,
            link: SyncLink {
                id: id.to_string(),
                group: group.to_string(),
                locked: false,
            },
        }))
    }

    /// Like [`get`](Self::get) but falls back to a new unsaved record pre-filled with `values`.
    pub async fn get_or_new(
        &self,
        id: &str,
        entity_type: &str,
        bundle: &str,
        values: &Map<String, Value>,
        group: &str,
    ) -> Result<ResolvedEntity> {
        if let Some(found) = self.get(id, entity_type, bundle, values, group).await? {
            return Ok(found);
        }
        let mut record = Record::new(entity_type, bundle, Map::new());
        for (path, value) in values {
            record.set(path, value.clone());
        }
        Ok(ResolvedEntity {
            record,
            link: SyncLink {
                id: id.to_string(),
                group: group.to_string(),
                locked: false,
            },
        })
    }

    /// Like [`get_or_new`](Self::get_or_new) but saves a new record straight away.
    pub async fn get_or_create(
        &self,
        id: &str,
        entity_type: &str,
        bundle: &str,
        values: &Map<String, Value>,
        group: &str,
    ) -> Result<ResolvedEntity> {
        let mut resolved = self
            .get_or_new(id, entity_type, bundle, values, group)
            .await?;
        if resolved.record.is_new() {
            self.save(&mut resolved).await?;
        }
        Ok(resolved)
    }

    /// Persists the record, then its identity link and group timestamp.
    pub async fn save(&self, resolved: &mut ResolvedEntity) -> Result<SaveStatus> {
        let now = self.clock.now();
        let status = self.entities.save(&mut resolved.record, now).await?;
        self.refresh_link(resolved).await?;
        Ok(status)
    }

    /// Re-stamps the identity link of an already saved record without touching the record.
    pub async fn refresh_link(&self, resolved: &ResolvedEntity) -> Result<()> {
        let entity_id = resolved.record.entity_id.ok_or_else(|| {
            SyncError::storage(format!("cannot link unsaved record for {}", resolved.link.id))
        })?;
        self.sync
            .save_link(&LinkWrite {
                id: resolved.link.id.clone(),
                entity_type: resolved.record.entity_type.clone(),
                entity_id,
                group: resolved.link.group.clone(),
                changed: self.clock.now(),
            })
            .await
    }

    /// Reverse lookup used by cleanup.
    pub async fn load_entity(
        &self,
        id: &str,
        entity_type: &str,
        group: &str,
    ) -> Result<Option<ResolvedEntity>> {
        let Some(row) = self.sync.load_identity(id, entity_type).await? else {
            return Ok(None);
        };
        let record = self.entities.load(entity_type, row.entity_id).await?;
        Ok(record.map(|record| ResolvedEntity {
            record,
            link: SyncLink {
                id: id.to_string(),
                group: group.to_string(),
                locked: row.locked,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{Database, SqliteEntityStore, SqliteSyncStorage};
    use serde_json::json;

    fn provider() -> (EntityProvider, Arc<SqliteSyncStorage>, Arc<ManualClock>) {
        let db = Database::open_in_memory().unwrap();
        let sync = Arc::new(SqliteSyncStorage::new(db.clone()));
        let clock = Arc::new(ManualClock::new(1_000));
        let provider = EntityProvider::new(
            sync.clone(),
            Arc::new(SqliteEntityStore::new(db)),
            clock.clone(),
        );
        (provider, sync, clock)
    }

    #[tokio::test]
    async fn second_resolution_finds_the_linked_record() {
        let (provider, sync, clock) = provider();
        let mut first = provider
            .get_or_new("x1", "node", "page", &Map::new(), "g")
            .await
            .unwrap();
        assert!(first.record.is_new());
        assert_eq!(provider.save(&mut first).await.unwrap(), SaveStatus::New);

        clock.advance(5);
        let again = provider
            .get_or_new("x1", "node", "page", &Map::new(), "g")
            .await
            .unwrap();
        assert_eq!(again.record.entity_id, first.record.entity_id);
        assert_eq!(again.record.changed, 1_005);
        assert_eq!(sync.last_updated("x1", "g").await.unwrap(), Some(1_000));
    }

    #[tokio::test]
    async fn match_values_find_unlinked_records_without_linking_them() {
        let (provider, sync, _clock) = provider();
        let values = json!({"code": "C1"}).as_object().cloned().unwrap();
        let created = provider
            .get_or_create("seed", "node", "page", &values, "g")
            .await
            .unwrap();

        let matched = provider
            .get("other", "node", "page", &values, "g")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(matched.record.entity_id, created.record.entity_id);
        assert!(sync.load_identity("other", "node").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unsaved_records_cannot_be_linked() {
        let (provider, _sync, _clock) = provider();
        let fresh = provider
            .get_or_new("n", "node", "", &Map::new(), "g")
            .await
            .unwrap();
        assert!(provider.refresh_link(&fresh).await.is_err());
        assert!(provider.load_entity("n", "node", "g").await.unwrap().is_none());
    }
}
