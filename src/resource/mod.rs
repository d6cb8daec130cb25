//! Resources decide how source items map onto local records.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::item::{SyncItem, SyncItemCollection};
use crate::storage::{EntityStore, Record, StaleQuery, StaleRow, SyncLink};

pub mod definition;
pub mod file;
pub mod mapped;

pub use definition::{PluginConfig, ResourceDefinition, ResourceManager};

/// Per-item hooks invoked by the runner. Only `id` has no default.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Stable source identity of an item.
    fn id(&self, item: &SyncItem) -> Result<String>;

    /// Bundle for records created from `item`; `None` uses the definition's bundle.
    fn bundle(&self, _item: &SyncItem) -> Option<String> {
        None
    }

    /// Values used both to match existing unlinked records and to seed new ones.
    fn initial_values(&self, _item: &SyncItem) -> Map<String, Value> {
        Map::new()
    }

    /// Cleanup group; `None` uses the definition's group.
    fn group(&self) -> Option<String> {
        None
    }

    fn run_on_empty(&self) -> bool {
        false
    }

    fn alter_items(&self, _items: &mut SyncItemCollection) {}

    fn alter_item(&self, _item: &mut SyncItem) {}

    /// Last chance to reject an item with Skip, Ignore or Fail.
    async fn prepare_item(&self, _item: &mut SyncItem) -> Result<()> {
        Ok(())
    }

    fn access_entity(&self, _record: &Record, link: &SyncLink) -> bool {
        !link.locked
    }

    /// Copies item data onto the record.
    async fn process_item(&self, record: &mut Record, item: &SyncItem) -> Result<()>;

    /// Runs just before the record is persisted.
    async fn save_item(&self, _record: &mut Record, _item: &SyncItem) -> Result<()> {
        Ok(())
    }

    /// Removes a stale record. Returns whether anything was deleted.
    async fn clean_item(
        &self,
        entities: &dyn EntityStore,
        record: &Record,
        _row: &StaleRow,
    ) -> Result<bool> {
        entities.delete(record).await
    }

    fn cleanup_filter(&self, _query: &mut StaleQuery) {}
}
