//! Persistence for sync identities, target records and entity resolution.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::item::{assign, lookup};

pub mod database;
pub mod entity_store;
pub mod provider;
pub mod sync_storage;

pub use database::Database;
pub use entity_store::SqliteEntityStore;
pub use provider::{EntityProvider, ResolvedEntity, SyncLink};
pub use sync_storage::SqliteSyncStorage;

/// A local target record owned by the entity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub entity_type: String,
    pub bundle: String,
    pub entity_id: Option<i64>,
    pub fields: Map<String, Value>,
    pub created: i64,
    pub changed: i64,
}

impl Record {
    pub fn new(
        entity_type: impl Into<String>,
        bundle: impl Into<String>,
        fields: Map<String, Value>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            bundle: bundle.into(),
            entity_id: None,
            fields,
            created: 0,
            changed: 0,
        }
    }

    pub fn is_new(&self) -> bool {
        self.entity_id.is_none()
    }

    /// Dotted-path read, e.g. `address.city`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.fields, path)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        assign(&mut self.fields, path, value.into());
    }

    pub fn label(&self) -> String {
        match self.entity_id {
            Some(id) => format!("{}:{}", self.entity_type, id),
            None => format!("{}:new", self.entity_type),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveStatus {
    New,
    Updated,
}

impl SaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveStatus::New => "NEW",
            SaveStatus::Updated => "UPDATE",
        }
    }
}

/// One `sync` row: a source identity linked to a local record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRow {
    pub id: String,
    pub entity_type: String,
    pub entity_id: i64,
    pub locked: bool,
}

/// Identity link plus group timestamp, written together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkWrite {
    pub id: String,
    pub entity_type: String,
    pub entity_id: i64,
    pub group: String,
    pub changed: i64,
}

/// Equality filter over `sync` rows; unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncFilter {
    pub id: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub locked: Option<bool>,
}

impl SyncFilter {
    pub fn identity(id: &str, entity_type: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            entity_type: Some(entity_type.to_string()),
            ..Self::default()
        }
    }

    pub fn record(entity_type: &str, entity_id: i64) -> Self {
        Self {
            entity_type: Some(entity_type.to_string()),
            entity_id: Some(entity_id),
            ..Self::default()
        }
    }
}

/// Selects identities of a group not touched since `changed_before`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleQuery {
    pub group: String,
    pub changed_before: i64,
    pub entity_type: Option<String>,
    pub include_locked: bool,
}

/// A stale identity as returned by the cleanup query and carried by clean jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleRow {
    pub id: String,
    pub group: String,
    pub changed: i64,
    pub entity_type: String,
    pub entity_id: i64,
    pub locked: bool,
}

#[async_trait]
pub trait SyncStorage: Send + Sync {
    async fn load_identity(&self, id: &str, entity_type: &str) -> Result<Option<SyncRow>>;
    async fn load_by_properties(&self, filter: &SyncFilter) -> Result<Vec<SyncRow>>;
    /// Upserts the identity link and, only if that succeeded, the group timestamp.
    async fn save_link(&self, link: &LinkWrite) -> Result<()>;
    async fn set_locked(&self, id: &str, entity_type: &str, locked: bool) -> Result<bool>;
    async fn last_updated(&self, id: &str, group: &str) -> Result<Option<i64>>;
    async fn stale(&self, query: &StaleQuery) -> Result<Vec<StaleRow>>;
    async fn delete_by_properties(&self, filter: &SyncFilter) -> Result<usize>;
    async fn wipe(&self) -> Result<()>;
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn load(&self, entity_type: &str, entity_id: i64) -> Result<Option<Record>>;
    /// Records whose fields equal every entry of `values`.
    async fn load_by_properties(
        &self,
        entity_type: &str,
        bundle: Option<&str>,
        values: &Map<String, Value>,
    ) -> Result<Vec<Record>>;
    async fn save(&self, record: &mut Record, now: i64) -> Result<SaveStatus>;
    async fn delete(&self, record: &Record) -> Result<bool>;
    async fn count(&self, entity_type: &str) -> Result<usize>;
}
