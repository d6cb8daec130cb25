//! Persisted key/value run state shared by independent job executions.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::storage::Database;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: &Value) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    /// Adds `by` to an integer entry (missing counts as zero) and returns the new value.
    async fn increment(&self, key: &str, by: i64) -> Result<i64>;
}

#[derive(Clone)]
pub struct SqliteState {
    db: Database,
}

impl SqliteState {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StateStore for SqliteState {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.db.connection()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|text| serde_json::from_str(&text).map_err(Into::into))
            .transpose()
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO sync_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, serde_json::to_string(value)?],
        )?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.db.connection()?;
        Ok(conn.execute("DELETE FROM sync_state WHERE key = ?1", params![key])? > 0)
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64> {
        let mut conn = self.db.connection()?;
        let tx = conn.transaction()?;
        let current: Option<String> = tx
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        let current = current
            .and_then(|text| serde_json::from_str::<Value>(&text).ok())
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let next = current + by;
        tx.execute(
            "INSERT INTO sync_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, next.to_string()],
        )?;
        tx.commit()?;
        Ok(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Success,
    Skip,
    Fail,
}

impl ProcessKind {
    pub const ALL: [ProcessKind; 3] = [ProcessKind::Success, ProcessKind::Skip, ProcessKind::Fail];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Success => "success",
            ProcessKind::Skip => "skip",
            ProcessKind::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessCounts {
    pub success: i64,
    pub skip: i64,
    pub fail: i64,
}

/// Typed view over the state keys of one resource.
#[derive(Clone)]
pub struct RunState {
    store: Arc<dyn StateStore>,
    resource_id: String,
}

impl RunState {
    pub fn new(store: Arc<dyn StateStore>, resource_id: impl Into<String>) -> Self {
        Self {
            store,
            resource_id: resource_id.into(),
        }
    }

    fn resource_key(&self, suffix: &str) -> String {
        format!("sync.resource.{}.{}", self.resource_id, suffix)
    }

    fn cron_key(&self) -> String {
        format!("sync.cron.{}", self.resource_id)
    }

    fn cron_end_key(&self) -> String {
        format!("sync.cron.{}.end", self.resource_id)
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.store.get(key).await?.and_then(|v| v.as_i64()))
    }

    pub async fn start_time(&self) -> Result<Option<i64>> {
        self.get_i64(&self.resource_key("start")).await
    }

    pub async fn set_start_time(&self, timestamp: i64) -> Result<()> {
        self.store
            .set(&self.resource_key("start"), &Value::from(timestamp))
            .await
    }

    /// Current page, starting at 1.
    pub async fn page(&self) -> Result<u32> {
        let page = self.get_i64(&self.resource_key("page")).await?.unwrap_or(1);
        Ok(page.max(1) as u32)
    }

    pub async fn increment_page(&self) -> Result<u32> {
        let key = self.resource_key("page");
        if self.store.get(&key).await?.is_none() {
            self.store.set(&key, &Value::from(1)).await?;
        }
        Ok(self.store.increment(&key, 1).await?.max(1) as u32)
    }

    pub async fn reset_page(&self) -> Result<()> {
        self.store.delete(&self.resource_key("page")).await?;
        Ok(())
    }

    pub async fn increment_process(&self, kind: ProcessKind) -> Result<i64> {
        self.store
            .increment(&self.resource_key(&format!("process.{}", kind.as_str())), 1)
            .await
    }

    pub async fn process_counts(&self) -> Result<ProcessCounts> {
        let mut counts = ProcessCounts::default();
        for kind in ProcessKind::ALL {
            let value = self
                .get_i64(&self.resource_key(&format!("process.{}", kind.as_str())))
                .await?
                .unwrap_or(0);
            match kind {
                ProcessKind::Success => counts.success = value,
                ProcessKind::Skip => counts.skip = value,
                ProcessKind::Fail => counts.fail = value,
            }
        }
        Ok(counts)
    }

    pub async fn reset_process_counts(&self) -> Result<()> {
        for kind in ProcessKind::ALL {
            self.store
                .delete(&self.resource_key(&format!("process.{}", kind.as_str())))
                .await?;
        }
        Ok(())
    }

    pub async fn last_run_start(&self) -> Result<Option<i64>> {
        self.get_i64(&self.cron_key()).await
    }

    pub async fn set_last_run_start(&self, timestamp: i64) -> Result<()> {
        self.store.set(&self.cron_key(), &Value::from(timestamp)).await
    }

    pub async fn last_run_end(&self) -> Result<Option<i64>> {
        self.get_i64(&self.cron_end_key()).await
    }

    pub async fn set_last_run_end(&self, timestamp: i64) -> Result<()> {
        self.store
            .set(&self.cron_end_key(), &Value::from(timestamp))
            .await
    }

    pub async fn reset_last_run(&self) -> Result<()> {
        self.store.delete(&self.cron_key()).await?;
        self.store.delete(&self.cron_end_key()).await?;
        Ok(())
    }
}
