//! Durable FIFO job queue with lease-based claiming.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use tracing::debug;

use crate::clock::Clock;
use crate::error::Result;
use crate::storage::Database;

#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub item_id: i64,
    pub data: Value,
    pub created: i64,
    pub expire: i64,
}

/// At-least-once queue bound to a single name.
#[async_trait]
pub trait JobQueue: Send + Sync {
    fn name(&self) -> &str;
    async fn create_item(&self, data: &Value) -> Result<i64>;
    /// Claims the oldest unclaimed (or lease-expired) item for `lease` seconds.
    async fn claim_item(&self, lease: i64) -> Result<Option<QueueItem>>;
    async fn delete_item(&self, item: &QueueItem) -> Result<()>;
    async fn release_item(&self, item: &QueueItem) -> Result<bool>;
    /// All items, claimed or not.
    async fn number_of_items(&self) -> Result<usize>;
    async fn delete_queue(&self) -> Result<()>;
    /// Clears every lease so an interrupted run can continue.
    async fn release_all(&self) -> Result<usize>;
}

/// Hands out queues by name.
pub trait QueueFactory: Send + Sync {
    fn queue(&self, name: &str) -> Arc<dyn JobQueue>;
}

pub struct SqliteQueue {
    db: Database,
    name: String,
    clock: Arc<dyn Clock>,
}

impl SqliteQueue {
    pub fn new(db: Database, name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            name: name.into(),
            clock,
        }
    }
}

#[async_trait]
impl JobQueue for SqliteQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_item(&self, data: &Value) -> Result<i64> {
        let payload = serde_json::to_string(data)?;
        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO sync_queue (name, data, expire, created) VALUES (?1, ?2, 0, ?3)",
            params![self.name, payload, self.clock.now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn claim_item(&self, lease: i64) -> Result<Option<QueueItem>> {
        let now = self.clock.now();
        let mut conn = self.db.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let candidate = tx
            .query_row(
                "SELECT item_id, data, created FROM sync_queue
                 WHERE name = ?1 AND (expire = 0 OR expire < ?2)
                 ORDER BY item_id ASC LIMIT 1",
                params![self.name, now],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((item_id, data, created)) = candidate else {
            return Ok(None);
        };
        let expire = now + lease.max(1);
        tx.execute(
            "UPDATE sync_queue SET expire = ?1 WHERE item_id = ?2",
            params![expire, item_id],
        )?;
        tx.commit()?;
        debug!("Claimed job {} from {}", item_id, self.name);
        Ok(Some(QueueItem {
            item_id,
            data: serde_json::from_str(&data)?,
            created,
            expire,
        }))
    }

    async fn delete_item(&self, item: &QueueItem) -> Result<()> {
        let conn = self.db.connection()?;
        conn.execute(
            "DELETE FROM sync_queue WHERE item_id = ?1",
            params![item.item_id],
        )?;
        Ok(())
    }

    async fn release_item(&self, item: &QueueItem) -> Result<bool> {
        let conn = self.db.connection()?;
        let updated = conn.execute(
            "UPDATE sync_queue SET expire = 0 WHERE item_id = ?1",
            params![item.item_id],
        )?;
        Ok(updated > 0)
    }

    async fn number_of_items(&self) -> Result<usize> {
        let conn = self.db.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(item_id) FROM sync_queue WHERE name = ?1",
            params![self.name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn delete_queue(&self) -> Result<()> {
        let conn = self.db.connection()?;
        let deleted = conn.execute("DELETE FROM sync_queue WHERE name = ?1", params![self.name])?;
        debug!("Purged {} job(s) from {}", deleted, self.name);
        Ok(())
    }

    async fn release_all(&self) -> Result<usize> {
        let conn = self.db.connection()?;
        let released = conn.execute(
            "UPDATE sync_queue SET expire = 0 WHERE name = ?1 AND expire <> 0",
            params![self.name],
        )?;
        Ok(released)
    }
}

pub struct SqliteQueueFactory {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl SqliteQueueFactory {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }
}

impl QueueFactory for SqliteQueueFactory {
    fn queue(&self, name: &str) -> Arc<dyn JobQueue> {
        Arc::new(SqliteQueue::new(self.db.clone(), name, self.clock.clone()))
    }
}
