use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::debug;

use crate::error::{Result, SyncError};

const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    PRAGMA foreign_keys=ON;
    CREATE TABLE IF NOT EXISTS sync (
        id          TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        entity_id   INTEGER NOT NULL,
        locked      INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (id, entity_type)
    );
    CREATE INDEX IF NOT EXISTS sync_entity ON sync (entity_type, entity_id);
    CREATE TABLE IF NOT EXISTS sync_data (
        id      TEXT NOT NULL,
        "group" TEXT NOT NULL,
        changed INTEGER NOT NULL,
        PRIMARY KEY (id, "group")
    );
    CREATE INDEX IF NOT EXISTS sync_data_group_changed ON sync_data ("group", changed);
    CREATE TABLE IF NOT EXISTS sync_queue (
        item_id INTEGER PRIMARY KEY AUTOINCREMENT,
        name    TEXT NOT NULL,
        data    TEXT NOT NULL,
        expire  INTEGER NOT NULL DEFAULT 0,
        created INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS sync_queue_claim ON sync_queue (name, expire, item_id);
    CREATE TABLE IF NOT EXISTS sync_state (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS entity (
        entity_id   INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_type TEXT NOT NULL,
        bundle      TEXT NOT NULL,
        data        TEXT NOT NULL,
        created     INTEGER NOT NULL,
        changed     INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS entity_type_bundle ON entity (entity_type, bundle);
"#;

/// Shared handle to the local SQLite database. Every access is serialized through one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        debug!("Opening sync database at {}", path.display());
        Self::migrate(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::migrate(Connection::open_in_memory()?)
    }

    fn migrate(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SyncError::storage("database connection mutex poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sync.db");
        Database::open(&path).unwrap();
        let db = Database::open(&path).unwrap();
        let conn = db.connection().unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
                 ('sync', 'sync_data', 'sync_queue', 'sync_state', 'entity')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 5);
    }
}
