use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tracing::debug;

use super::{Database, LinkWrite, StaleQuery, StaleRow, SyncFilter, SyncRow, SyncStorage};
use crate::error::Result;

/// `sync` and `sync_data` tables in the local database.
#[derive(Clone)]
pub struct SqliteSyncStorage {
    db: Database,
}

impl SqliteSyncStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn sync_row(row: &Row<'_>) -> rusqlite::Result<SyncRow> {
    Ok(SyncRow {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        entity_id: row.get(2)?,
        locked: row.get::<_, i64>(3)? != 0,
    })
}

fn where_clause(filter: &SyncFilter) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    if let Some(id) = &filter.id {
        clauses.push("id = ?");
        values.push(SqlValue::Text(id.clone()));
    }
    if let Some(entity_type) = &filter.entity_type {
        clauses.push("entity_type = ?");
        values.push(SqlValue::Text(entity_type.clone()));
    }
    if let Some(entity_id) = filter.entity_id {
        clauses.push("entity_id = ?");
        values.push(SqlValue::Integer(entity_id));
    }
    if let Some(locked) = filter.locked {
        clauses.push("locked = ?");
        values.push(SqlValue::Integer(i64::from(locked)));
    }
    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

#[async_trait]
impl SyncStorage for SqliteSyncStorage {
    async fn load_identity(&self, id: &str, entity_type: &str) -> Result<Option<SyncRow>> {
        let conn = self.db.connection()?;
        let row = conn
            .query_row(
                "SELECT id, entity_type, entity_id, locked FROM sync WHERE id = ?1 AND entity_type = ?2",
                params![id, entity_type],
                sync_row,
            )
            .optional()?;
        Ok(row)
    }

    async fn load_by_properties(&self, filter: &SyncFilter) -> Result<Vec<SyncRow>> {
        let (clause, values) = where_clause(filter);
        let conn = self.db.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, entity_type, entity_id, locked FROM sync{} ORDER BY id",
            clause
        ))?;
        let rows = stmt
            .query_map(params_from_iter(values), sync_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn save_link(&self, link: &LinkWrite) -> Result<()> {
        let mut conn = self.db.connection()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO sync (id, entity_type, entity_id, locked) VALUES (?1, ?2, ?3, 0)
             ON CONFLICT(id, entity_type) DO UPDATE SET entity_id = excluded.entity_id",
            params![link.id, link.entity_type, link.entity_id],
        )?;
        tx.execute(
            r#"INSERT INTO sync_data (id, "group", changed) VALUES (?1, ?2, ?3)
               ON CONFLICT(id, "group") DO UPDATE SET changed = excluded.changed"#,
            params![link.id, link.group, link.changed],
        )?;
        tx.commit()?;
        debug!(
            "Linked {} -> {}:{} group={} changed={}",
            link.id, link.entity_type, link.entity_id, link.group, link.changed
        );
        Ok(())
    }

    async fn set_locked(&self, id: &str, entity_type: &str, locked: bool) -> Result<bool> {
        let conn = self.db.connection()?;
        let updated = conn.execute(
            "UPDATE sync SET locked = ?3 WHERE id = ?1 AND entity_type = ?2",
            params![id, entity_type, i64::from(locked)],
        )?;
        Ok(updated > 0)
    }

    async fn last_updated(&self, id: &str, group: &str) -> Result<Option<i64>> {
        let conn = self.db.connection()?;
        let changed = conn
            .query_row(
                r#"SELECT changed FROM sync_data WHERE id = ?1 AND "group" = ?2"#,
                params![id, group],
                |row| row.get(0),
            )
            .optional()?;
        Ok(changed)
    }

    async fn stale(&self, query: &StaleQuery) -> Result<Vec<StaleRow>> {
        let mut sql = String::from(
            r#"SELECT d.id, d."group", d.changed, s.entity_type, s.entity_id, s.locked
               FROM sync_data d INNER JOIN sync s ON s.id = d.id
               WHERE d."group" = ? AND d.changed < ?"#,
        );
        let mut values = vec![
            SqlValue::Text(query.group.clone()),
            SqlValue::Integer(query.changed_before),
        ];
        if !query.include_locked {
            sql.push_str(" AND s.locked = 0");
        }
        if let Some(entity_type) = &query.entity_type {
            sql.push_str(" AND s.entity_type = ?");
            values.push(SqlValue::Text(entity_type.clone()));
        }
        sql.push_str(" ORDER BY d.changed, d.id");

        let conn = self.db.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                Ok(StaleRow {
                    id: row.get(0)?,
                    group: row.get(1)?,
                    changed: row.get(2)?,
                    entity_type: row.get(3)?,
                    entity_id: row.get(4)?,
                    locked: row.get::<_, i64>(5)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn delete_by_properties(&self, filter: &SyncFilter) -> Result<usize> {
        let (clause, values) = where_clause(filter);
        let mut conn = self.db.connection()?;
        let tx = conn.transaction()?;
        let deleted = tx.execute(
            &format!("DELETE FROM sync{}", clause),
            params_from_iter(values),
        )?;
        tx.execute(
            "DELETE FROM sync_data WHERE id NOT IN (SELECT id FROM sync)",
            [],
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    async fn wipe(&self) -> Result<()> {
        let conn = self.db.connection()?;
        conn.execute_batch("DELETE FROM sync; DELETE FROM sync_data;")?;
        Ok(())
    }
}
