use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde_json::{Map, Value};
use tracing::debug;

use super::{Database, EntityStore, Record, SaveStatus};
use crate::error::Result;
use crate::item::value_to_string;

/// Target records kept as JSON documents in the local `entity` table.
#[derive(Clone)]
pub struct SqliteEntityStore {
    db: Database,
}

impl SqliteEntityStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn record_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, String, i64, i64)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_record(
    (entity_id, entity_type, bundle, data, created, changed): (i64, String, String, String, i64, i64),
) -> Result<Record> {
    let fields: Map<String, Value> = serde_json::from_str(&data)?;
    Ok(Record {
        entity_type,
        bundle,
        entity_id: Some(entity_id),
        fields,
        created,
        changed,
    })
}

/// Scalars compare by their string form so `"7"` matches `7`.
fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (value_to_string(left), value_to_string(right)) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

/// SQLite JSON path for a dotted field path. Paths stepping into arrays stay in Rust.
fn json_path(path: &str) -> Option<String> {
    let mut out = String::from("$");
    let mut any = false;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        if segment.contains('"') || segment.parse::<usize>().is_ok() {
            return None;
        }
        out.push_str(&format!(".\"{}\"", segment));
        any = true;
    }
    any.then_some(out)
}

/// Narrows the scan to rows whose scalar at `path` has the same string form as
/// `expected`. Reals are left for the in-memory comparison since SQLite renders them
/// differently.
fn scalar_clause(path: usize, expected: usize) -> String {
    format!(
        "(CASE json_type(data, ?{p})
            WHEN 'true' THEN 'true'
            WHEN 'false' THEN 'false'
            WHEN 'integer' THEN CAST(json_extract(data, ?{p}) AS TEXT)
            WHEN 'text' THEN json_extract(data, ?{p})
            WHEN 'real' THEN ?{e}
         END) = ?{e}",
        p = path,
        e = expected
    )
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn load(&self, entity_type: &str, entity_id: i64) -> Result<Option<Record>> {
        let conn = self.db.connection()?;
        let row = conn
            .query_row(
                "SELECT entity_id, entity_type, bundle, data, created, changed
                 FROM entity WHERE entity_type = ?1 AND entity_id = ?2",
                params![entity_type, entity_id],
                record_row,
            )
            .optional()?;
        row.map(into_record).transpose()
    }

    async fn load_by_properties(
        &self,
        entity_type: &str,
        bundle: Option<&str>,
        values: &Map<String, Value>,
    ) -> Result<Vec<Record>> {
        let mut sql = String::from(
            "SELECT entity_id, entity_type, bundle, data, created, changed
             FROM entity WHERE entity_type = ?1 AND (?2 IS NULL OR bundle = ?2)",
        );
        let mut bound = vec![
            SqlValue::Text(entity_type.to_string()),
            bundle.map_or(SqlValue::Null, |b| SqlValue::Text(b.to_string())),
        ];
        for (path, expected) in values {
            let (Some(json), Some(text)) = (json_path(path), value_to_string(expected)) else {
                continue;
            };
            bound.push(SqlValue::Text(json));
            bound.push(SqlValue::Text(text));
            sql.push_str(" AND ");
            sql.push_str(&scalar_clause(bound.len() - 1, bound.len()));
        }
        sql.push_str(" ORDER BY entity_id");

        let rows = {
            let conn = self.db.connection()?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(bound), record_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        let mut out = Vec::new();
        for row in rows {
            let record = into_record(row)?;
            let matches = values.iter().all(|(path, expected)| {
                record
                    .get(path)
                    .map_or(false, |actual| loosely_equal(actual, expected))
            });
            if matches {
                out.push(record);
            }
        }
        Ok(out)
    }

    async fn save(&self, record: &mut Record, now: i64) -> Result<SaveStatus> {
        let data = serde_json::to_string(&record.fields)?;
        let conn = self.db.connection()?;
        record.changed = now;
        match record.entity_id {
            Some(entity_id) => {
                let updated = conn.execute(
                    "UPDATE entity SET bundle = ?1, data = ?2, changed = ?3
                     WHERE entity_type = ?4 AND entity_id = ?5",
                    params![record.bundle, data, now, record.entity_type, entity_id],
                )?;
                if updated > 0 {
                    return Ok(SaveStatus::Updated);
                }
                conn.execute(
                    "INSERT INTO entity (entity_id, entity_type, bundle, data, created, changed)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![entity_id, record.entity_type, record.bundle, data, now],
                )?;
                record.created = now;
                Ok(SaveStatus::New)
            }
            None => {
                conn.execute(
                    "INSERT INTO entity (entity_type, bundle, data, created, changed)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![record.entity_type, record.bundle, data, now],
                )?;
                record.entity_id = Some(conn.last_insert_rowid());
                record.created = now;
                debug!("Created {}", record.label());
                Ok(SaveStatus::New)
            }
        }
    }

    async fn delete(&self, record: &Record) -> Result<bool> {
        let Some(entity_id) = record.entity_id else {
            return Ok(false);
        };
        let conn = self.db.connection()?;
        let deleted = conn.execute(
            "DELETE FROM entity WHERE entity_type = ?1 AND entity_id = ?2",
            params![record.entity_type, entity_id],
        )?;
        Ok(deleted > 0)
    }

    async fn count(&self, entity_type: &str) -> Result<usize> {
        let conn = self.db.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entity WHERE entity_type = ?1",
            params![entity_type],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn save_assigns_ids_then_updates() {
        let store = SqliteEntityStore::new(Database::open_in_memory().unwrap());
        let mut record = Record::new("node", "page", fields(json!({"title": "A"})));
        assert_eq!(store.save(&mut record, 10).await.unwrap(), SaveStatus::New);
        let id = record.entity_id.unwrap();

        record.set("title", "B");
        assert_eq!(store.save(&mut record, 20).await.unwrap(), SaveStatus::Updated);
        let loaded = store.load("node", id).await.unwrap().unwrap();
        assert_eq!(loaded.get_str("title"), Some("B"));
        assert_eq!((loaded.created, loaded.changed), (10, 20));
        assert_eq!(store.count("node").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn properties_match_loosely_within_bundle() {
        let store = SqliteEntityStore::new(Database::open_in_memory().unwrap());
        let mut a = Record::new("node", "page", fields(json!({"code": 7, "meta": {"k": "x"}})));
        let mut b = Record::new("node", "post", fields(json!({"code": 7})));
        store.save(&mut a, 1).await.unwrap();
        store.save(&mut b, 1).await.unwrap();

        let wanted = fields(json!({"code": "7"}));
        assert_eq!(store.load_by_properties("node", None, &wanted).await.unwrap().len(), 2);
        let in_page = store
            .load_by_properties("node", Some("page"), &fields(json!({"meta.k": "x"})))
            .await
            .unwrap();
        assert_eq!(in_page.len(), 1);

        assert!(store.delete(&a).await.unwrap());
        assert!(store.load("node", a.entity_id.unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scalar_filters_exclude_rows_in_the_query() {
        let store = SqliteEntityStore::new(Database::open_in_memory().unwrap());
        for data in [
            json!({"code": 7, "flag": true, "meta": {"k": "x"}}),
            json!({"code": 8, "flag": false, "meta": {"k": "x"}}),
            json!({"code": "7", "meta": {"k": "y"}}),
            json!({"code": 7.5, "tags": ["a", "b"]}),
            json!({"other": 7}),
        ] {
            store.save(&mut Record::new("node", "page", fields(data)), 1).await.unwrap();
        }
        let found = |wanted: Value| {
            let store = store.clone();
            async move {
                store
                    .load_by_properties("node", None, &fields(wanted))
                    .await
                    .unwrap()
                    .len()
            }
        };

        assert_eq!(found(json!({"code": 7})).await, 2);
        assert_eq!(found(json!({"code": 7, "meta.k": "x"})).await, 1);
        assert_eq!(found(json!({"code": "9"})).await, 0);
        assert_eq!(found(json!({"flag": "true"})).await, 1);
        assert_eq!(found(json!({"flag": false})).await, 1);
        assert_eq!(found(json!({"code": 7.5})).await, 1);
        assert_eq!(found(json!({"tags.1": "b"})).await, 1);
        assert_eq!(found(json!({"meta": {"k": "y"}})).await, 1);
    }
}
