use std::path::PathBuf;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use tracing::debug;

use super::{Fetcher, Paging, Payload};
use crate::error::{Result, SyncError};
use crate::item::SyncItemCollection;

const DEFAULT_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqlSettings {
    /// Path of the SQLite database to read, relative to the file root.
    pub database: String,
    pub query: String,
    pub params: Vec<Value>,
    #[serde(flatten)]
    pub paging: Paging,
}

impl Default for SqlSettings {
    fn default() -> Self {
        Self {
            database: String::new(),
            query: String::new(),
            params: Vec::new(),
            paging: Paging {
                page_enabled: false,
                page_size: Some(DEFAULT_PAGE_SIZE),
                page_limit: None,
            },
        }
    }
}

/// Reads rows from a SQLite source, one `LIMIT`/`OFFSET` window per page.
pub struct SqlFetcher {
    path: PathBuf,
    settings: SqlSettings,
}

impl SqlFetcher {
    pub fn new(mut settings: SqlSettings, file_root: PathBuf) -> Result<Self> {
        if settings.query.trim().is_empty() {
            return Err(SyncError::MissingField("query".to_string()));
        }
        if settings.paging.page_size.map_or(true, |s| s == 0) {
            settings.paging.page_size = Some(DEFAULT_PAGE_SIZE);
        }
        Ok(Self {
            path: file_root.join(&settings.database),
            settings,
        })
    }

    fn page_size(&self) -> usize {
        self.settings.paging.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    fn windowed_query(&self) -> String {
        let query = self.settings.query.trim().trim_end_matches(';');
        format!("SELECT * FROM ({}) LIMIT ? OFFSET ?", query)
    }

    fn read_page(&self, page: u32) -> Result<Vec<Value>> {
        let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let size = self.page_size();
        let offset = (page.saturating_sub(1) as usize) * size;

        let mut bound: Vec<rusqlite::types::Value> =
            self.settings.params.iter().map(to_sql_value).collect();
        bound.push(rusqlite::types::Value::Integer(size as i64));
        bound.push(rusqlite::types::Value::Integer(offset as i64));

        let mut stmt = conn.prepare(&self.windowed_query())?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query(params_from_iter(bound))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut map = Map::new();
            for (i, column) in columns.iter().enumerate() {
                map.insert(column.clone(), from_sql_value(row.get_ref(i)?));
            }
            out.push(Value::Object(map));
        }
        Ok(out)
    }
}

fn to_sql_value(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Sql::Integer(i),
            None => Sql::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(STANDARD.encode(b)),
    }
}

#[async_trait]
impl Fetcher for SqlFetcher {
    fn paging(&self) -> &Paging {
        &self.settings.paging
    }

    async fn fetch(&self, page: u32, _previous: &SyncItemCollection) -> Result<Payload> {
        let rows = self.read_page(page)?;
        debug!(
            "SqlFetcher: page={} rows={} source={}",
            page,
            rows.len(),
            self.path.display()
        );
        Ok(Payload::Records(rows))
    }
}
