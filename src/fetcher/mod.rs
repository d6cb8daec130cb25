//! Fetchers pull one page of raw data from a source.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::item::SyncItemCollection;

pub mod entity;
pub mod file;
pub mod http;
pub mod soap;
pub mod sql;

/// Raw page contents handed from a fetcher to a parser.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    Records(Vec<Value>),
    Value(Value),
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Empty => true,
            Payload::Text(text) => text.is_empty(),
            Payload::Bytes(bytes) => bytes.is_empty(),
            Payload::Records(list) => list.is_empty(),
            Payload::Value(value) => value.is_null(),
        }
    }

    /// Text view of the payload; structured payloads are serialized as JSON.
    pub fn into_text(self) -> Result<String> {
        match self {
            Payload::Empty => Ok(String::new()),
            Payload::Text(text) => Ok(text),
            Payload::Bytes(bytes) => String::from_utf8(bytes)
                .map_err(|e| SyncError::fail(format!("payload is not valid UTF-8: {}", e))),
            Payload::Records(list) => Ok(serde_json::to_string(&list)?),
            Payload::Value(value) => Ok(serde_json::to_string(&value)?),
        }
    }
}

/// Paging knobs shared by every fetcher. Paging is off unless enabled.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Paging {
    pub page_enabled: bool,
    pub page_size: Option<usize>,
    pub page_limit: Option<u32>,
}

impl Paging {
    pub fn has_next_page(&self, page: u32, items: &SyncItemCollection) -> bool {
        if !self.page_enabled {
            return false;
        }
        let count = items.original_count();
        if count == 0 {
            return false;
        }
        if let Some(size) = self.page_size.filter(|s| *s > 0) {
            if count < size {
                return false;
            }
        }
        if let Some(limit) = self.page_limit.filter(|l| *l > 0) {
            if page >= limit {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    fn paging(&self) -> &Paging;

    /// Fetches `page` (1-based). `previous` is the prior page, used by cursor-style sources.
    async fn fetch(&self, page: u32, previous: &SyncItemCollection) -> Result<Payload>;

    fn has_next_page(&self, page: u32, items: &SyncItemCollection) -> bool {
        self.paging().has_next_page(page, items)
    }
}
