//! Parsers turn a fetched payload into an ordered list of keyed records.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::fetcher::Payload;

pub mod csv;
pub mod file;
pub mod json;
pub mod passthrough;
pub mod xml;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ParsedRecord {
    pub key: String,
    pub record: Value,
}

impl ParsedRecord {
    pub fn new(key: impl Into<String>, record: Value) -> Self {
        Self {
            key: key.into(),
            record,
        }
    }
}

pub trait Parser: Send + Sync {
    fn parse(&self, payload: Payload) -> Result<Vec<ParsedRecord>>;
}

/// Arrays keep their indexes as keys, objects their member names. Null yields nothing and any
/// other scalar becomes a single record keyed `0`.
pub fn records_from_value(value: Value) -> Vec<ParsedRecord> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(list) => list
            .into_iter()
            .enumerate()
            .map(|(i, record)| ParsedRecord::new(i.to_string(), record))
            .collect(),
        Value::Object(map) => map
            .into_iter()
            .map(|(key, record)| ParsedRecord::new(key, record))
            .collect(),
        other => vec![ParsedRecord::new("0", other)],
    }
}

/// Follows a dotted `base_key` into a decoded document. An empty path selects the root.
pub(crate) fn select_base(value: Value, base_key: &str) -> Value {
    let mut current = value;
    for segment in base_key.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(mut map) => map.shift_remove(segment).unwrap_or(Value::Null),
            Value::Array(mut list) => match segment.parse::<usize>() {
                Ok(index) if index < list.len() => list.swap_remove(index),
                _ => Value::Null,
            },
            _ => Value::Null,
        };
    }
    current
}
