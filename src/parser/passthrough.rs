//! Parsers that do little more than reshape what the fetcher already produced.

use serde_json::{json, Value};

use super::json::decode_json;
use super::{records_from_value, ParsedRecord, Parser};
use crate::error::Result;
use crate::fetcher::Payload;

/// Structured payloads go through untouched; raw text becomes one `value` item.
pub struct NoneParser;

impl Parser for NoneParser {
    fn parse(&self, payload: Payload) -> Result<Vec<ParsedRecord>> {
        Ok(match payload {
            Payload::Empty => Vec::new(),
            Payload::Records(list) => records_from_value(Value::Array(list)),
            Payload::Value(value) => records_from_value(value),
            other => records_from_value(Value::String(other.into_text()?)),
        })
    }
}

/// Decodes whatever arrives into plain JSON data before splitting it into records.
pub struct ObjectParser;

impl Parser for ObjectParser {
    fn parse(&self, payload: Payload) -> Result<Vec<ParsedRecord>> {
        let value = decode_json(payload)?;
        let plain: Value = serde_json::from_str(&serde_json::to_string(&value)?)?;
        Ok(records_from_value(plain))
    }
}

/// Hands the raw body on as a single `{ "contents": ... }` item.
pub struct StreamParser;

impl Parser for StreamParser {
    fn parse(&self, payload: Payload) -> Result<Vec<ParsedRecord>> {
        if matches!(payload, Payload::Empty) {
            return Ok(Vec::new());
        }
        let contents = payload.into_text()?;
        Ok(vec![ParsedRecord::new("0", json!({ "contents": contents }))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_keeps_records_in_order() {
        let records = NoneParser
            .parse(Payload::Records(vec![json!({"id": 1}), json!({"id": 2})]))
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].record, json!({"id": 2}));
    }

    #[test]
    fn object_decodes_text() {
        let records = ObjectParser
            .parse(Payload::Text(r#"[{"a": true}]"#.to_string()))
            .unwrap();
        assert_eq!(records[0].record, json!({"a": true}));
    }

    #[test]
    fn stream_wraps_the_body() {
        let records = StreamParser
            .parse(Payload::Text("raw body".to_string()))
            .unwrap();
        assert_eq!(records, vec![ParsedRecord::new("0", json!({"contents": "raw body"}))]);
        assert!(StreamParser.parse(Payload::Empty).unwrap().is_empty());
    }
}
