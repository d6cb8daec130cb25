use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{records_from_value, select_base, ParsedRecord, Parser};
use crate::error::Result;
use crate::fetcher::Payload;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JsonSettings {
    /// Dotted path to the list of items inside the document.
    pub base_key: String,
}

pub struct JsonParser {
    base_key: String,
}

impl JsonParser {
    pub fn new(settings: JsonSettings) -> Self {
        Self {
            base_key: settings.base_key,
        }
    }
}

impl Parser for JsonParser {
    fn parse(&self, payload: Payload) -> Result<Vec<ParsedRecord>> {
        let document = decode_json(payload)?;
        let selected = select_base(document, &self.base_key);
        let records = records_from_value(selected);
        debug!(
            "JsonParser: base_key='{}' records={}",
            self.base_key,
            records.len()
        );
        Ok(records)
    }
}

/// Text is decoded; structured payloads are taken as they are.
pub(crate) fn decode_json(payload: Payload) -> Result<Value> {
    match payload {
        Payload::Empty => Ok(Value::Null),
        Payload::Value(value) => Ok(value),
        Payload::Records(list) => Ok(Value::Array(list)),
        other => {
            let text = other.into_text()?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            Ok(serde_json::from_str(&text)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn base_key_selects_nested_list() {
        let parser = JsonParser::new(JsonSettings {
            base_key: "data.items".to_string(),
        });
        let text = r#"{"data": {"items": [{"id": 7}, {"id": 8}]}, "total": 2}"#;
        let records = parser.parse(Payload::Text(text.to_string())).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].record, json!({"id": 8}));
    }

    #[test]
    fn object_roots_keep_member_keys() {
        let parser = JsonParser::new(JsonSettings::default());
        let records = parser
            .parse(Payload::Text(r#"{"b": {"n": 1}, "a": {"n": 2}}"#.to_string()))
            .unwrap();
        assert_eq!(records[0].key, "b");
        assert_eq!(records[1].key, "a");
    }

    #[test]
    fn blank_body_yields_nothing_and_garbage_errors() {
        let parser = JsonParser::new(JsonSettings::default());
        assert!(parser.parse(Payload::Text("  ".into())).unwrap().is_empty());
        assert!(parser.parse(Payload::Text("{nope".into())).is_err());
    }
}
