use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::{records_from_value, select_base, ParsedRecord, Parser};
use crate::error::Result;
use crate::fetcher::Payload;

/// Where items live in a standard RSS 2.0 feed once converted.
pub const RSS_BASE_KEY: &str = "channel.0.item";

const ATTRIBUTES: &str = "@attributes";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct XmlSettings {
    pub base_key: String,
}

pub struct XmlParser {
    base_key: String,
}

impl XmlParser {
    pub fn new(settings: XmlSettings) -> Self {
        Self {
            base_key: settings.base_key,
        }
    }

    pub fn rss(settings: XmlSettings) -> Self {
        let base_key = if settings.base_key.is_empty() {
            RSS_BASE_KEY.to_string()
        } else {
            settings.base_key
        };
        Self { base_key }
    }
}

impl Parser for XmlParser {
    fn parse(&self, payload: Payload) -> Result<Vec<ParsedRecord>> {
        let text = payload.into_text()?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let document = xml_to_value(&text)?;
        let records = records_from_value(select_base(document, &self.base_key));
        debug!(
            "XmlParser: base_key='{}' records={}",
            self.base_key,
            records.len()
        );
        Ok(records)
    }
}

struct Frame {
    name: String,
    children: Map<String, Value>,
    attributes: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self> {
        let mut attributes = Map::new();
        for attribute in start.attributes().flatten() {
            let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
            let value = attribute.unescape_value()?.trim().to_string();
            attributes.insert(key, Value::String(value));
        }
        Ok(Self {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            children: Map::new(),
            attributes,
            text: String::new(),
        })
    }

    fn close(self) -> (String, Value) {
        if self.children.is_empty() && self.attributes.is_empty() {
            return (self.name, Value::String(self.text.trim().to_string()));
        }
        let mut map = self.children;
        if !self.attributes.is_empty() {
            map.insert(ATTRIBUTES.to_string(), Value::Object(self.attributes));
        }
        (self.name, Value::Object(map))
    }

    /// Leaves stay scalar until repeated; elements with structure always land in a list.
    fn adopt(&mut self, name: String, value: Value) {
        match self.children.get_mut(&name) {
            Some(Value::Array(list)) => list.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                let value = match value {
                    Value::Object(_) => Value::Array(vec![value]),
                    leaf => leaf,
                };
                self.children.insert(name, value);
            }
        }
    }
}

/// Converts an XML document into a JSON tree rooted at the document element's contents.
/// Namespace prefixes are dropped from element and attribute names.
pub fn xml_to_value(text: &str) -> Result<Value> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<Value> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(Frame::open(&start)?),
            Event::Empty(start) => {
                let (name, value) = Frame::open(&start)?.close();
                match stack.last_mut() {
                    Some(parent) => parent.adopt(name, value),
                    None => root = Some(value),
                }
            }
            Event::Text(text) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                if let Some(frame) = stack.pop() {
                    let (name, value) = frame.close();
                    match stack.last_mut() {
                        Some(parent) => parent.adopt(name, value),
                        None => root = Some(value),
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(root.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FEED: &str = r#"<?xml version="1.0"?>
        <rss version="2.0"><channel>
          <title>News</title>
          <item><title> First </title><link>https://a.example/1</link></item>
          <item><title><![CDATA[Second & more]]></title><link>https://a.example/2</link>
            <enclosure url="https://a.example/2.mp3" length="10"/></item>
        </channel></rss>"#;

    #[test]
    fn rss_items_are_selected_by_default() {
        let records = XmlParser::rss(XmlSettings::default())
            .parse(Payload::Text(FEED.to_string()))
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record["title"], json!("First"));
        assert_eq!(records[1].record["title"], json!("Second & more"));
        assert_eq!(
            records[1].record["enclosure"][0][ATTRIBUTES]["url"],
            json!("https://a.example/2.mp3")
        );
    }

    #[test]
    fn namespaces_are_dropped_and_repeated_leaves_become_lists() {
        let doc = xml_to_value(
            r#"<s:Envelope xmlns:s="urn:x"><s:Body><tag>a</tag><tag>b</tag></s:Body></s:Envelope>"#,
        )
        .unwrap();
        assert_eq!(doc, json!({"Body": [{"tag": ["a", "b"]}]}));
    }

    #[test]
    fn malformed_documents_error() {
        let parser = XmlParser::new(XmlSettings::default());
        assert!(parser
            .parse(Payload::Text("<a><b></a>".to_string()))
            .is_err());
    }
}
