use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::json::decode_json;
use super::{ParsedRecord, Parser};
use crate::content::{write_file, ExistingFile};
use crate::error::Result;
use crate::fetcher::Payload;
use crate::item::{is_empty_value, value_to_string};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    /// Directory under the content root; absolute paths are used as given.
    pub destination: String,
    pub filename: String,
    pub replace: bool,
    pub filename_property: Option<String>,
    pub data_property: Option<String>,
    pub filename_prefix: String,
    pub base64_decode: bool,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            destination: "import".to_string(),
            filename: "file.txt".to_string(),
            replace: false,
            filename_property: None,
            data_property: None,
            filename_prefix: String::new(),
            base64_decode: true,
        }
    }
}

/// Writes each decoded value to disk and emits the resulting file handles.
pub struct FileParser {
    settings: FileSettings,
    destination: PathBuf,
    decode_json_first: bool,
}

impl FileParser {
    pub fn new(settings: FileSettings, content_root: PathBuf) -> Self {
        let destination = content_root.join(&settings.destination);
        Self {
            settings,
            destination,
            decode_json_first: false,
        }
    }

    pub fn json(settings: FileSettings, content_root: PathBuf) -> Self {
        Self {
            decode_json_first: true,
            ..Self::new(settings, content_root)
        }
    }

    fn values(&self, payload: Payload) -> Result<Vec<Value>> {
        let value = if self.decode_json_first {
            decode_json(payload)?
        } else {
            match payload {
                Payload::Empty => Value::Null,
                Payload::Records(list) => Value::Array(list),
                Payload::Value(value) => value,
                other => Value::String(other.into_text()?),
            }
        };
        Ok(match value {
            Value::Null => Vec::new(),
            Value::Array(list) => list,
            single => vec![single],
        })
    }

    fn filename_for(&self, value: &Value) -> String {
        let named = self
            .settings
            .filename_property
            .as_deref()
            .and_then(|property| value.get(property))
            .filter(|v| !is_empty_value(v))
            .and_then(value_to_string);
        format!(
            "{}{}",
            self.settings.filename_prefix,
            named.unwrap_or_else(|| self.settings.filename.clone())
        )
    }

    fn bytes_for(&self, value: &Value) -> Result<Vec<u8>> {
        let data = self
            .settings
            .data_property
            .as_deref()
            .and_then(|property| value.get(property))
            .filter(|v| !is_empty_value(v))
            .unwrap_or(value);
        let raw = match data {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other)?,
        };
        if self.settings.base64_decode {
            Ok(STANDARD.decode(raw.trim())?)
        } else {
            Ok(raw.into_bytes())
        }
    }
}

impl Parser for FileParser {
    fn parse(&self, payload: Payload) -> Result<Vec<ParsedRecord>> {
        let existing = ExistingFile::from_replace_flag(self.settings.replace);
        let mut out = Vec::new();
        for value in self.values(payload)? {
            let filename = self.filename_for(&value);
            let bytes = self.bytes_for(&value)?;
            debug!("FileParser: writing {} bytes_len={}", filename, bytes.len());
            let stored = write_file(&self.destination, &filename, &bytes, existing)?;
            out.push(ParsedRecord::new(
                out.len().to_string(),
                serde_json::to_value(&stored)?,
            ));
        }
        info!(
            "FileParser: wrote {} file(s) to {}",
            out.len(),
            self.destination.display()
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn base64_payload_is_written_with_default_name() {
        let root = tempfile::tempdir().unwrap();
        let parser = FileParser::new(FileSettings::default(), root.path().to_path_buf());
        let records = parser
            .parse(Payload::Text(STANDARD.encode("hello")))
            .unwrap();
        assert_eq!(records.len(), 1);
        let uri = records[0].record["uri"].as_str().unwrap();
        assert_eq!(std::fs::read(uri).unwrap(), b"hello");
        assert_eq!(records[0].record["filename"], json!("file.txt"));
    }

    #[test]
    fn json_file_uses_properties_and_prefix() {
        let root = tempfile::tempdir().unwrap();
        let settings = FileSettings {
            filename_property: Some("name".to_string()),
            data_property: Some("body".to_string()),
            filename_prefix: "doc-".to_string(),
            base64_decode: false,
            ..FileSettings::default()
        };
        let parser = FileParser::json(settings, root.path().to_path_buf());
        let text = r#"[{"name": "a.txt", "body": "A"}, {"name": "b.txt", "body": "B"}]"#;
        let records = parser.parse(Payload::Text(text.to_string())).unwrap();
        let names: Vec<_> = records
            .iter()
            .map(|r| r.record["filename"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["doc-a.txt", "doc-b.txt"]);
        assert_eq!(records[1].record["size"], json!(1));
    }
}
