use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::{ParsedRecord, Parser};
use crate::error::{Result, SyncError};
use crate::fetcher::Payload;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CsvSettings {
    pub header: bool,
    pub delimiter: String,
}

impl Default for CsvSettings {
    fn default() -> Self {
        Self {
            header: true,
            delimiter: ",".to_string(),
        }
    }
}

pub struct CsvParser {
    header: bool,
    delimiter: u8,
}

impl CsvParser {
    pub fn new(settings: CsvSettings) -> Result<Self> {
        let delimiter = match settings.delimiter.as_bytes() {
            [byte] => *byte,
            b"\\t" => b'\t',
            _ => {
                return Err(SyncError::Config(format!(
                    "csv delimiter must be a single byte, got {:?}",
                    settings.delimiter
                )))
            }
        };
        Ok(Self {
            header: settings.header,
            delimiter,
        })
    }
}

impl Parser for CsvParser {
    fn parse(&self, payload: Payload) -> Result<Vec<ParsedRecord>> {
        let text = payload.into_text()?;
        let text = text.trim_start_matches('\u{feff}');
        debug!("CsvParser: start bytes_len={}", text.len());

        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(text.as_bytes());

        let mut header: Option<Vec<String>> = None;
        let mut out = Vec::new();
        for row in reader.records() {
            let row = row?;
            if row.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            if self.header && header.is_none() {
                header = Some(row.iter().map(|h| h.trim().to_string()).collect());
                continue;
            }
            let record = match &header {
                Some(names) if names.len() == row.len() => {
                    let mut map = Map::new();
                    for (name, field) in names.iter().zip(row.iter()) {
                        map.insert(name.clone(), Value::String(field.to_string()));
                    }
                    Value::Object(map)
                }
                _ => Value::Array(
                    row.iter()
                        .map(|field| Value::String(field.to_string()))
                        .collect(),
                ),
            };
            out.push(ParsedRecord::new(out.len().to_string(), record));
        }
        debug!("CsvParser: parsed rows={}", out.len());
        Ok(out)
    }
}
