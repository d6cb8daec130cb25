use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::{Fetcher, Paging, Payload};
use crate::error::{Result, SyncError};
use crate::item::{value_to_string, SyncItemCollection};
use crate::parser::xml::xml_to_value;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SoapFilter {
    #[serde(alias = "Field")]
    pub field: String,
    #[serde(alias = "Criteria")]
    pub criteria: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SoapSettings {
    pub url: String,
    pub resource_name: String,
    pub resource_segment: String,
    pub resource_function: String,
    pub resource_function_result: String,
    /// Defaults to the Dynamics NAV page namespace for `resource_name`.
    pub namespace: Option<String>,
    pub params: Map<String, Value>,
    pub filters: Vec<SoapFilter>,
    /// Field of the last item that carries the cursor for the next page.
    pub bookmark_key: String,
    pub login: Option<String>,
    pub password: Option<String>,
    pub timeout_seconds: u64,
    #[serde(flatten)]
    pub paging: Paging,
}

impl Default for SoapSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            resource_name: String::new(),
            resource_segment: "Page".to_string(),
            resource_function: "ReadMultiple".to_string(),
            resource_function_result: "ReadMultiple_Result".to_string(),
            namespace: None,
            params: Map::new(),
            filters: Vec::new(),
            bookmark_key: "Key".to_string(),
            login: None,
            password: None,
            timeout_seconds: 60,
            paging: Paging {
                page_enabled: true,
                page_size: Some(100),
                page_limit: None,
            },
        }
    }
}

/// Reads Dynamics NAV style `ReadMultiple` pages over SOAP, following the bookmark cursor.
pub struct SoapFetcher {
    client: reqwest::Client,
    settings: SoapSettings,
}

impl SoapFetcher {
    pub fn new(settings: SoapSettings) -> Result<Self> {
        if settings.url.is_empty() {
            return Err(SyncError::MissingField("url".to_string()));
        }
        if settings.resource_name.is_empty() {
            return Err(SyncError::MissingField("resource_name".to_string()));
        }
        check_element_name(&settings.resource_function)?;
        for (name, value) in &settings.params {
            check_param(name, value)?;
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;
        Ok(Self { client, settings })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}/{}",
            self.settings.url.trim_end_matches('/'),
            self.settings.resource_segment,
            self.settings.resource_name
        )
    }

    fn namespace(&self) -> String {
        self.settings.namespace.clone().unwrap_or_else(|| {
            format!(
                "urn:microsoft-dynamics-schemas/page/{}",
                self.settings.resource_name.to_lowercase()
            )
        })
    }

    fn bookmark(&self, previous: &SyncItemCollection) -> Option<String> {
        if self.settings.bookmark_key.is_empty() {
            return None;
        }
        previous
            .last()
            .and_then(|item| item.get_string(&self.settings.bookmark_key))
            .filter(|key| !key.is_empty())
    }

    pub fn envelope(&self, bookmark: Option<&str>) -> Result<String> {
        let function = self.settings.resource_function.as_str();
        let namespace = self.namespace();
        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        writer.write_event(Event::Start(
            BytesStart::new("soap:Envelope")
                .with_attributes([("xmlns:soap", "http://schemas.xmlsoap.org/soap/envelope/")]),
        ))?;
        writer.write_event(Event::Start(BytesStart::new("soap:Body")))?;
        writer.write_event(Event::Start(
            BytesStart::new(function).with_attributes([("xmlns", namespace.as_str())]),
        ))?;
        for filter in &self.settings.filters {
            writer.write_event(Event::Start(BytesStart::new("filter")))?;
            write_text(&mut writer, "Field", &filter.field)?;
            write_text(&mut writer, "Criteria", &filter.criteria)?;
            writer.write_event(Event::End(BytesEnd::new("filter")))?;
        }
        if let Some(size) = self.settings.paging.page_size {
            write_text(&mut writer, "setSize", &size.to_string())?;
        }
        if let Some(bookmark) = bookmark {
            write_text(&mut writer, "bookmarkKey", bookmark)?;
        }
        for (name, value) in &self.settings.params {
            write_param(&mut writer, name, value)?;
        }
        writer.write_event(Event::End(BytesEnd::new(function)))?;
        writer.write_event(Event::End(BytesEnd::new("soap:Body")))?;
        writer.write_event(Event::End(BytesEnd::new("soap:Envelope")))?;
        String::from_utf8(writer.into_inner()).map_err(|e| SyncError::Api {
            message: format!("SOAP envelope is not UTF-8: {}", e),
        })
    }

    /// Pulls the `resource_name` elements out of the decoded response.
    fn records(&self, document: &Value) -> Vec<Value> {
        let scope = find_key(document, &self.settings.resource_function_result).unwrap_or(document);
        match find_key(scope, &self.settings.resource_name) {
            Some(Value::Array(list)) => list.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(single) => vec![single.clone()],
        }
    }
}

/// Element names are written verbatim, so they must be plain XML names.
fn check_element_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .map_or(false, |first| first.is_alphabetic() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if valid {
        Ok(())
    } else {
        Err(SyncError::Config(format!("invalid SOAP element name {:?}", name)))
    }
}

fn check_param(name: &str, value: &Value) -> Result<()> {
    check_element_name(name)?;
    match value {
        Value::Array(list) => list.iter().try_for_each(|entry| check_param(name, entry)),
        Value::Object(map) => map.iter().try_for_each(|(child, inner)| check_param(child, inner)),
        _ => Ok(()),
    }
}

fn write_text(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_param(writer: &mut Writer<Vec<u8>>, name: &str, value: &Value) -> Result<()> {
    match value {
        Value::Array(list) => {
            for entry in list {
                write_param(writer, name, entry)?;
            }
        }
        Value::Object(map) => {
            writer.write_event(Event::Start(BytesStart::new(name)))?;
            for (child, inner) in map {
                write_param(writer, child, inner)?;
            }
            writer.write_event(Event::End(BytesEnd::new(name)))?;
        }
        scalar => write_text(writer, name, &value_to_string(scalar).unwrap_or_default())?,
    }
    Ok(())
}

/// Depth-first search for the first member called `key`.
fn find_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map
            .get(key)
            .or_else(|| map.values().find_map(|inner| find_key(inner, key))),
        Value::Array(list) => list.iter().find_map(|inner| find_key(inner, key)),
        _ => None,
    }
}

#[async_trait]
impl Fetcher for SoapFetcher {
    fn paging(&self) -> &Paging {
        &self.settings.paging
    }

    async fn fetch(&self, page: u32, previous: &SyncItemCollection) -> Result<Payload> {
        let bookmark = self.bookmark(previous);
        let envelope = self.envelope(bookmark.as_deref())?;
        debug!(
            "SOAP {} page={} bookmark={:?}",
            self.settings.resource_function, page, bookmark
        );

        let mut request = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "text/xml; charset=utf-8")
            .header(
                "SOAPAction",
                format!("{}:{}", self.namespace(), self.settings.resource_function),
            )
            .body(envelope);
        if let (Some(login), Some(password)) = (&self.settings.login, &self.settings.password) {
            request = request.basic_auth(login, Some(password));
        }
        let text = request.send().await?.error_for_status()?.text().await?;
        let records = self.records(&xml_to_value(&text)?);
        debug!("SOAP response records={}", records.len());
        Ok(Payload::Records(records))
    }
}
