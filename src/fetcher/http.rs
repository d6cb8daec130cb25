use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::{Fetcher, Paging, Payload};
use crate::error::{Result, SyncError};
use crate::item::{value_to_string, SyncItemCollection};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub url: String,
    pub query: Map<String, Value>,
    pub headers: BTreeMap<String, String>,
    /// Query parameter that carries the page number when paging is enabled.
    pub page_key: String,
    pub timeout_seconds: u64,
    #[serde(flatten)]
    pub paging: Paging,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            query: Map::new(),
            headers: BTreeMap::new(),
            page_key: "page".to_string(),
            timeout_seconds: 30,
            paging: Paging::default(),
        }
    }
}

pub struct HttpFetcher {
    client: reqwest::Client,
    settings: HttpSettings,
}

impl HttpFetcher {
    pub fn new(settings: HttpSettings) -> Result<Self> {
        if settings.url.is_empty() {
            return Err(SyncError::MissingField("url".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;
        Ok(Self { client, settings })
    }

    fn query_pairs(&self, page: u32) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .settings
            .query
            .iter()
            .filter_map(|(key, value)| value_to_string(value).map(|v| (key.clone(), v)))
            .collect();
        if self.settings.paging.page_enabled {
            pairs.retain(|(key, _)| key != &self.settings.page_key);
            pairs.push((self.settings.page_key.clone(), page.to_string()));
        }
        pairs
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn paging(&self) -> &Paging {
        &self.settings.paging
    }

    async fn fetch(&self, page: u32, _previous: &SyncItemCollection) -> Result<Payload> {
        let query = self.query_pairs(page);
        debug!("HTTP GET request to {} query={:?}", self.settings.url, query);
        let mut request = self.client.get(&self.settings.url).query(&query);
        for (name, value) in &self.settings.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await?.error_for_status()?;
        let body = response.text().await?;
        debug!("HTTP response bytes_len={}", body.len());
        Ok(Payload::Text(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_key_overrides_configured_query() {
        let settings: HttpSettings = serde_json::from_value(json!({
            "url": "https://example.test/api",
            "query": {"limit": 50, "page": 9, "active": true},
            "page_enabled": true,
            "page_key": "page"
        }))
        .unwrap();
        let fetcher = HttpFetcher::new(settings).unwrap();
        let pairs = fetcher.query_pairs(3);
        assert!(pairs.contains(&("limit".to_string(), "50".to_string())));
        assert!(pairs.contains(&("active".to_string(), "true".to_string())));
        assert!(pairs.contains(&("page".to_string(), "3".to_string())));
        assert_eq!(pairs.iter().filter(|(k, _)| k == "page").count(), 1);
    }

    #[test]
    fn url_is_required() {
        assert!(matches!(
            HttpFetcher::new(HttpSettings::default()),
            Err(SyncError::MissingField(_))
        ));
    }
}
