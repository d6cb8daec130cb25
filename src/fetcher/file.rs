use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{Fetcher, Paging, Payload};
use crate::error::{Result, SyncError};
use crate::item::SyncItemCollection;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    pub path: String,
    /// Allows `http(s)://` paths, fetched over the network.
    pub remote: bool,
    #[serde(flatten)]
    pub paging: Paging,
}

fn is_url(path: &str) -> bool {
    path.contains("://")
}

fn resolve(root: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    }
}

fn read_local(path: &Path) -> Result<Payload> {
    if !path.exists() {
        return Err(SyncError::fail(format!(
            "The file {} could not be found.",
            path.display()
        )));
    }
    let bytes = std::fs::read(path)?;
    debug!("FileFetcher: read {} bytes_len={}", path.display(), bytes.len());
    Ok(payload_from_bytes(bytes))
}

fn payload_from_bytes(bytes: Vec<u8>) -> Payload {
    match String::from_utf8(bytes) {
        Ok(text) => Payload::Text(text),
        Err(e) => Payload::Bytes(e.into_bytes()),
    }
}

/// Reads a whole file as a single page.
pub struct FileFetcher {
    settings: FileSettings,
    root: PathBuf,
    client: reqwest::Client,
}

impl FileFetcher {
    pub fn new(settings: FileSettings, root: PathBuf) -> Result<Self> {
        if settings.path.is_empty() {
            return Err(SyncError::MissingField("path".to_string()));
        }
        Ok(Self {
            settings,
            root,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    fn paging(&self) -> &Paging {
        &self.settings.paging
    }

    async fn fetch(&self, _page: u32, _previous: &SyncItemCollection) -> Result<Payload> {
        if is_url(&self.settings.path) {
            if !self.settings.remote {
                return Err(SyncError::fail(format!(
                    "The file {} is remote but remote fetching is disabled.",
                    self.settings.path
                )));
            }
            debug!("HTTP GET request to {}", self.settings.path);
            let response = self
                .client
                .get(&self.settings.path)
                .send()
                .await?
                .error_for_status()?;
            return Ok(payload_from_bytes(response.bytes().await?.to_vec()));
        }
        read_local(&resolve(&self.root, &self.settings.path))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Supplied at run time with the uploaded file's location.
    pub path: String,
    #[serde(alias = "extentions")]
    pub extensions: Vec<String>,
    #[serde(flatten)]
    pub paging: Paging,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            path: String::new(),
            extensions: vec!["csv".to_string()],
            paging: Paging::default(),
        }
    }
}

/// Reads a file handed in by an operator, accepting only whitelisted extensions.
pub struct FileUploadFetcher {
    settings: UploadSettings,
    root: PathBuf,
}

impl FileUploadFetcher {
    pub fn new(settings: UploadSettings, root: PathBuf) -> Self {
        Self { settings, root }
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let allowed = self
            .settings
            .extensions
            .iter()
            .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&extension));
        if allowed {
            Ok(())
        } else {
            Err(SyncError::fail(format!(
                "Only files with the following extensions are allowed: {}.",
                self.settings.extensions.join(" ")
            )))
        }
    }
}

#[async_trait]
impl Fetcher for FileUploadFetcher {
    fn paging(&self) -> &Paging {
        &self.settings.paging
    }

    async fn fetch(&self, _page: u32, _previous: &SyncItemCollection) -> Result<Payload> {
        if self.settings.path.is_empty() {
            return Err(SyncError::fail("No file has been uploaded."));
        }
        let path = resolve(&self.root, &self.settings.path);
        self.validate(&path)?;
        read_local(&path)
    }
}
