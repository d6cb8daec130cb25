use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::Resource;
use crate::content::{self, ExistingFile, StoredFile};
use crate::error::{Result, SyncError};
use crate::item::SyncItem;
use crate::storage::{EntityStore, Record, StaleRow};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileResourceSettings {
    /// Target directory, relative paths resolve against the content root.
    pub directory: String,
    pub id_field: String,
    pub contents_field: String,
    pub filename_field: String,
    pub replace: bool,
}

impl Default for FileResourceSettings {
    fn default() -> Self {
        Self {
            directory: "sync".to_string(),
            id_field: "filename".to_string(),
            contents_field: "contents".to_string(),
            filename_field: "filename".to_string(),
            replace: true,
        }
    }
}

/// Stores item payloads as files and keeps the file handle on the record.
pub struct FileResource {
    settings: FileResourceSettings,
    directory: PathBuf,
}

impl FileResource {
    pub fn new(settings: FileResourceSettings, content_root: &Path) -> Self {
        let directory = content_root.join(&settings.directory);
        Self {
            settings,
            directory,
        }
    }

    fn write(&self, item: &SyncItem) -> Result<StoredFile> {
        let filename = item
            .get_string(&self.settings.filename_field)
            .filter(|f| !f.is_empty())
            .ok_or_else(|| SyncError::skip("Item has no filename."))?;
        let existing = ExistingFile::from_replace_flag(self.settings.replace);

        if let Some(contents) = item.get_string(&self.settings.contents_field) {
            return content::write_file(&self.directory, &filename, contents.as_bytes(), existing);
        }
        // Handles produced by the file parsers point at an already stored copy.
        if let Some(uri) = item.get_string("uri") {
            let bytes = fs::read(&uri)
                .map_err(|e| SyncError::fail(format!("Cannot read {}: {}", uri, e)))?;
            return content::write_file(&self.directory, &filename, &bytes, existing);
        }
        Err(SyncError::skip(format!(
            "Item {} has no '{}' to write.",
            filename, self.settings.contents_field
        )))
    }
}

#[async_trait]
impl Resource for FileResource {
    fn id(&self, item: &SyncItem) -> Result<String> {
        item.get_string(&self.settings.id_field)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                SyncError::fail(format!(
                    "Item has no value for id field '{}'.",
                    self.settings.id_field
                ))
            })
    }

    async fn process_item(&self, record: &mut Record, item: &SyncItem) -> Result<()> {
        let stored = self.write(item)?;
        if let Some(previous) = record.get_str("uri") {
            if previous != stored.uri {
                content::delete_file(previous)?;
            }
        }
        debug!("FileResource: stored {} ({} bytes)", stored.uri, stored.size);
        record.set("uri", stored.uri);
        record.set("filename", stored.filename);
        record.set("sha256", stored.sha256);
        record.set("size", stored.size);
        Ok(())
    }

    async fn clean_item(
        &self,
        entities: &dyn EntityStore,
        record: &Record,
        _row: &StaleRow,
    ) -> Result<bool> {
        if let Some(uri) = record.get_str("uri") {
            content::delete_file(uri)?;
        }
        entities.delete(record).await
    }
}
