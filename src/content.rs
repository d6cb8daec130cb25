//! Local content store for files produced by file parsers and file resources.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, SyncError};

/// What to do when the destination name is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingFile {
    Replace,
    #[default]
    Rename,
}

impl ExistingFile {
    pub fn from_replace_flag(replace: bool) -> Self {
        if replace {
            ExistingFile::Replace
        } else {
            ExistingFile::Rename
        }
    }
}

/// Handle describing a file written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    pub uri: String,
    pub filename: String,
    pub size: u64,
    pub sha256: String,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Keeps only the final path component so item data cannot escape the directory.
fn safe_filename(filename: &str) -> Result<String> {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && *n != "..")
        .ok_or_else(|| SyncError::fail(format!("Invalid filename '{}'", filename)))?;
    Ok(name.to_string())
}

fn free_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    let extension = path.extension().and_then(|e| e.to_str());
    (0u32..)
        .map(|n| match extension {
            Some(ext) => dir.join(format!("{}_{}.{}", stem, n, ext)),
            None => dir.join(format!("{}_{}", stem, n)),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

pub fn write_file(
    dir: &Path,
    filename: &str,
    bytes: &[u8],
    existing: ExistingFile,
) -> Result<StoredFile> {
    fs::create_dir_all(dir)?;
    let filename = safe_filename(filename)?;
    let path = match existing {
        ExistingFile::Replace => dir.join(&filename),
        ExistingFile::Rename => free_path(dir, &filename),
    };
    fs::write(&path, bytes)?;
    Ok(StoredFile {
        filename: path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&filename)
            .to_string(),
        uri: path.to_string_lossy().into_owned(),
        size: bytes.len() as u64,
        sha256: sha256_hex(bytes),
    })
}

/// Removes a stored file; a file that is already gone is not an error.
pub fn delete_file(uri: &str) -> Result<bool> {
    match fs::remove_file(uri) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
