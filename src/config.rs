use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::constants;
use crate::error::{Result, SyncError};
use crate::pipeline::RunnerSettings;
use crate::resource::{ResourceDefinition, ResourceManager};

fn default_database() -> String {
    constants::DEFAULT_DATABASE.to_string()
}

fn default_log_dir() -> String {
    constants::DEFAULT_LOG_DIR.to_string()
}

fn default_content_root() -> String {
    constants::DEFAULT_CONTENT_ROOT.to_string()
}

fn default_file_root() -> String {
    ".".to_string()
}

fn default_max_debug() -> usize {
    constants::DEFAULT_MAX_DEBUG
}

fn default_lease_seconds() -> i64 {
    constants::DEFAULT_LEASE_SECONDS
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default)]
    pub log_verbose: bool,
    /// Recipient of failure alerts; unset disables them.
    #[serde(default)]
    pub email_fail: Option<String>,
    /// Alerts are POSTed here when set, otherwise written to the log.
    #[serde(default)]
    pub webhook_fail: Option<String>,
    #[serde(default = "default_max_debug")]
    pub max_debug: usize,
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: i64,
    #[serde(default = "default_file_root")]
    pub file_root: String,
    #[serde(default = "default_content_root")]
    pub content_root: String,
    /// Prometheus listen address, e.g. `127.0.0.1:9000`.
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: default_database(),
            log_dir: default_log_dir(),
            log_verbose: false,
            email_fail: None,
            webhook_fail: None,
            max_debug: default_max_debug(),
            lease_seconds: default_lease_seconds(),
            file_root: default_file_root(),
            content_root: default_content_root(),
            metrics_addr: None,
        }
    }
}

impl Settings {
    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            email_fail: self.email_fail.clone().filter(|e| !e.is_empty()),
            max_debug: self.max_debug,
            lease_seconds: self.lease_seconds,
        }
    }

    pub fn file_root(&self) -> PathBuf {
        PathBuf::from(&self.file_root)
    }

    pub fn content_root(&self) -> PathBuf {
        PathBuf::from(&self.content_root)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceDefinition>,
}

impl Config {
    /// Reads the file named by `PULLSYNC_CONFIG`, or `pullsync.toml`.
    pub fn load() -> Result<Self> {
        let path = std::env::var(constants::CONFIG_ENV)
            .unwrap_or_else(|_| constants::DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Validated, ordered view of the configured resources.
    pub fn manager(&self) -> Result<ResourceManager> {
        ResourceManager::new(self.resources.clone())
    }
}
